//! Fatal error conditions for persisted folder sync state.
//!
//! Both error families mean the same thing to the caller: the locally
//! persisted state can no longer be trusted, all of it must be discarded,
//! and a full initial sync has to be performed. Neither is retried here.

use thiserror::Error;

use crate::types::Uid;

pub type Result<T> = std::result::Result<T, StateError>;

/// Why the persisted sync bookkeeping no longer corresponds to reality.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StaleState {
    #[error("no UIDVALIDITY has ever been recorded for this folder")]
    NotInitialized,

    #[error("UIDVALIDITY changed from {stored} to {reported}")]
    UidValidityChanged { stored: u32, reported: u32 },

    #[error("unsupported sync state format version {found}")]
    VersionMismatch { found: u32 },

    #[error("folder transitioned to a MODSEQ-enabled server after its initial sync")]
    ModseqTransition,

    #[error("corrupt persisted sync state: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The persisted state must be discarded and the folder fully resynced.
    #[error("stale sync state: {0}")]
    StaleState(#[from] StaleState),

    /// The server violated the UID-monotonicity contract. Accepting the
    /// reported UIDs would desynchronize the device's UID window.
    #[error("broken server: reported vanished uid {uid} below tracked minimum {min}")]
    BrokenServer { uid: Uid, min: Uid },
}

impl StateError {
    pub fn is_stale_state(&self) -> bool {
        matches!(self, StateError::StaleState(_))
    }

    pub fn is_broken_server(&self) -> bool {
        matches!(self, StateError::BrokenServer { .. })
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::StaleState(StaleState::Corrupt(err.to_string()))
    }
}
