//! Per-folder synchronization state tracking for ActiveSync backends.
//!
//! This crate is the bookkeeping half of an ActiveSync server: for every
//! folder a device has subscribed, it tracks what the device believes the
//! folder contains and computes the add/change/remove/soft-delete deltas
//! to send on the next sync. The protocol command handler owns all
//! backend I/O and persistence; this library only ever sees data that was
//! already fetched.
//!
//! A sync cycle drives one state object through a fixed call sequence:
//!
//! 1. rehydrate via `decode` (or construct fresh for a first sync),
//! 2. feed in the backend snapshot with `set_changes`, `set_removed` and
//!    (CONDSTORE servers) `set_soft_deleted`,
//! 3. read `added`/`changed`/`removed`/`flags`/`get_soft_deleted` to
//!    build the wire response,
//! 4. commit with [`SyncFolder::update_state`], which clears every
//!    transient delta buffer,
//! 5. persist the `encode` blob until the next cycle.
//!
//! If a cycle crashes before step 4, the persisted copy still holds the
//! last committed state and the cycle simply re-runs against it.
//!
//! Fatal conditions ([`StateError`]) mean the persisted state can no
//! longer be trusted: the caller must discard it and force a full resync.

pub mod error;
pub mod folder;
pub mod sequence;
pub mod types;

pub use error::{Result, StaleState, StateError};
pub use folder::{
    CollectionState, FolderMeta, ImapFolderState, ImapStatus, MessageStore, RecipientState,
    SyncFolder,
};
pub use types::{CollectionClass, MessageFlags, Uid};
