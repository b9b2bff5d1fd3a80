//! Per-folder synchronization state.
//!
//! One state object exists per device-and-folder pair. It is rehydrated
//! from its persisted blob at the start of a sync request, fed the fresh
//! backend snapshot by the protocol handler, queried for deltas, committed
//! with [`SyncFolder::update_state`], and re-persisted. A crashed cycle is
//! simply re-run against the last committed state.

mod collection;
mod imap;
mod recipient;

pub use collection::CollectionState;
pub use imap::{ImapFolderState, ImapStatus, MessageStore};
pub use recipient::RecipientState;

use serde::{Deserialize, Serialize};

use crate::types::CollectionClass;

/// Bookkeeping shared by every tracked folder, regardless of backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMeta {
    /// Backend folder identifier. Mutable, folder renames happen.
    pub server_id: String,
    /// Collection type, fixed at construction.
    pub class: CollectionClass,
    /// True only after the first successfully committed sync cycle.
    pub have_initial_sync: bool,
    /// Since-date filter used by the last soft-delete sweep (unix seconds, 0 = never).
    pub last_since_date: i64,
    /// When the last soft-delete sweep ran (unix seconds, 0 = never).
    pub last_soft_delete: i64,
}

impl FolderMeta {
    pub fn new(server_id: &str, class: CollectionClass) -> Self {
        Self {
            server_id: server_id.to_string(),
            class,
            have_initial_sync: false,
            last_since_date: 0,
            last_soft_delete: 0,
        }
    }
}

/// Common surface of all folder state types.
pub trait SyncFolder {
    fn meta(&self) -> &FolderMeta;

    fn meta_mut(&mut self) -> &mut FolderMeta;

    /// Commit the current sync cycle, reconciling the tracked state and
    /// clearing all transient per-cycle delta buffers.
    fn update_state(&mut self);

    fn server_id(&self) -> &str {
        &self.meta().server_id
    }

    fn set_server_id(&mut self, server_id: &str) {
        self.meta_mut().server_id = server_id.to_string();
    }

    fn collection_class(&self) -> CollectionClass {
        self.meta().class
    }

    fn have_initial_sync(&self) -> bool {
        self.meta().have_initial_sync
    }

    /// Record bookkeeping for a periodic soft-delete sweep. No validation.
    fn set_soft_delete_times(&mut self, since_date: i64, ts: i64) {
        let meta = self.meta_mut();
        meta.last_since_date = since_date;
        meta.last_soft_delete = ts;
    }

    fn soft_delete_times(&self) -> (i64, i64) {
        let meta = self.meta();
        (meta.last_since_date, meta.last_soft_delete)
    }
}
