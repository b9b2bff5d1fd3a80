//! State for non-email collections (contacts, calendar, tasks, notes).
//!
//! These backends return an authoritative full state every cycle, so no
//! delta bookkeeping is kept locally; the only thing committing a cycle
//! does is flip the initial-sync flag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FolderMeta, SyncFolder};
use crate::error::{Result, StaleState};
use crate::types::CollectionClass;

const FORMAT_VERSION: u32 = 2;
const LEGACY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState {
    meta: FolderMeta,
    /// Backend-specific metadata blob, opaque at this layer.
    status: BTreeMap<String, Value>,
}

impl CollectionState {
    pub fn new(server_id: &str, class: CollectionClass) -> Self {
        Self {
            meta: FolderMeta::new(server_id, class),
            status: BTreeMap::new(),
        }
    }

    /// Wholesale replace of the status blob after a fresh backend query.
    pub fn set_status(&mut self, status: BTreeMap<String, Value>) {
        self.status = status;
    }

    pub fn status(&self) -> &BTreeMap<String, Value> {
        &self.status
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let blob = Persisted {
            version: FORMAT_VERSION,
            server_id: self.meta.server_id.clone(),
            class: self.meta.class,
            status: self.status.clone(),
            last_since_date: self.meta.last_since_date,
            last_soft_delete: self.meta.last_soft_delete,
            have_initial_sync: self.meta.have_initial_sync,
        };
        Ok(serde_json::to_vec(&blob)?)
    }

    /// Decode a persisted blob. The version tag is checked before anything
    /// else; exactly one prior format (the positional v1 layout) is
    /// accepted, everything else is a fatal stale-state condition.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        match &value {
            Value::Object(fields) => {
                let found = fields
                    .get("version")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| StaleState::Corrupt("missing version tag".into()))?;
                if found != u64::from(FORMAT_VERSION) {
                    return Err(StaleState::VersionMismatch { found: found as u32 }.into());
                }
                let blob: Persisted = serde_json::from_value(value)?;
                Ok(Self {
                    meta: FolderMeta {
                        server_id: blob.server_id,
                        class: blob.class,
                        have_initial_sync: blob.have_initial_sync,
                        last_since_date: blob.last_since_date,
                        last_soft_delete: blob.last_soft_delete,
                    },
                    status: blob.status,
                })
            }
            Value::Array(fields) => {
                let found = fields
                    .last()
                    .and_then(Value::as_u64)
                    .ok_or_else(|| StaleState::Corrupt("missing version tag".into()))?;
                if found != u64::from(LEGACY_FORMAT_VERSION) {
                    return Err(StaleState::VersionMismatch { found: found as u32 }.into());
                }
                let blob: LegacyPersisted = serde_json::from_value(value)?;
                Ok(Self {
                    meta: FolderMeta {
                        server_id: blob.1,
                        class: blob.2,
                        // The legacy layout predates the flag; a persisted
                        // blob implies at least one committed cycle.
                        have_initial_sync: true,
                        last_since_date: blob.3,
                        last_soft_delete: blob.4,
                    },
                    status: blob.0,
                })
            }
            _ => Err(StaleState::Corrupt("expected object or array blob".into()).into()),
        }
    }
}

impl SyncFolder for CollectionState {
    fn meta(&self) -> &FolderMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut FolderMeta {
        &mut self.meta
    }

    fn update_state(&mut self) {
        self.meta.have_initial_sync = true;
    }
}

#[derive(Serialize, Deserialize)]
struct Persisted {
    version: u32,
    server_id: String,
    class: CollectionClass,
    status: BTreeMap<String, Value>,
    last_since_date: i64,
    last_soft_delete: i64,
    have_initial_sync: bool,
}

/// v1 layout: `[status, server_id, class, last_since_date, last_soft_delete, version]`.
#[derive(Deserialize)]
struct LegacyPersisted(BTreeMap<String, Value>, String, CollectionClass, i64, i64, u32);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;

    #[test]
    fn test_update_state_sets_initial_sync_flag() {
        let mut folder = CollectionState::new("calendar", CollectionClass::Calendar);
        assert!(!folder.have_initial_sync());
        folder.update_state();
        assert!(folder.have_initial_sync());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut folder = CollectionState::new("contacts", CollectionClass::Contacts);
        folder.set_status(BTreeMap::from([
            ("etag".to_string(), Value::from("abc123")),
            ("count".to_string(), Value::from(42)),
        ]));
        folder.set_soft_delete_times(100, 200);
        folder.update_state();

        let decoded = CollectionState::decode(&folder.encode().unwrap()).unwrap();
        assert_eq!(decoded, folder);
    }

    #[test]
    fn test_unknown_version_is_stale() {
        let blob = br#"{"version":3,"server_id":"x","class":"tasks","status":{},"last_since_date":0,"last_soft_delete":0,"have_initial_sync":true}"#;
        let err = CollectionState::decode(blob).unwrap_err();
        assert_eq!(
            err,
            StateError::StaleState(StaleState::VersionMismatch { found: 3 })
        );
    }

    #[test]
    fn test_legacy_v1_blob_accepted() {
        let blob = br#"[{"etag":"abc"},"notes","notes",123,456,1]"#;
        let folder = CollectionState::decode(blob).unwrap();
        assert_eq!(folder.server_id(), "notes");
        assert_eq!(folder.collection_class(), CollectionClass::Notes);
        assert_eq!(folder.soft_delete_times(), (123, 456));
        assert!(folder.have_initial_sync());
    }

    #[test]
    fn test_legacy_blob_with_older_version_is_stale() {
        let blob = br#"[{},"x","tasks",0,0,0]"#;
        let err = CollectionState::decode(blob).unwrap_err();
        assert_eq!(
            err,
            StateError::StaleState(StaleState::VersionMismatch { found: 0 })
        );
    }

    #[test]
    fn test_garbage_blob_is_stale() {
        assert!(CollectionState::decode(b"not json").unwrap_err().is_stale_state());
        assert!(CollectionState::decode(b"\"string\"").unwrap_err().is_stale_state());
    }
}
