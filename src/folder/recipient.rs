//! State for the ranked recipient-information cache.
//!
//! The backend hands over a ranked list of recipient addresses, most
//! recently used first. There is no surrogate identifier: the wire key for
//! every entry is the composite `"address:weight"` string, and deltas are
//! computed positionally against the previous cycle's list.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FolderMeta, SyncFolder};
use crate::error::{Result, StaleState};
use crate::types::CollectionClass;

const FORMAT_VERSION: u32 = 2;
const LEGACY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientState {
    meta: FolderMeta,
    /// Stored lowest-weight-first, so an entry's index is its weight.
    contacts: Vec<String>,
    added: BTreeSet<String>,
    removed: BTreeSet<String>,
}

impl RecipientState {
    pub fn new(server_id: &str) -> Self {
        Self {
            meta: FolderMeta::new(server_id, CollectionClass::RecipientCache),
            contacts: Vec::new(),
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Diff the fresh ranked list (most-recently-used first) against the
    /// previous cycle's list and replace it wholesale.
    ///
    /// For every weight position that differs, the old entry is reported
    /// removed and the new one added, both as `"address:weight"` keys.
    pub fn set_changes(&mut self, contacts: &[String]) {
        let mut incoming = contacts.to_vec();
        incoming.reverse();

        for (weight, old) in self.contacts.iter().enumerate() {
            if incoming.get(weight) != Some(old) {
                self.removed.insert(format!("{old}:{weight}"));
            }
        }
        for (weight, new) in incoming.iter().enumerate() {
            if self.contacts.get(weight) != Some(new) {
                self.added.insert(format!("{new}:{weight}"));
            }
        }

        tracing::debug!(
            "recipient cache {}: {} added, {} removed",
            self.meta.server_id,
            self.added.len(),
            self.removed.len()
        );

        self.contacts = incoming;
    }

    pub fn added(&self) -> &BTreeSet<String> {
        &self.added
    }

    pub fn removed(&self) -> &BTreeSet<String> {
        &self.removed
    }

    /// The tracked list in external order, most recently used first.
    pub fn contacts(&self) -> Vec<String> {
        self.contacts.iter().rev().cloned().collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let blob = Persisted {
            version: FORMAT_VERSION,
            server_id: self.meta.server_id.clone(),
            class: self.meta.class,
            contacts: self.contacts.clone(),
            last_since_date: self.meta.last_since_date,
            last_soft_delete: self.meta.last_soft_delete,
            have_initial_sync: self.meta.have_initial_sync,
        };
        Ok(serde_json::to_vec(&blob)?)
    }

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
                    contacts: blob.contacts,
                    added: BTreeSet::new(),
                    removed: BTreeSet::new(),
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
                        have_initial_sync: true,
                        last_since_date: blob.3,
                        last_soft_delete: blob.4,
                    },
                    contacts: blob.0,
                    added: BTreeSet::new(),
                    removed: BTreeSet::new(),
                })
            }
            _ => Err(StaleState::Corrupt("expected object or array blob".into()).into()),
        }
    }
}

impl SyncFolder for RecipientState {
    fn meta(&self) -> &FolderMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut FolderMeta {
        &mut self.meta
    }

    fn update_state(&mut self) {
        self.meta.have_initial_sync = true;
        self.added.clear();
        self.removed.clear();
    }
}

#[derive(Serialize, Deserialize)]
struct Persisted {
    version: u32,
    server_id: String,
    class: CollectionClass,
    contacts: Vec<String>,
    last_since_date: i64,
    last_soft_delete: i64,
    have_initial_sync: bool,
}

/// v1 layout: `[contacts, server_id, class, last_since_date, last_soft_delete, version]`.
#[derive(Deserialize)]
struct LegacyPersisted(Vec<String>, String, CollectionClass, i64, i64, u32);

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_initial_list_is_all_added() {
        let mut ri = RecipientState::new("RI");
        ri.set_changes(&strings(&["c", "b", "a"]));
        assert_eq!(ri.added(), &BTreeSet::from(["a:0".into(), "b:1".into(), "c:2".into()]));
        assert!(ri.removed().is_empty());
        assert_eq!(ri.contacts(), strings(&["c", "b", "a"]));
    }

    #[test]
    fn test_positional_diff_reports_replaced_weight() {
        let mut ri = RecipientState::new("RI");
        // Previous cycle tracked a,b,c at weights 0,1,2.
        ri.set_changes(&strings(&["c", "b", "a"]));
        ri.update_state();

        // "b" at weight 1 got replaced by "x".
        ri.set_changes(&strings(&["c", "x", "a"]));
        assert_eq!(ri.removed(), &BTreeSet::from(["b:1".into()]));
        assert_eq!(ri.added(), &BTreeSet::from(["x:1".into()]));
    }

    #[test]
    fn test_shrinking_list_reports_missing_weights_removed() {
        let mut ri = RecipientState::new("RI");
        ri.set_changes(&strings(&["c", "b", "a"]));
        ri.update_state();

        ri.set_changes(&strings(&["b", "a"]));
        assert_eq!(ri.removed(), &BTreeSet::from(["c:2".into()]));
        assert!(ri.added().is_empty());
    }

    #[test]
    fn test_update_state_clears_diffs() {
        let mut ri = RecipientState::new("RI");
        ri.set_changes(&strings(&["a"]));
        assert!(!ri.added().is_empty());
        ri.update_state();
        assert!(ri.added().is_empty());
        assert!(ri.removed().is_empty());
        assert!(ri.have_initial_sync());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut ri = RecipientState::new("RI");
        ri.set_changes(&strings(&["b", "a"]));
        ri.update_state();

        let decoded = RecipientState::decode(&ri.encode().unwrap()).unwrap();
        assert_eq!(decoded, ri);
    }

    #[test]
    fn test_legacy_v1_blob_accepted() {
        let blob = br#"[["a","b"],"RI","recipient_cache",0,0,1]"#;
        let ri = RecipientState::decode(blob).unwrap();
        assert_eq!(ri.contacts(), strings(&["b", "a"]));
        assert!(ri.have_initial_sync());
    }
}
