//! IMAP folder synchronization state, the email-class tracker.
//!
//! The protocol handler queries the backend (STATUS, UID SEARCH/FETCH,
//! VANISHED) and hands the results in through `set_changes`, `set_removed`
//! and `set_soft_deleted`. The deltas read back out of `added`, `changed`,
//! `removed`, `flags` and `get_soft_deleted` drive the wire response, and
//! `update_state` commits the cycle. The object then serializes to a
//! versioned blob until the next sync request.
//!
//! Servers come in two capability tiers. With CONDSTORE (RFC 7162) the
//! server reports exactly which UIDs changed since a MODSEQ value, so a
//! bare UID set is enough local state. Without it, the handler fetches the
//! full flag state of every message in range each cycle and this tracker
//! diffs it against its own flag cache, which therefore has to be kept.
//! [`MessageStore`] carries that duality as an explicit enum.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FolderMeta, SyncFolder};
use crate::error::{Result, StaleState, StateError};
use crate::sequence::{self, UID_COMPRESSION_THRESHOLD};
use crate::types::{CollectionClass, MessageFlags, Uid};

const FORMAT_VERSION: u32 = 2;
const LEGACY_FORMAT_VERSION: u32 = 1;

/// Snapshot of the backend folder counters, from a STATUS query for
/// UIDVALIDITY, UIDNEXT, HIGHESTMODSEQ and MESSAGES. Servers and devices
/// routinely omit optional items; absent fields stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapStatus {
    pub uidvalidity: u32,
    pub uidnext: u32,
    pub highestmodseq: u64,
    pub messages: u32,
}

/// The device's believed message list, shaped by the server capability tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStore {
    /// CONDSTORE tier: the server pre-filters changes, a UID set suffices.
    UidSet(BTreeSet<Uid>),
    /// Plain tier: full flag state is cached to diff against next cycle.
    FlagMap(BTreeMap<Uid, MessageFlags>),
}

impl MessageStore {
    fn len(&self) -> usize {
        match self {
            MessageStore::UidSet(set) => set.len(),
            MessageStore::FlagMap(map) => map.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn min_uid(&self) -> Option<Uid> {
        match self {
            MessageStore::UidSet(set) => set.first().copied(),
            MessageStore::FlagMap(map) => map.keys().next().copied(),
        }
    }

    fn remove(&mut self, uid: Uid) {
        match self {
            MessageStore::UidSet(set) => {
                set.remove(&uid);
            }
            MessageStore::FlagMap(map) => {
                map.remove(&uid);
            }
        }
    }

    fn uids(&self) -> Vec<Uid> {
        match self {
            MessageStore::UidSet(set) => set.iter().copied().collect(),
            MessageStore::FlagMap(map) => map.keys().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapFolderState {
    meta: FolderMeta,
    status: ImapStatus,
    store: MessageStore,
    added: BTreeSet<Uid>,
    changed: BTreeSet<Uid>,
    removed: BTreeSet<Uid>,
    soft_deleted: BTreeSet<Uid>,
    flags: BTreeMap<Uid, MessageFlags>,
    categories: BTreeMap<Uid, BTreeSet<String>>,
    /// Whether a flags snapshot was ingested this cycle; gates the lazy
    /// soft-delete sweep, which is meaningless without one.
    flags_fetched: bool,
}

impl ImapFolderState {
    /// Fresh state for a folder's first sync. The capability tier is
    /// pinned from the initial status; it can be re-pinned by later
    /// `set_status` calls until the first cycle commits.
    pub fn new(server_id: &str, status: ImapStatus) -> Self {
        Self {
            meta: FolderMeta::new(server_id, CollectionClass::Email),
            store: store_for(&status),
            status,
            added: BTreeSet::new(),
            changed: BTreeSet::new(),
            removed: BTreeSet::new(),
            soft_deleted: BTreeSet::new(),
            flags: BTreeMap::new(),
            categories: BTreeMap::new(),
            flags_fetched: false,
        }
    }

    /// Replace the folder counters after a fresh STATUS query.
    ///
    /// A folder that committed its first sync against a non-MODSEQ server
    /// cannot meaningfully continue once the server starts reporting
    /// HIGHESTMODSEQ; the tracked flag cache and the changed-UID contract
    /// no longer line up, so the state is declared stale.
    pub fn set_status(&mut self, status: ImapStatus) -> Result<()> {
        if self.meta.have_initial_sync {
            if status.highestmodseq > 0
                && self.status.highestmodseq == 0
                && matches!(self.store, MessageStore::FlagMap(_))
            {
                return Err(StaleState::ModseqTransition.into());
            }
        } else if self.store.is_empty() {
            self.store = store_for(&status);
        }
        self.status = status;
        Ok(())
    }

    pub fn uidvalidity(&self) -> u32 {
        self.status.uidvalidity
    }

    pub fn uidnext(&self) -> u32 {
        self.status.uidnext
    }

    pub fn modseq(&self) -> u64 {
        self.status.highestmodseq
    }

    /// Message count the server reported in the last committed STATUS.
    pub fn total_messages(&self) -> u32 {
        self.status.messages
    }

    /// A folder that has never seen a UIDNEXT has never been synced.
    pub fn needs_initial_sync(&self) -> bool {
        self.status.uidnext == 0
    }

    /// Smallest tracked UID, the lower edge of the device's UID window.
    pub fn min_uid(&self) -> Option<Uid> {
        self.store.min_uid()
    }

    /// All currently tracked UIDs, ascending.
    pub fn messages(&self) -> Vec<Uid> {
        self.store.uids()
    }

    /// The tracked message list in its capability-tier shape.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Ingest the server-reported UID snapshot plus freshly fetched flag
    /// and category data.
    ///
    /// A UID at or above the previous cycle's UIDNEXT is brand new and is
    /// only ever reported as added, regardless of its flags; newness takes
    /// priority so the device never sees a duplicate add+change pair. UIDs
    /// inside the tracked window are reported as changed either
    /// unconditionally (CONDSTORE pre-filtered them) or when their cached
    /// read/flagged bits differ from the fresh ones. A UID inside the
    /// window that was never tracked is skipped.
    pub fn set_changes(
        &mut self,
        uids: &[Uid],
        flags: BTreeMap<Uid, MessageFlags>,
        categories: BTreeMap<Uid, BTreeSet<String>>,
    ) {
        let uidnext = self.status.uidnext;
        let modseq = self.status.highestmodseq;
        let min_uid = self.min_uid().unwrap_or(0);

        for &uid in uids {
            if uid >= uidnext {
                self.added.insert(uid);
            } else if uid >= min_uid {
                if modseq > 0 {
                    // Server already filtered to CHANGEDSINCE matches.
                    self.changed.insert(uid);
                } else if let MessageStore::FlagMap(map) = &self.store {
                    if let (Some(cached), Some(fresh)) = (map.get(&uid), flags.get(&uid)) {
                        if cached != fresh {
                            self.changed.insert(uid);
                        }
                    }
                }
            }
        }

        // Last write wins per UID.
        self.flags.extend(flags);
        self.categories.extend(categories);
        self.flags_fetched = true;

        tracing::debug!(
            "folder {}: {} added, {} changed after ingesting {} uids",
            self.meta.server_id,
            self.added.len(),
            self.changed.len(),
            uids.len()
        );
    }

    /// Record server-confirmed expunges (VANISHED/EXPUNGE), ascending.
    ///
    /// A reported UID below the tracked minimum means the server returned
    /// a range that was never in the device's window; accepting it would
    /// silently desynchronize every UID that follows.
    pub fn set_removed(&mut self, uids: &[Uid]) -> Result<()> {
        if let (Some(&first), Some(min)) = (uids.first(), self.min_uid()) {
            if first < min {
                tracing::warn!(
                    "folder {}: server reported vanished uid {} below tracked minimum {}",
                    self.meta.server_id,
                    first,
                    min
                );
                return Err(StateError::BrokenServer { uid: first, min });
            }
        }
        self.removed.extend(uids.iter().copied());
        Ok(())
    }

    /// Inject the authoritative soft-delete list a CONDSTORE server was
    /// queried for out-of-band. The UIDs leave the tracked store
    /// immediately; once soft-deleted, a message is never re-diffed.
    pub fn set_soft_deleted(&mut self, uids: &[Uid]) {
        for &uid in uids {
            self.store.remove(uid);
        }
        self.soft_deleted.extend(uids.iter().copied());
    }

    /// UIDs the device should soft-delete this cycle. Call after
    /// `set_changes`/`set_removed` and before `update_state`.
    ///
    /// On the plain tier a message is soft-deleted when it is still
    /// tracked, was not explicitly expunged, but the latest full flags
    /// query did not return it. Such UIDs are evicted from the store right
    /// here. The sweep only runs when `set_changes` delivered a flags
    /// snapshot this cycle; without one, absence proves nothing. On the
    /// CONDSTORE tier this only reports what was injected via
    /// `set_soft_deleted`.
    pub fn get_soft_deleted(&mut self) -> Vec<Uid> {
        if self.flags_fetched && let MessageStore::FlagMap(map) = &mut self.store {
            let stale: Vec<Uid> = map
                .keys()
                .copied()
                .filter(|uid| !self.removed.contains(uid) && !self.flags.contains_key(uid))
                .collect();
            for uid in &stale {
                map.remove(uid);
            }
            self.soft_deleted.extend(stale);
        }
        self.soft_deleted.iter().copied().collect()
    }

    /// Verify the stored UIDVALIDITY against a fresh status.
    ///
    /// A folder with no recorded UIDVALIDITY was never initialized, and a
    /// changed UIDVALIDITY means the backend folder was recreated; either
    /// way every UID ever issued is meaningless and a full resync is
    /// mandatory. A status that omits UIDVALIDITY is accepted as-is.
    pub fn check_validity(&self, status: &ImapStatus) -> Result<()> {
        if self.status.uidvalidity == 0 {
            return Err(StaleState::NotInitialized.into());
        }
        if status.uidvalidity != 0 && status.uidvalidity != self.status.uidvalidity {
            tracing::warn!(
                "folder {}: uidvalidity changed from {} to {}",
                self.meta.server_id,
                self.status.uidvalidity,
                status.uidvalidity
            );
            return Err(StaleState::UidValidityChanged {
                stored: self.status.uidvalidity,
                reported: status.uidvalidity,
            }
            .into());
        }
        Ok(())
    }

    pub fn added(&self) -> &BTreeSet<Uid> {
        &self.added
    }

    pub fn changed(&self) -> &BTreeSet<Uid> {
        &self.changed
    }

    pub fn removed(&self) -> &BTreeSet<Uid> {
        &self.removed
    }

    pub fn flags(&self) -> &BTreeMap<Uid, MessageFlags> {
        &self.flags
    }

    pub fn categories(&self) -> &BTreeMap<Uid, BTreeSet<String>> {
        &self.categories
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let messages = match &self.store {
            MessageStore::UidSet(set) if set.len() > UID_COMPRESSION_THRESHOLD => {
                PersistedMessages::Sequence(sequence::to_sequence_string(set.iter().copied()))
            }
            MessageStore::UidSet(set) => {
                PersistedMessages::Uids(set.iter().copied().collect())
            }
            MessageStore::FlagMap(map) => PersistedMessages::Flagged(
                map.iter().map(|(uid, flags)| (uid.to_string(), *flags)).collect(),
            ),
        };
        let blob = Persisted {
            version: FORMAT_VERSION,
            server_id: self.meta.server_id.clone(),
            class: self.meta.class,
            status: self.status,
            messages,
            last_since_date: self.meta.last_since_date,
            last_soft_delete: self.meta.last_soft_delete,
            have_initial_sync: self.meta.have_initial_sync,
        };
        Ok(serde_json::to_vec(&blob)?)
    }

    /// Decode a persisted blob. The version tag is checked before any
    /// other field; exactly one prior format (the positional v1 layout) is
    /// accepted as a migration path, anything older or structurally
    /// invalid is a fatal stale-state condition.
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
                Self::from_parts(
                    blob.server_id,
                    blob.class,
                    blob.status,
                    blob.messages,
                    blob.last_since_date,
                    blob.last_soft_delete,
                    blob.have_initial_sync,
                )
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
                // The legacy layout predates the initial-sync flag; a
                // persisted blob implies at least one committed cycle.
                Self::from_parts(blob.2, blob.3, blob.0, blob.1, blob.4, blob.5, true)
            }
            _ => Err(StaleState::Corrupt("expected object or array blob".into()).into()),
        }
    }

    fn from_parts(
        server_id: String,
        class: CollectionClass,
        status: ImapStatus,
        messages: PersistedMessages,
        last_since_date: i64,
        last_soft_delete: i64,
        have_initial_sync: bool,
    ) -> Result<Self> {
        let store = match messages {
            PersistedMessages::Sequence(s) => {
                MessageStore::UidSet(sequence::parse_sequence_string(&s)?)
            }
            PersistedMessages::Uids(uids) => MessageStore::UidSet(uids.into_iter().collect()),
            PersistedMessages::Flagged(map) => {
                let mut store = BTreeMap::new();
                for (key, flags) in map {
                    let uid: Uid = key.parse().map_err(|_| {
                        StaleState::Corrupt(format!("invalid uid key {key:?} in flag map"))
                    })?;
                    store.insert(uid, flags);
                }
                MessageStore::FlagMap(store)
            }
        };
        Ok(Self {
            meta: FolderMeta {
                server_id,
                class,
                have_initial_sync,
                last_since_date,
                last_soft_delete,
            },
            status,
            store,
            added: BTreeSet::new(),
            changed: BTreeSet::new(),
            removed: BTreeSet::new(),
            soft_deleted: BTreeSet::new(),
            flags: BTreeMap::new(),
            categories: BTreeMap::new(),
            flags_fetched: false,
        })
    }
}

impl SyncFolder for ImapFolderState {
    fn meta(&self) -> &FolderMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut FolderMeta {
        &mut self.meta
    }

    /// Commit the cycle: fold the adds into the tracked store, drop the
    /// expunged UIDs, refresh the flag cache on the plain tier, then clear
    /// every transient buffer. Calling this again with empty diffs is a
    /// no-op beyond the first call.
    fn update_state(&mut self) {
        match &mut self.store {
            MessageStore::UidSet(set) => {
                set.extend(self.added.iter().copied());
                for uid in &self.removed {
                    set.remove(uid);
                }
            }
            MessageStore::FlagMap(map) => {
                let survivors: Vec<Uid> = map
                    .keys()
                    .copied()
                    .filter(|uid| !self.removed.contains(uid))
                    .chain(self.added.iter().copied())
                    .collect();
                let mut next = BTreeMap::new();
                for uid in survivors {
                    // Fresh flags win; a UID without fresh data keeps its
                    // cached value or defaults to an empty flag record.
                    let flags = self
                        .flags
                        .get(&uid)
                        .or_else(|| map.get(&uid))
                        .copied()
                        .unwrap_or_default();
                    next.insert(uid, flags);
                }
                *map = next;
            }
        }

        self.meta.have_initial_sync = true;
        self.added.clear();
        self.changed.clear();
        self.removed.clear();
        self.soft_deleted.clear();
        self.flags.clear();
        self.categories.clear();
        self.flags_fetched = false;

        tracing::debug!(
            "folder {}: committed sync cycle, {} messages tracked",
            self.meta.server_id,
            self.store.len()
        );
    }
}

fn store_for(status: &ImapStatus) -> MessageStore {
    if status.highestmodseq > 0 {
        MessageStore::UidSet(BTreeSet::new())
    } else {
        MessageStore::FlagMap(BTreeMap::new())
    }
}

#[derive(Serialize, Deserialize)]
struct Persisted {
    version: u32,
    server_id: String,
    class: CollectionClass,
    status: ImapStatus,
    messages: PersistedMessages,
    last_since_date: i64,
    last_soft_delete: i64,
    have_initial_sync: bool,
}

/// v1 layout: `[status, messages, server_id, class, last_since_date,
/// last_soft_delete, version]`.
#[derive(Deserialize)]
struct LegacyPersisted(ImapStatus, PersistedMessages, String, CollectionClass, i64, i64, u32);

/// The tracked message list as persisted: a compressed sequence string, a
/// plain UID list, or a UID-to-flags map depending on store shape and size.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PersistedMessages {
    Sequence(String),
    Uids(Vec<Uid>),
    Flagged(BTreeMap<String, MessageFlags>),
}
