//! Capture store - the in-memory queue of records awaiting sync.
//!
//! The store holds one insertion-ordered collection per record kind. It is
//! mutated by user capture (`append`) and by the sync engine (state
//! transitions keyed by local id). It never performs a "clear all".

use crate::{
    error::Result, CapturedRecord, Error, IdempotencyToken, LocalId, RecordKind, SyncState,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capacity limits of the local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreLimits {
    /// Maximum number of records held across all kinds
    ///
    /// Durable backends rewrite the whole snapshot on every change, so this
    /// also bounds the cost of a single capture.
    pub max_records: usize,
    /// Maximum serialized size of a single payload
    pub max_payload_bytes: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            max_payload_bytes: 64 * 1024,
        }
    }
}

/// The records of one kind, keyed by local id.
///
/// Local ids are allocated monotonically, so key order is insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    records: BTreeMap<LocalId, CapturedRecord>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Get a record by local id.
    pub fn get(&self, id: LocalId) -> Option<&CapturedRecord> {
        self.records.get(&id)
    }

    fn get_mut(&mut self, id: LocalId) -> Option<&mut CapturedRecord> {
        self.records.get_mut(&id)
    }

    fn insert(&mut self, record: CapturedRecord) {
        self.records.insert(record.local_id, record);
    }

    fn remove(&mut self, id: LocalId) -> Option<CapturedRecord> {
        self.records.remove(&id)
    }

    /// All records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &CapturedRecord> {
        self.records.values()
    }

    /// Number of stored records (any state).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if collection holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The queue of captured records for every kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureStore {
    collections: BTreeMap<RecordKind, Collection>,
    next_local_id: LocalId,
    limits: StoreLimits,
}

impl CaptureStore {
    /// Create an empty store with default limits.
    pub fn new() -> Self {
        Self::with_limits(StoreLimits::default())
    }

    /// Create an empty store with the given limits.
    pub fn with_limits(limits: StoreLimits) -> Self {
        let collections = RecordKind::ALL
            .iter()
            .map(|kind| (*kind, Collection::new()))
            .collect();

        Self {
            collections,
            next_local_id: 1,
            limits,
        }
    }

    /// Get the configured limits.
    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// The id the next appended record will receive.
    pub fn next_local_id(&self) -> LocalId {
        self.next_local_id
    }

    /// Get the collection for a kind.
    pub fn collection(&self, kind: RecordKind) -> &Collection {
        // Every kind is created in `with_limits` and never removed
        &self.collections[&kind]
    }

    fn collection_mut(&mut self, kind: RecordKind) -> &mut Collection {
        self.collections.entry(kind).or_default()
    }

    /// Append a new record in `Pending` state.
    ///
    /// Fails with [`Error::StorageExhausted`] when the queue is full or the
    /// payload is larger than allowed; the store is left unchanged.
    pub fn append(
        &mut self,
        kind: RecordKind,
        payload: serde_json::Value,
        token: impl Into<IdempotencyToken>,
        captured_at: Timestamp,
    ) -> Result<LocalId> {
        if !payload.is_object() {
            return Err(Error::InvalidPayload("payload must be an object".into()));
        }

        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::InvalidPayload(
                "idempotency token must not be empty".into(),
            ));
        }

        if self.len() >= self.limits.max_records {
            return Err(Error::StorageExhausted(format!(
                "queue holds the maximum of {} records",
                self.limits.max_records
            )));
        }

        let size = serde_json::to_vec(&payload)
            .map_err(|e| Error::InvalidPayload(e.to_string()))?
            .len();
        if size > self.limits.max_payload_bytes {
            return Err(Error::StorageExhausted(format!(
                "payload of {} bytes exceeds the {} byte limit",
                size, self.limits.max_payload_bytes
            )));
        }

        let local_id = self.next_local_id;
        self.next_local_id += 1;
        self.collection_mut(kind)
            .insert(CapturedRecord::new(local_id, kind, token, payload, captured_at));

        Ok(local_id)
    }

    /// Get a record by kind and local id.
    pub fn get(&self, kind: RecordKind, id: LocalId) -> Option<&CapturedRecord> {
        self.collection(kind).get(id)
    }

    /// All records of a kind not yet confirmed persisted, in insertion order.
    pub fn list_pending(&self, kind: RecordKind) -> Vec<&CapturedRecord> {
        self.collection(kind)
            .records()
            .filter(|r| r.sync_state != SyncState::Synced)
            .collect()
    }

    /// Snapshot up to `limit` pending records of a kind for submission.
    ///
    /// The returned records are moved to `Submitting`; records appended after
    /// this call are not affected and belong to the next cycle.
    pub fn begin_submission(&mut self, kind: RecordKind, limit: usize) -> Vec<CapturedRecord> {
        let mut snapshot = Vec::new();
        for record in self.collection_mut(kind).records.values_mut() {
            if snapshot.len() >= limit {
                break;
            }
            if record.is_pending() {
                record.sync_state = SyncState::Submitting;
                snapshot.push(record.clone());
            }
        }
        snapshot
    }

    /// Remove records the server confirmed persisted.
    ///
    /// Idempotent: unknown ids are ignored. Returns how many were removed.
    pub fn mark_synced(&mut self, kind: RecordKind, ids: &[LocalId]) -> usize {
        let collection = self.collection_mut(kind);
        ids.iter().filter(|id| collection.remove(**id).is_some()).count()
    }

    /// Return records to `Pending` after a transient failure.
    ///
    /// Rejected records are left alone. Returns how many were reset.
    pub fn mark_failed(&mut self, kind: RecordKind, ids: &[LocalId], reason: &str) -> usize {
        let collection = self.collection_mut(kind);
        let mut reset = 0;
        for id in ids {
            if let Some(record) = collection.get_mut(*id) {
                if record.is_queued() {
                    record.sync_state = SyncState::Pending;
                    record.attempts += 1;
                    record.last_error = Some(reason.to_string());
                    reset += 1;
                }
            }
        }
        reset
    }

    /// Park a record the server rejected as malformed.
    ///
    /// The record stays stored but is excluded from automatic retry.
    /// Returns false if the record is unknown or already parked.
    pub fn mark_rejected(&mut self, kind: RecordKind, id: LocalId, reason: &str) -> bool {
        match self.collection_mut(kind).get_mut(id) {
            Some(record) if record.is_queued() => {
                record.sync_state = SyncState::Failed;
                record.attempts += 1;
                record.last_error = Some(reason.to_string());
                true
            }
            _ => false,
        }
    }

    /// Queue a rejected record again, optionally with a corrected payload.
    pub fn resubmit(
        &mut self,
        kind: RecordKind,
        id: LocalId,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let record = self.rejected_mut(kind, id)?;
        if let Some(payload) = payload {
            record.payload = payload;
        }
        record.sync_state = SyncState::Pending;
        record.last_error = None;
        Ok(())
    }

    /// Drop a rejected record at the user's request.
    ///
    /// Only records in `Failed` state can be discarded; anything still queued
    /// leaves the store exclusively through [`CaptureStore::mark_synced`].
    pub fn discard(&mut self, kind: RecordKind, id: LocalId) -> Result<CapturedRecord> {
        self.rejected_mut(kind, id)?;
        self.collection_mut(kind)
            .remove(id)
            .ok_or(Error::RecordNotFound { kind, local_id: id })
    }

    fn rejected_mut(&mut self, kind: RecordKind, id: LocalId) -> Result<&mut CapturedRecord> {
        let record = self
            .collection_mut(kind)
            .get_mut(id)
            .ok_or(Error::RecordNotFound { kind, local_id: id })?;
        if !record.is_rejected() {
            return Err(Error::NotRejected { kind, local_id: id });
        }
        Ok(record)
    }

    /// Records rejected by the server and waiting for the user.
    pub fn rejected(&self, kind: RecordKind) -> Vec<&CapturedRecord> {
        self.collection(kind)
            .records()
            .filter(|r| r.is_rejected())
            .collect()
    }

    /// Number of records of a kind waiting to be synced.
    pub fn queue_depth(&self, kind: RecordKind) -> usize {
        self.collection(kind).records().filter(|r| r.is_queued()).count()
    }

    /// Number of records of a kind the next cycle would pick up.
    pub fn pending_count(&self, kind: RecordKind) -> usize {
        self.collection(kind).records().filter(|r| r.is_pending()).count()
    }

    /// Number of records stored across all kinds (any state).
    pub fn len(&self) -> usize {
        self.collections.values().map(Collection::len).sum()
    }

    /// Check if the store holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return every `Submitting` record to `Pending`.
    ///
    /// Called on startup: a cycle abandoned mid-flight has no confirmation,
    /// so its records must be sent again.
    pub fn recover_interrupted(&mut self) -> usize {
        let mut recovered = 0;
        for collection in self.collections.values_mut() {
            for record in collection.records.values_mut() {
                if record.sync_state == SyncState::Submitting {
                    record.sync_state = SyncState::Pending;
                    recovered += 1;
                }
            }
        }
        recovered
    }

    /// Export the current store state as a snapshot.
    pub fn export_state(&self) -> crate::snapshot::StoreSnapshot {
        let mut snapshot = crate::snapshot::StoreSnapshot::new();
        snapshot.next_local_id = self.next_local_id;

        for collection in self.collections.values() {
            for record in collection.records() {
                snapshot.add_record(record.clone());
            }
        }

        snapshot
    }

    /// Import state from a snapshot, replacing the current contents.
    ///
    /// Records left `Submitting` by an interrupted cycle come back as
    /// `Pending`. Returns how many were recovered that way.
    pub fn import_state(&mut self, snapshot: crate::snapshot::StoreSnapshot) -> Result<usize> {
        snapshot.validate()?;

        for collection in self.collections.values_mut() {
            collection.records.clear();
        }

        let mut next_local_id = snapshot.next_local_id;
        for (kind, records) in snapshot.collections {
            let collection = self.collection_mut(kind);
            for record in records {
                next_local_id = next_local_id.max(record.local_id + 1);
                collection.insert(record);
            }
        }
        self.next_local_id = next_local_id;

        Ok(self.recover_interrupted())
    }
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::new()
    }
}
