//! Snapshot types for persisting and restoring the capture queue.
//!
//! Snapshots are the bridge between the in-memory [`CaptureStore`] and the
//! device's durable storage. They serialize deterministically so the same
//! queue always produces the same bytes.
//!
//! [`CaptureStore`]: crate::CaptureStore

use crate::{error::Result, CapturedRecord, Error, LocalId, RecordKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the capture queue.
///
/// Uses BTreeMap and id-sorted vectors for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Next local id to hand out, so ids are never reused across restarts
    pub next_local_id: LocalId,
    /// Records organized by kind, in insertion order
    pub collections: BTreeMap<RecordKind, Vec<CapturedRecord>>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            next_local_id: 1,
            collections: BTreeMap::new(),
        }
    }

    /// Add a record to the snapshot, keeping its collection ordered by id.
    pub fn add_record(&mut self, record: CapturedRecord) {
        let records = self.collections.entry(record.kind).or_default();
        let pos = records.partition_point(|r| r.local_id < record.local_id);
        records.insert(pos, record);
    }

    /// Get a record from the snapshot.
    pub fn get_record(&self, kind: RecordKind, id: LocalId) -> Option<&CapturedRecord> {
        self.collections
            .get(&kind)?
            .iter()
            .find(|r| r.local_id == id)
    }

    /// Count total records across all kinds.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Count records still waiting to be synced.
    pub fn queued_count(&self) -> usize {
        self.collections
            .values()
            .flatten()
            .filter(|r| r.is_queued())
            .count()
    }

    /// Check the snapshot is internally consistent.
    pub fn validate(&self) -> Result<()> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        let mut seen = HashSet::new();
        for (kind, records) in &self.collections {
            for record in records {
                if record.kind != *kind {
                    return Err(Error::InvalidSnapshot(format!(
                        "record {} of kind {} stored under {}",
                        record.local_id, record.kind, kind
                    )));
                }
                if !seen.insert(record.local_id) {
                    return Err(Error::InvalidSnapshot(format!(
                        "duplicate local id {}",
                        record.local_id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        snapshot.validate()?;

        Ok(snapshot)
    }
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
