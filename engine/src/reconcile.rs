//! Reconciliation of a submitted batch with the server's answer.
//!
//! This is where the "never lose, never assume" rule lives. A sync cycle
//! snapshots the records it sends into a [`SubmissionBatch`]; once the
//! request finished (or failed) the [`Reconciler`] decides per record:
//!
//! 1. Token listed in the kind's saved records → synced, remove locally
//! 2. Token listed in the kind's rejections → parked for the user
//! 3. Anything else (kind failed, token missing, transport error) → retry
//!
//! Only records in the batch are ever touched, so records captured while
//! the request was in flight are unaffected.

use crate::{
    CaptureStore, IdempotencyToken, LocalId, RecordKind, SyncItem, SyncRequest, SyncResponse,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A record included in an in-flight batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedRecord {
    /// Local id to reconcile against
    pub local_id: LocalId,
    /// Wire form sent to the server
    pub item: SyncItem,
}

impl SubmittedRecord {
    /// Token the record was sent with.
    pub fn token(&self) -> &IdempotencyToken {
        &self.item.idempotency_token
    }
}

/// The exact set of records one sync cycle submits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionBatch {
    kinds: BTreeMap<RecordKind, Vec<SubmittedRecord>>,
}

impl SubmissionBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move up to `limit` pending records per kind into `Submitting` and
    /// capture them as a batch.
    pub fn from_store(store: &mut CaptureStore, limit: usize) -> Self {
        let mut batch = Self::new();
        for kind in RecordKind::ALL {
            for record in store.begin_submission(kind, limit) {
                batch.push(
                    kind,
                    SubmittedRecord {
                        local_id: record.local_id,
                        item: SyncItem::from_record(&record),
                    },
                );
            }
        }
        batch
    }

    /// Add a record to the batch.
    pub fn push(&mut self, kind: RecordKind, record: SubmittedRecord) {
        self.kinds.entry(kind).or_default().push(record);
    }

    /// Records submitted for a kind, in capture order.
    pub fn records(&self, kind: RecordKind) -> &[SubmittedRecord] {
        self.kinds.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Local ids submitted for a kind.
    pub fn local_ids(&self, kind: RecordKind) -> Vec<LocalId> {
        self.records(kind).iter().map(|r| r.local_id).collect()
    }

    /// Total number of records in the batch.
    pub fn len(&self) -> usize {
        self.kinds.values().map(Vec::len).sum()
    }

    /// Check if the batch has nothing to send.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest number of records submitted for a single kind.
    pub fn largest_kind(&self) -> usize {
        self.kinds.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Split into two batches of roughly equal size, keeping capture order.
    ///
    /// The first half gets the extra record when the length is odd. A batch
    /// with a single record yields that batch and an empty one.
    pub fn split(self) -> (Self, Self) {
        let half = self.len().div_ceil(2);
        let mut first = Self::new();
        let mut second = Self::new();
        let mut taken = 0;

        for (kind, records) in self.kinds {
            for record in records {
                if taken < half {
                    first.push(kind, record);
                } else {
                    second.push(kind, record);
                }
                taken += 1;
            }
        }
        (first, second)
    }

    /// Build the request body for this batch.
    pub fn to_request(&self) -> SyncRequest {
        let mut request = SyncRequest::default();
        for (kind, records) in &self.kinds {
            for record in records {
                request.push(*kind, record.item.clone());
            }
        }
        request
    }
}

/// A record that did not make it, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub local_id: LocalId,
    pub reason: String,
}

/// Reconciliation outcome for one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindOutcome {
    /// Confirmed persisted; safe to remove locally
    pub synced: Vec<LocalId>,
    /// Not confirmed; back to pending for the next cycle
    pub retry: Vec<RecordFailure>,
    /// Rejected as malformed; surfaced to the user
    pub rejected: Vec<RecordFailure>,
    /// Saved entries whose token was not part of the batch
    pub unexpected: usize,
}

/// Result of reconciling one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub kinds: BTreeMap<RecordKind, KindOutcome>,
}

impl ReconcileResult {
    /// Outcome for a kind (empty if the kind was not submitted).
    pub fn outcome(&self, kind: RecordKind) -> KindOutcome {
        self.kinds.get(&kind).cloned().unwrap_or_default()
    }

    /// Local ids confirmed persisted for a kind.
    pub fn synced_ids(&self, kind: RecordKind) -> Vec<LocalId> {
        self.kinds
            .get(&kind)
            .map(|o| o.synced.clone())
            .unwrap_or_default()
    }

    /// Local ids that go back to pending for a kind.
    pub fn retry_ids(&self, kind: RecordKind) -> Vec<LocalId> {
        self.kinds
            .get(&kind)
            .map(|o| o.retry.iter().map(|f| f.local_id).collect())
            .unwrap_or_default()
    }

    /// Number of synced records across kinds.
    pub fn synced_count(&self) -> usize {
        self.kinds.values().map(|o| o.synced.len()).sum()
    }

    /// Number of records to retry across kinds.
    pub fn retry_count(&self) -> usize {
        self.kinds.values().map(|o| o.retry.len()).sum()
    }

    /// Number of rejected records across kinds.
    pub fn rejected_count(&self) -> usize {
        self.kinds.values().map(|o| o.rejected.len()).sum()
    }

    /// Fold the outcome of another batch into this one.
    pub fn merge(&mut self, other: ReconcileResult) {
        for (kind, outcome) in other.kinds {
            let target = self.kinds.entry(kind).or_default();
            target.synced.extend(outcome.synced);
            target.retry.extend(outcome.retry);
            target.rejected.extend(outcome.rejected);
            target.unexpected += outcome.unexpected;
        }
    }

    /// Whether every submitted record was synced.
    pub fn is_clean(&self) -> bool {
        self.retry_count() == 0 && self.rejected_count() == 0
    }

    /// Apply the outcome to the store.
    ///
    /// Synced records are removed, retries return to `Pending` and rejected
    /// records move to `Failed`. Applying the same result twice is harmless.
    pub fn apply(&self, store: &mut CaptureStore) {
        for (kind, outcome) in &self.kinds {
            store.mark_synced(*kind, &outcome.synced);
            for failure in &outcome.retry {
                store.mark_failed(*kind, &[failure.local_id], &failure.reason);
            }
            for failure in &outcome.rejected {
                store.mark_rejected(*kind, failure.local_id, &failure.reason);
            }
        }
    }
}

/// Matches a submitted batch against the server's answer.
#[derive(Debug)]
pub struct Reconciler<'a> {
    batch: &'a SubmissionBatch,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler for a batch.
    pub fn new(batch: &'a SubmissionBatch) -> Self {
        Self { batch }
    }

    /// The request never produced a usable answer: every record is retried.
    pub fn with_failure(&self, reason: &str) -> ReconcileResult {
        let mut result = ReconcileResult::default();
        for (kind, records) in &self.batch.kinds {
            let outcome = result.kinds.entry(*kind).or_default();
            outcome.retry = records
                .iter()
                .map(|r| RecordFailure {
                    local_id: r.local_id,
                    reason: reason.to_string(),
                })
                .collect();
        }
        result
    }

    /// The server refused the batch as a whole and will refuse it again:
    /// every record is parked for the user.
    pub fn with_rejection(&self, reason: &str) -> ReconcileResult {
        let mut result = ReconcileResult::default();
        for (kind, records) in &self.batch.kinds {
            let outcome = result.kinds.entry(*kind).or_default();
            outcome.rejected = records
                .iter()
                .map(|r| RecordFailure {
                    local_id: r.local_id,
                    reason: reason.to_string(),
                })
                .collect();
        }
        result
    }

    /// Reconcile each kind independently against the response.
    pub fn with_response(&self, response: &SyncResponse) -> ReconcileResult {
        let mut result = ReconcileResult::default();
        for (kind, records) in &self.batch.kinds {
            result
                .kinds
                .insert(*kind, reconcile_kind(*kind, records, response));
        }
        result
    }
}

fn reconcile_kind(
    kind: RecordKind,
    records: &[SubmittedRecord],
    response: &SyncResponse,
) -> KindOutcome {
    let mut outcome = KindOutcome::default();

    let saved: HashSet<&str> = response
        .saved(kind)
        .iter()
        .map(|r| r.idempotency_token.as_str())
        .collect();
    let rejected: HashMap<&str, &str> = response
        .rejected(kind)
        .iter()
        .filter_map(|r| {
            r.idempotency_token
                .as_deref()
                .map(|token| (token, r.reason.as_str()))
        })
        .collect();
    let kind_error = response.kind_error(kind);

    let submitted: HashSet<&str> = records.iter().map(|r| r.token().as_str()).collect();
    outcome.unexpected = saved.difference(&submitted).count();

    for record in records {
        let token = record.token().as_str();
        if saved.contains(token) {
            outcome.synced.push(record.local_id);
        } else if let Some(reason) = rejected.get(token) {
            outcome.rejected.push(RecordFailure {
                local_id: record.local_id,
                reason: reason.to_string(),
            });
        } else {
            let reason = match kind_error {
                Some(err) => format!("{kind} not stored: {err}"),
                None => "no acknowledgement from server".to_string(),
            };
            outcome.retry.push(RecordFailure {
                local_id: record.local_id,
                reason,
            });
        }
    }

    outcome
}
