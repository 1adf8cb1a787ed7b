//! Durable local capture store.
//!
//! Wraps the engine's [`CaptureStore`] and writes every mutation through to
//! a [`Persistence`] backend. An append is acknowledged to the caller only
//! after the queue containing it was saved.

use crate::error::{Result, SyncError};
use crate::persistence::Persistence;
use serene_engine::{
    CaptureStore, CapturedRecord, LocalId, ReconcileResult, RecordKind, StoreLimits,
    StoreSnapshot, SubmissionBatch, Timestamp,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The capture queue, persisted on every change.
pub struct LocalCaptureStore {
    inner: Mutex<CaptureStore>,
    persistence: Arc<dyn Persistence>,
}

impl LocalCaptureStore {
    /// Open the queue, restoring whatever was saved by a previous run.
    ///
    /// Records a previous run left mid-submission are queued again.
    pub async fn open(persistence: Arc<dyn Persistence>, limits: StoreLimits) -> Result<Self> {
        let mut store = CaptureStore::with_limits(limits);

        if let Some(snapshot) = persistence.load().await? {
            let recovered = store.import_state(snapshot)?;
            tracing::info!(
                records = store.len(),
                recovered,
                "restored capture queue"
            );
            if recovered > 0 {
                persistence.save(&store.export_state()).await?;
            }
        }

        Ok(Self {
            inner: Mutex::new(store),
            persistence,
        })
    }

    /// Capture a record with a fresh idempotency token.
    ///
    /// Returns [`SyncError::StorageExhausted`] when the record cannot be
    /// stored durably; the queue is then left exactly as it was.
    pub async fn append(&self, kind: RecordKind, payload: serde_json::Value) -> Result<LocalId> {
        let token = uuid::Uuid::new_v4().to_string();
        self.append_with_token(kind, payload, token, now_millis())
            .await
    }

    /// Capture a record with a caller-provided token and timestamp.
    pub async fn append_with_token(
        &self,
        kind: RecordKind,
        payload: serde_json::Value,
        token: String,
        captured_at: Timestamp,
    ) -> Result<LocalId> {
        let mut store = self.inner.lock().await;
        let before = store.clone();

        let local_id = store.append(kind, payload, token, captured_at)?;

        if let Err(e) = self.persistence.save(&store.export_state()).await {
            *store = before;
            tracing::warn!(%kind, error = %e, "capture not persisted, rolled back");
            return Err(e);
        }

        tracing::debug!(%kind, local_id, "captured record");
        Ok(local_id)
    }

    /// Move pending records into an in-flight batch.
    ///
    /// Only one batch may be in flight. Records still `Submitting` from a
    /// batch that was abandoned (its future dropped before reconciliation)
    /// are picked up again.
    pub async fn begin_batch(&self, limit: usize) -> SubmissionBatch {
        let mut store = self.inner.lock().await;
        let orphaned = store.recover_interrupted();
        if orphaned > 0 {
            tracing::warn!(orphaned, "requeued records from an abandoned batch");
        }
        SubmissionBatch::from_store(&mut store, limit)
    }

    /// Apply a reconciliation outcome and persist the result.
    pub async fn apply(&self, result: &ReconcileResult) -> Result<()> {
        let mut store = self.inner.lock().await;
        result.apply(&mut store);
        self.persist(&store).await
    }

    /// Queue a rejected record again, optionally with a corrected payload.
    pub async fn resubmit(
        &self,
        kind: RecordKind,
        local_id: LocalId,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut store = self.inner.lock().await;
        store.resubmit(kind, local_id, payload)?;
        self.persist(&store).await
    }

    /// Remove a rejected record at the user's request.
    pub async fn discard(&self, kind: RecordKind, local_id: LocalId) -> Result<CapturedRecord> {
        let mut store = self.inner.lock().await;
        let record = store.discard(kind, local_id)?;
        self.persist(&store).await?;
        tracing::info!(%kind, local_id, "discarded rejected record");
        Ok(record)
    }

    /// Get a record by kind and local id.
    pub async fn get(&self, kind: RecordKind, local_id: LocalId) -> Option<CapturedRecord> {
        self.inner.lock().await.get(kind, local_id).cloned()
    }

    /// Records of a kind not yet confirmed persisted, in capture order.
    pub async fn list_pending(&self, kind: RecordKind) -> Vec<CapturedRecord> {
        self.inner
            .lock()
            .await
            .list_pending(kind)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Records of a kind the server rejected.
    pub async fn rejected(&self, kind: RecordKind) -> Vec<CapturedRecord> {
        self.inner
            .lock()
            .await
            .rejected(kind)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Number of records of a kind waiting to be synced.
    pub async fn queue_depth(&self, kind: RecordKind) -> usize {
        self.inner.lock().await.queue_depth(kind)
    }

    /// Number of records the next cycle would pick up, across kinds.
    pub async fn pending_total(&self) -> usize {
        let store = self.inner.lock().await;
        RecordKind::ALL
            .iter()
            .map(|kind| store.pending_count(*kind))
            .sum()
    }

    /// Current queue contents.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.inner.lock().await.export_state()
    }

    async fn persist(&self, store: &CaptureStore) -> Result<()> {
        self.persistence
            .save(&store.export_state())
            .await
            .inspect_err(|e| tracing::error!(error = %e, "failed to persist capture queue"))
    }
}

impl std::fmt::Debug for LocalCaptureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCaptureStore").finish_non_exhaustive()
    }
}

/// Current time in milliseconds since the epoch.
pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
