//! The sync engine.
//!
//! Drains the local capture queue to the Remote Merge Service when the
//! device is online. A cycle moves through four phases:
//!
//! 1. **Draining**: snapshot up to `max_batch_size` pending records per kind
//! 2. **Submitting**: send them, bounded by `request_timeout`; a request the
//!    server refuses as too large is split in halves and the next batch
//!    shrinks accordingly
//! 3. **Reconciling**: match the answer by idempotency token and update the
//!    queue; only confirmed records are removed
//! 4. **Idle**
//!
//! At most one cycle runs at a time. Cycles start on an offline→online
//! edge, on an explicit [`SyncEngine::request_sync`], and once at startup
//! when already online.

use crate::capture::LocalCaptureStore;
use crate::config::ClientConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError};
use crate::persistence::FilePersistence;
use crate::transport::{HttpTransport, RemoteMerge};
use serde::{Deserialize, Serialize};
use serene_engine::{
    CapturedRecord, LocalId, PersistedRecord, ReconcileResult, RecordKind, Reconciler,
    SubmissionBatch, SyncItem, SyncRequest, SyncResponse, Timestamp, TOKEN_FIELD,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, Notify};

/// Phase of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Draining,
    Submitting,
    Reconciling,
}

/// Summary of one `sync_now` call (one or more cycles).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Number of request/response rounds
    pub cycles: usize,
    /// Records confirmed persisted and removed locally
    pub synced: usize,
    /// Records returned to the queue for a later attempt
    pub retried: usize,
    /// Records rejected as malformed
    pub rejected: usize,
    /// Last failure observed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the report was finalized (milliseconds since epoch)
    pub finished_at: Timestamp,
}

impl CycleReport {
    /// Whether the queue shrank.
    pub fn made_progress(&self) -> bool {
        self.synced > 0 || self.rejected > 0
    }

    /// Whether anything failed and was left for a later attempt.
    pub fn had_failures(&self) -> bool {
        self.retried > 0 || self.error.is_some()
    }

    fn absorb(&mut self, other: CycleReport) {
        self.cycles += other.cycles;
        self.synced += other.synced;
        self.retried += other.retried;
        self.rejected += other.rejected;
        if other.error.is_some() {
            self.error = other.error;
        }
    }
}

/// Notifications for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StatusChanged(SyncStatus),
    CycleFinished(CycleReport),
    /// The server refused a record; it waits for the user to fix or discard it
    RecordRejected {
        kind: RecordKind,
        local_id: LocalId,
        reason: String,
    },
}

/// Result of an immediate submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The server stored the record
    Synced(PersistedRecord),
    /// The record was queued locally for a later sync
    Queued(LocalId),
}

/// Tuning knobs of the engine.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub max_batch_size: usize,
    pub request_timeout: Duration,
}

impl From<&ClientConfig> for SyncSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            request_timeout: config.request_timeout,
        }
    }
}

/// Outcome of sending one drained batch, possibly in several requests.
#[derive(Debug, Default)]
struct Submission {
    result: ReconcileResult,
    error: Option<String>,
    /// The server refused a request as too large at least once
    split: bool,
}

/// Coordinates the capture queue, the connectivity signal and the remote.
pub struct SyncEngine {
    store: Arc<LocalCaptureStore>,
    remote: Arc<dyn RemoteMerge>,
    monitor: ConnectivityMonitor,
    settings: SyncSettings,
    /// Records per kind in the next batch; shrinks when the server refuses
    /// a request as too large
    batch_limit: AtomicUsize,
    cycle: Mutex<()>,
    wake: Notify,
    status: watch::Sender<SyncStatus>,
    last_outcome: watch::Sender<Option<CycleReport>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Create an engine from its parts.
    pub fn new(
        store: Arc<LocalCaptureStore>,
        remote: Arc<dyn RemoteMerge>,
        monitor: ConnectivityMonitor,
        settings: SyncSettings,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (last_outcome, _) = watch::channel(None);
        let (events, _) = broadcast::channel(64);

        Self {
            store,
            remote,
            monitor,
            batch_limit: AtomicUsize::new(settings.max_batch_size.max(1)),
            settings,
            cycle: Mutex::new(()),
            wake: Notify::new(),
            status,
            last_outcome,
            events,
        }
    }

    /// Open the durable queue in `config.data_dir` and talk HTTP to
    /// `config.endpoint`.
    pub async fn open(config: &ClientConfig, monitor: ConnectivityMonitor) -> Result<Self> {
        let persistence = Arc::new(FilePersistence::new(&config.data_dir));
        let store = LocalCaptureStore::open(persistence, config.limits).await?;
        let remote = HttpTransport::new(&config.endpoint, config.request_timeout)?;

        Ok(Self::new(
            Arc::new(store),
            Arc::new(remote),
            monitor,
            SyncSettings::from(config),
        ))
    }

    /// The underlying capture queue.
    pub fn store(&self) -> &Arc<LocalCaptureStore> {
        &self.store
    }

    /// Write a record to the server right away, or queue it if that is not
    /// possible.
    ///
    /// Offline, on transport failure or timeout the record is captured
    /// locally with the token it was sent with, so a request that did reach
    /// the server is deduplicated when the queue drains. A record the server
    /// rejects as malformed is returned as [`SyncError::RemoteValidation`]
    /// and not queued.
    pub async fn submit(&self, kind: RecordKind, payload: serde_json::Value) -> Result<SubmitOutcome> {
        let token = uuid::Uuid::new_v4().to_string();
        let captured_at = crate::capture::now_millis();

        if !self.monitor.is_online() {
            return self.queue(kind, payload, token, captured_at).await;
        }

        let mut fields = match &payload {
            serde_json::Value::Object(map) => map.clone(),
            _ => {
                return Err(SyncError::Engine(serene_engine::Error::InvalidPayload(
                    "payload must be an object".into(),
                )))
            }
        };
        fields.remove(TOKEN_FIELD);

        let mut request = SyncRequest::default();
        request.push(
            kind,
            SyncItem {
                idempotency_token: token.clone(),
                fields,
            },
        );

        let reason = match self.send(&request).await {
            Ok(response) => {
                if let Some(saved) = response
                    .saved(kind)
                    .iter()
                    .find(|r| r.idempotency_token == token)
                {
                    tracing::debug!(%kind, server_id = %saved.server_id, "record stored online");
                    return Ok(SubmitOutcome::Synced(saved.clone()));
                }
                if let Some(rejection) = response
                    .rejected(kind)
                    .iter()
                    .find(|r| r.idempotency_token.as_deref() == Some(token.as_str()))
                {
                    return Err(SyncError::RemoteValidation(rejection.reason.clone()));
                }
                response
                    .kind_error(kind)
                    .unwrap_or("no acknowledgement from server")
                    .to_string()
            }
            Err(e) => e.to_string(),
        };

        tracing::info!(%kind, %reason, "online write failed, queueing record");
        self.queue(kind, payload, token, captured_at).await
    }

    async fn queue(
        &self,
        kind: RecordKind,
        payload: serde_json::Value,
        token: String,
        captured_at: Timestamp,
    ) -> Result<SubmitOutcome> {
        let local_id = self
            .store
            .append_with_token(kind, payload, token, captured_at)
            .await?;
        Ok(SubmitOutcome::Queued(local_id))
    }

    /// Queue a record for the next sync cycle.
    pub async fn capture_offline(&self, kind: RecordKind, payload: serde_json::Value) -> Result<LocalId> {
        self.store.append(kind, payload).await
    }

    /// Number of records of a kind waiting to be synced.
    pub async fn queue_depth(&self, kind: RecordKind) -> usize {
        self.store.queue_depth(kind).await
    }

    /// Records of a kind the server rejected.
    pub async fn rejected(&self, kind: RecordKind) -> Vec<CapturedRecord> {
        self.store.rejected(kind).await
    }

    /// Queue a rejected record again and ask for a sync.
    pub async fn resubmit(
        &self,
        kind: RecordKind,
        local_id: LocalId,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        self.store.resubmit(kind, local_id, payload).await?;
        self.request_sync();
        Ok(())
    }

    /// Drop a rejected record for good.
    pub async fn discard_rejected(&self, kind: RecordKind, local_id: LocalId) -> Result<CapturedRecord> {
        self.store.discard(kind, local_id).await
    }

    /// Ask the running event loop for a sync cycle.
    pub fn request_sync(&self) {
        self.wake.notify_one();
    }

    /// Watch the current phase.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Report of the most recent `sync_now` that did any work.
    pub fn last_outcome(&self) -> Option<CycleReport> {
        self.last_outcome.borrow().clone()
    }

    /// Drain the queue now.
    ///
    /// Returns `None` without doing anything when offline or when another
    /// cycle is already in flight. Otherwise keeps cycling while every cycle
    /// makes progress without failures and records remain.
    pub async fn sync_now(&self) -> Option<CycleReport> {
        if !self.monitor.is_online() {
            tracing::debug!("offline, skipping sync");
            return None;
        }
        let Ok(_guard) = self.cycle.try_lock() else {
            tracing::debug!("sync already in progress");
            return None;
        };

        let mut report = CycleReport::default();
        loop {
            let cycle = self.run_cycle().await;
            let keep_going = cycle.made_progress() && !cycle.had_failures();
            report.absorb(cycle);

            if !keep_going || !self.monitor.is_online() || self.store.pending_total().await == 0 {
                break;
            }
        }
        report.finished_at = crate::capture::now_millis();

        if report.cycles > 0 {
            tracing::info!(
                cycles = report.cycles,
                synced = report.synced,
                retried = report.retried,
                rejected = report.rejected,
                "sync finished"
            );
            self.last_outcome.send_replace(Some(report.clone()));
            let _ = self.events.send(SyncEvent::CycleFinished(report.clone()));
        }

        Some(report)
    }

    async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        self.set_status(SyncStatus::Draining);
        let limit = self.batch_limit.load(Ordering::Relaxed);
        let batch = self.store.begin_batch(limit).await;
        if batch.is_empty() {
            self.set_status(SyncStatus::Idle);
            return report;
        }
        report.cycles = 1;

        self.set_status(SyncStatus::Submitting);
        let full = batch.largest_kind() >= limit;
        let submission = self.submit_batch(batch).await;
        report.error = submission.error;

        // Creep back towards the configured size after a clean full batch
        if full && !submission.split && report.error.is_none() {
            let grown = limit.saturating_mul(2).min(self.settings.max_batch_size);
            self.batch_limit.store(grown.max(1), Ordering::Relaxed);
        }

        self.set_status(SyncStatus::Reconciling);
        let result = submission.result;

        if let Err(e) = self.store.apply(&result).await {
            report.error = Some(e.to_string());
        }

        report.synced = result.synced_count();
        report.retried = result.retry_count();
        report.rejected = result.rejected_count();

        for (kind, outcome) in &result.kinds {
            if outcome.unexpected > 0 {
                tracing::warn!(%kind, count = outcome.unexpected, "server acknowledged unknown tokens");
            }
            for failure in &outcome.rejected {
                tracing::warn!(%kind, local_id = failure.local_id, reason = %failure.reason, "record rejected");
                let _ = self.events.send(SyncEvent::RecordRejected {
                    kind: *kind,
                    local_id: failure.local_id,
                    reason: failure.reason.clone(),
                });
            }
        }

        self.set_status(SyncStatus::Idle);
        report
    }

    /// Send a batch, splitting it while the server refuses it as too large.
    ///
    /// Halves go out in capture order. A single record the server still
    /// refuses is parked as rejected rather than retried forever. The first
    /// transport failure fails every half not yet sent.
    async fn submit_batch(&self, batch: SubmissionBatch) -> Submission {
        let mut submission = Submission::default();
        let mut queue = vec![batch];

        while let Some(batch) = queue.pop() {
            let request = batch.to_request();
            tracing::debug!(records = request.len(), "submitting batch");

            let reconciler = Reconciler::new(&batch);
            match self.send(&request).await {
                Ok(response) => submission.result.merge(reconciler.with_response(&response)),
                Err(e) if e.is_too_large() && batch.len() > 1 => {
                    let limit = (batch.largest_kind() / 2).max(1);
                    self.batch_limit.fetch_min(limit, Ordering::Relaxed);
                    tracing::info!(records = batch.len(), limit, "batch too large, splitting");
                    submission.split = true;

                    let (first, second) = batch.split();
                    queue.push(second);
                    queue.push(first);
                }
                Err(e) if e.is_too_large() => {
                    tracing::warn!(error = %e, "record too large for server");
                    let reason = format!("record too large for server: {e}");
                    submission.result.merge(reconciler.with_rejection(&reason));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "sync request failed");
                    let reason = e.to_string();
                    submission.result.merge(reconciler.with_failure(&reason));
                    for unsent in queue.drain(..) {
                        submission
                            .result
                            .merge(Reconciler::new(&unsent).with_failure(&reason));
                    }
                    submission.error = Some(reason);
                }
            }
        }

        submission
    }

    async fn send(&self, request: &SyncRequest) -> Result<SyncResponse> {
        tokio::time::timeout(self.settings.request_timeout, self.remote.submit(request))
            .await
            .unwrap_or_else(|_| Err(SyncError::NetworkUnavailable("request timed out".into())))
    }

    fn set_status(&self, status: SyncStatus) {
        let changed = self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
        if changed {
            let _ = self.events.send(SyncEvent::StatusChanged(status));
        }
    }

    /// Run the event loop until `shutdown` resolves.
    ///
    /// A cycle already in progress is finished before the loop exits.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut edges = self.monitor.online_edges();
        tokio::pin!(shutdown);

        if self.monitor.is_online() {
            self.sync_now().await;
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                edge = edges.next() => {
                    if edge.is_none() {
                        break;
                    }
                    tracing::debug!("online edge, starting sync");
                }
                _ = self.wake.notified() => {
                    tracing::debug!("sync requested");
                }
            }
            self.sync_now().await;
        }

        tracing::debug!("sync loop stopped");
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("settings", &self.settings)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}
