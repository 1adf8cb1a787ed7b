//! In-process stand-in for the Remote Merge Service.
//!
//! Validates with the same schemas, deduplicates by token and can be told
//! to misbehave in the ways a real network and server do.

#![allow(dead_code)]

use async_trait::async_trait;
use serene_client::{
    ClientConfig, ConnectivityMonitor, LocalCaptureStore, MemoryPersistence, RemoteMerge,
    SyncEngine, SyncError, SyncSettings,
};
use serene_engine::{
    PersistedRecord, RecordKind, Rejection, Schema, StoreLimits, SyncRequest, SyncResponse,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Healthy,
    /// Connection refused before anything reaches the server
    Unreachable,
    /// Server up, database down
    Outage,
    /// One kind fails to persist, the other succeeds
    KindDown(RecordKind),
    /// Answer only after a delay
    Slow(Duration),
    /// Persist everything, then lose the response
    CommitThenDrop,
    /// Persist everything but leave one kind out of the response
    OmitAcks(RecordKind),
    /// Refuse with 413 any request carrying more records than this
    MaxRecords(usize),
    /// Refuse with 413 any request whose JSON body is longer than this
    MaxBytes(usize),
}

pub struct FakeRemote {
    schema: Schema,
    mode: Mutex<Mode>,
    stored: Mutex<BTreeMap<(RecordKind, String), PersistedRecord>>,
    requests: Mutex<Vec<SyncRequest>>,
    next_id: AtomicU64,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            schema: Schema::wellness(),
            mode: Mutex::new(Mode::Healthy),
            stored: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn stored_count(&self, kind: RecordKind) -> usize {
        self.stored
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn stored(&self, kind: RecordKind) -> Vec<PersistedRecord> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn persist(&self, kind: RecordKind, token: &str, payload: serde_json::Value) -> PersistedRecord {
        let mut stored = self.stored.lock().unwrap();
        stored
            .entry((kind, token.to_string()))
            .or_insert_with(|| PersistedRecord {
                server_id: format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
                idempotency_token: token.to_string(),
                payload,
                received_at: 42,
            })
            .clone()
    }
}

#[async_trait]
impl RemoteMerge for FakeRemote {
    async fn submit(&self, request: &SyncRequest) -> serene_client::Result<SyncResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let mode = self.mode.lock().unwrap().clone();

        match &mode {
            Mode::Unreachable => {
                return Err(SyncError::NetworkUnavailable("connection refused".into()))
            }
            Mode::Outage => return Err(SyncError::RemoteOutage("database unavailable".into())),
            Mode::Slow(delay) => tokio::time::sleep(*delay).await,
            Mode::MaxRecords(max) if request.len() > *max => {
                return Err(too_large(format!("{} records submitted", request.len())));
            }
            Mode::MaxBytes(max) => {
                let size = serde_json::to_vec(request).map(|b| b.len()).unwrap_or(0);
                if size > *max {
                    return Err(too_large(format!("{size} bytes submitted")));
                }
            }
            _ => {}
        }

        let mut response = SyncResponse::default();
        for kind in RecordKind::ALL {
            if mode == Mode::KindDown(kind) {
                response.set_kind_error(kind, "storage error");
                continue;
            }

            let mut saved = Vec::new();
            for item in request.items(kind) {
                let payload = item.payload();
                if let Err(e) = self.schema.validate(kind, &payload) {
                    response.push_rejected(
                        kind,
                        Rejection::new(Some(item.idempotency_token.clone()), e.to_string()),
                    );
                    continue;
                }
                saved.push(self.persist(kind, &item.idempotency_token, payload));
            }

            if mode != Mode::OmitAcks(kind) {
                response.extend_saved(kind, saved);
            }
        }

        if mode == Mode::CommitThenDrop {
            return Err(SyncError::NetworkUnavailable("connection reset".into()));
        }

        Ok(response.finish())
    }
}

fn too_large(message: String) -> SyncError {
    SyncError::RemoteRejected {
        status: 413,
        message,
    }
}

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub remote: Arc<FakeRemote>,
    pub monitor: ConnectivityMonitor,
    pub persistence: Arc<MemoryPersistence>,
}

pub const TEST_TIMEOUT: Duration = Duration::from_millis(150);

pub async fn harness(online: bool) -> Harness {
    harness_with_limits(online, StoreLimits::default()).await
}

pub async fn harness_with_limits(online: bool, limits: StoreLimits) -> Harness {
    let remote = FakeRemote::new();
    let persistence = Arc::new(MemoryPersistence::new());
    let store = LocalCaptureStore::open(persistence.clone(), limits)
        .await
        .unwrap();
    let monitor = ConnectivityMonitor::new(online);

    let settings = SyncSettings {
        request_timeout: TEST_TIMEOUT,
        ..SyncSettings::from(&ClientConfig::default())
    };
    let engine = SyncEngine::new(Arc::new(store), remote.clone(), monitor.clone(), settings);

    Harness {
        engine: Arc::new(engine),
        remote,
        monitor,
        persistence,
    }
}
