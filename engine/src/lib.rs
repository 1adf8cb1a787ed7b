//! # Serene Engine
//!
//! The deterministic core of Serene's offline-first capture and sync path.
//!
//! Mood logs and appointment requests captured while the device is offline
//! are queued here until the Remote Merge Service confirms that it persisted
//! them. This crate owns the record model, the queue state machine, the
//! snapshot format used to make the queue durable, the wire protocol spoken
//! with the server and the reconciliation rules applied to its answers.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about files, sockets or clocks.
//!   Timestamps and idempotency tokens are passed in by the caller.
//! - **Deterministic**: the same sequence of calls produces the same state.
//! - **Conservative**: a record leaves the queue only after the server
//!   reported it persisted. Anything ambiguous is treated as a failure.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`CapturedRecord`] carries the domain payload, the client-generated
//! idempotency token, the capture time and a [`SyncState`]. Its
//! [`LocalId`] is assigned by the store and never leaves the device.
//!
//! ### Capture store
//!
//! The [`CaptureStore`] keeps one insertion-ordered collection per
//! [`RecordKind`]. A sync cycle calls [`CaptureStore::begin_submission`]
//! which snapshots exactly the records it will send; records appended while
//! the cycle is in flight are not part of it and cannot be lost by it.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] matches the submitted snapshot against the
//! server's [`SyncResponse`] by idempotency token and decides, per record,
//! whether it is synced, must be retried, or was rejected as malformed.
//!
//! ## Quick Start
//!
//! ```rust
//! use serene_engine::{
//!     CaptureStore, RecordKind, Reconciler, SubmissionBatch, SyncResponse, PersistedRecord,
//! };
//! use serde_json::json;
//!
//! let mut store = CaptureStore::new();
//! let local_id = store
//!     .append(RecordKind::MoodLogs, json!({"mood": "good", "intensity": 70}), "tok-1", 1_000)
//!     .unwrap();
//! assert_eq!(store.queue_depth(RecordKind::MoodLogs), 1);
//!
//! // A sync cycle snapshots the pending records...
//! let batch = SubmissionBatch::from_store(&mut store, usize::MAX);
//! let request = batch.to_request();
//! assert_eq!(request.mood_logs.len(), 1);
//!
//! // ...and reconciles them against the server's answer.
//! let response = SyncResponse {
//!     success: true,
//!     saved_moods: vec![PersistedRecord {
//!         server_id: "srv-1".into(),
//!         idempotency_token: "tok-1".into(),
//!         payload: json!({"mood": "good", "intensity": 70}),
//!         received_at: 2_000,
//!     }],
//!     ..Default::default()
//! };
//! let result = Reconciler::new(&batch).with_response(&response);
//! result.apply(&mut store);
//!
//! assert_eq!(result.synced_ids(RecordKind::MoodLogs), vec![local_id]);
//! assert_eq!(store.queue_depth(RecordKind::MoodLogs), 0);
//! ```
//!
//! ## Persistence
//!
//! Use [`CaptureStore::export_state`] and [`CaptureStore::import_state`] with
//! [`StoreSnapshot`]. Snapshots serialize to JSON with deterministic ordering.

pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use error::Error;
pub use protocol::{Rejection, SyncItem, SyncRequest, SyncResponse, SYNC_PATH, TOKEN_FIELD};
pub use reconcile::{
    KindOutcome, ReconcileResult, Reconciler, RecordFailure, SubmissionBatch, SubmittedRecord,
};
pub use record::{CapturedRecord, PersistedRecord, RecordKind, SyncState};
pub use schema::{FieldDef, FieldType, KindSchema, Schema};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{CaptureStore, StoreLimits};

/// Type aliases for clarity
pub type LocalId = u64;
pub type IdempotencyToken = String;
pub type ServerId = String;
pub type Timestamp = u64;
