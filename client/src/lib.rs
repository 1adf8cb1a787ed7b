//! # Serene Client
//!
//! Offline-first capture and sync for Serene apps.
//!
//! Records captured while the device is offline go into a durable
//! [`LocalCaptureStore`]. The [`SyncEngine`] drains it to the Remote Merge
//! Service whenever the [`ConnectivityMonitor`] reports an offline→online
//! edge, when asked explicitly, and at startup. A record is removed locally
//! only after the server confirmed it persisted.
//!
//! ```no_run
//! use serene_client::{ClientConfig, ConnectivityMonitor, SyncEngine};
//! use serene_engine::RecordKind;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> serene_client::Result<()> {
//! let config = ClientConfig::from_env().unwrap_or_default();
//! let monitor = ConnectivityMonitor::new(false);
//! let engine = Arc::new(SyncEngine::open(&config, monitor.clone()).await?);
//!
//! let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
//! let worker = {
//!     let engine = engine.clone();
//!     tokio::spawn(async move { engine.run(async { let _ = stop_rx.await; }).await })
//! };
//!
//! engine
//!     .capture_offline(RecordKind::MoodLogs, json!({"mood": "calm", "intensity": 40}))
//!     .await?;
//!
//! // The platform reports connectivity; the queue drains in the background.
//! monitor.handle_online();
//!
//! let _ = stop_tx.send(());
//! let _ = worker.await;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod persistence;
pub mod sync;
pub mod transport;

pub use capture::LocalCaptureStore;
pub use config::{ClientConfig, ConfigError};
pub use connectivity::{ConnectivityMonitor, OnlineEdges};
pub use error::{Result, SyncError};
pub use persistence::{FilePersistence, MemoryPersistence, Persistence};
pub use sync::{CycleReport, SubmitOutcome, SyncEngine, SyncEvent, SyncSettings, SyncStatus};
pub use transport::{HttpTransport, RemoteMerge};
