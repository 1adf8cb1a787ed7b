//! Durable storage for the capture queue.
//!
//! The queue is persisted as a single [`StoreSnapshot`] document. Writes go
//! to a temporary file that is synced and then renamed over the previous
//! snapshot, so a crash leaves either the old or the new queue on disk.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serene_engine::StoreSnapshot;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Name of the snapshot file inside the data directory.
pub const QUEUE_FILE: &str = "queue.json";

/// Where the capture queue is stored between runs.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Load the last saved snapshot, if any.
    async fn load(&self) -> Result<Option<StoreSnapshot>>;

    /// Replace the saved snapshot.
    async fn save(&self, snapshot: &StoreSnapshot) -> Result<()>;
}

/// Snapshot stored as JSON in a data directory.
///
/// Every save rewrites the whole file, so the cost of a capture grows with
/// the queue; `StoreLimits::max_records` bounds it.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    /// Store the queue in `dir/queue.json`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(QUEUE_FILE),
        }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn load(&self) -> Result<Option<StoreSnapshot>> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot = StoreSnapshot::from_json(&json)?;
        tracing::debug!(
            path = %self.path.display(),
            records = snapshot.record_count(),
            "loaded capture queue"
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let json = snapshot.to_json()?;

        tokio::fs::create_dir_all(self.dir()).await?;

        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp).await?;
        if let Err(e) = write_all_synced(&mut file, json.as_bytes()).await {
            drop(file);
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
        drop(file);

        tokio::fs::rename(&temp, &self.path).await?;
        sync_dir(self.dir()).await
    }
}

/// Flush a directory entry so a completed rename survives a crash.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

async fn write_all_synced(file: &mut tokio::fs::File, bytes: &[u8]) -> Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Snapshot kept in memory only; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<Option<StoreSnapshot>>,
    fail_writes: Mutex<Option<String>>,
}

impl MemoryPersistence {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot.
    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            fail_writes: Mutex::new(None),
        }
    }

    /// Make every following `save` fail with a quota error, or succeed again
    /// with `None`.
    pub async fn set_quota_exceeded(&self, message: Option<&str>) {
        *self.fail_writes.lock().await = message.map(str::to_string);
    }

    /// The currently saved snapshot.
    pub async fn current(&self) -> Option<StoreSnapshot> {
        self.snapshot.lock().await.clone()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<StoreSnapshot>> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        if let Some(message) = self.fail_writes.lock().await.clone() {
            return Err(SyncError::StorageExhausted(message));
        }
        *self.snapshot.lock().await = Some(snapshot.clone());
        Ok(())
    }
}
