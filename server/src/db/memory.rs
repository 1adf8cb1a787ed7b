//! In-memory repository for handler tests.

use super::{NewRecord, RecordRepository, RepositoryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serene_engine::{PersistedRecord, RecordKind};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryRepository {
    rows: Mutex<BTreeMap<(RecordKind, String), PersistedRecord>>,
    failures: Mutex<HashMap<RecordKind, RepositoryError>>,
    next_id: Mutex<u64>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes of `kind` fail with `error` from now on.
    pub async fn fail_kind(&self, kind: RecordKind, error: RepositoryError) {
        self.failures.lock().await.insert(kind, error);
    }

    pub async fn count(&self, kind: RecordKind) -> usize {
        self.rows
            .lock()
            .await
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub async fn get(&self, kind: RecordKind, token: &str) -> Option<PersistedRecord> {
        self.rows
            .lock()
            .await
            .get(&(kind, token.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn persist(
        &self,
        kind: RecordKind,
        records: Vec<NewRecord>,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<PersistedRecord>, RepositoryError> {
        if let Some(error) = self.failures.lock().await.get(&kind) {
            return Err(error.clone());
        }

        let mut rows = self.rows.lock().await;
        let mut next_id = self.next_id.lock().await;
        let mut persisted = Vec::with_capacity(records.len());

        for record in records {
            let row = rows
                .entry((kind, record.idempotency_token.clone()))
                .or_insert_with(|| {
                    *next_id += 1;
                    PersistedRecord {
                        server_id: format!("mem-{}", *next_id),
                        idempotency_token: record.idempotency_token,
                        payload: record.payload,
                        received_at: received_at.timestamp_millis() as u64,
                    }
                });
            persisted.push(row.clone());
        }

        Ok(persisted)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        match self.failures.lock().await.values().next() {
            Some(RepositoryError::Unavailable(msg)) => Err(RepositoryError::Unavailable(msg.clone())),
            _ => Ok(()),
        }
    }
}
