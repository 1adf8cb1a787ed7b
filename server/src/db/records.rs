//! Persistence of accepted records, one table per kind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serene_engine::{PersistedRecord, RecordKind};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// A validated record ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub idempotency_token: String,
    pub payload: serde_json::Value,
}

/// Storage failures, split by how far they reach.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// The store cannot be reached at all; nothing in the batch can succeed.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// This write failed; other kinds may still succeed.
    #[error("storage write failed: {0}")]
    Failed(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed => RepositoryError::Unavailable(err.to_string()),
            other => RepositoryError::Failed(other.to_string()),
        }
    }
}

/// Durable storage for accepted records.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Store records of one kind, ignoring tokens already stored.
    ///
    /// Returns one persisted record per input, in input order; a token that
    /// was stored before yields the originally persisted row.
    async fn persist(
        &self,
        kind: RecordKind,
        records: Vec<NewRecord>,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<PersistedRecord>, RepositoryError>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Table holding a kind.
pub fn table_name(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::MoodLogs => "mood_logs",
        RecordKind::Appointments => "appointments",
    }
}

/// A stored row from one of the record tables.
#[derive(Debug)]
pub struct StoredRecord {
    pub server_id: Uuid,
    pub idempotency_token: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            server_id: row.try_get("server_id")?,
            idempotency_token: row.try_get("idempotency_token")?,
            payload: row.try_get("payload")?,
            received_at: row.try_get("received_at")?,
        })
    }
}

impl StoredRecord {
    /// Convert a database row to the wire form.
    pub fn to_persisted(&self) -> PersistedRecord {
        PersistedRecord {
            server_id: self.server_id.to_string(),
            idempotency_token: self.idempotency_token.clone(),
            payload: self.payload.clone(),
            received_at: self.received_at.timestamp_millis().max(0) as u64,
        }
    }
}

/// PostgreSQL-backed repository.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordRepository for PgRepository {
    async fn persist(
        &self,
        kind: RecordKind,
        records: Vec<NewRecord>,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<PersistedRecord>, RepositoryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let table = table_name(kind);
        let server_ids: Vec<Uuid> = records.iter().map(|_| Uuid::new_v4()).collect();
        let tokens: Vec<String> = records
            .iter()
            .map(|r| r.idempotency_token.clone())
            .collect();
        let payloads: Vec<serde_json::Value> = records.into_iter().map(|r| r.payload).collect();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO {table} (server_id, idempotency_token, payload, received_at)
            SELECT t.server_id, t.idempotency_token, t.payload, $4
            FROM UNNEST($1::uuid[], $2::text[], $3::jsonb[])
                AS t(server_id, idempotency_token, payload)
            ON CONFLICT (idempotency_token) DO NOTHING
            "#
        ))
        .bind(&server_ids)
        .bind(&tokens)
        .bind(&payloads)
        .bind(received_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let rows = sqlx::query_as::<_, StoredRecord>(&format!(
            r#"
            SELECT server_id, idempotency_token, payload, received_at
            FROM {table}
            WHERE idempotency_token = ANY($1)
            "#
        ))
        .bind(&tokens)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let by_token: HashMap<&str, &StoredRecord> = rows
            .iter()
            .map(|row| (row.idempotency_token.as_str(), row))
            .collect();

        let persisted = tokens
            .iter()
            .map(|token| {
                by_token
                    .get(token.as_str())
                    .map(|row| row.to_persisted())
                    .ok_or_else(|| {
                        RepositoryError::Failed(format!("stored row for token {token} not found"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            %kind,
            submitted = tokens.len(),
            inserted,
            duplicates = tokens.len() as u64 - inserted,
            "persisted records"
        );

        Ok(persisted)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
