//! Wire types for `POST /api/sync`.
//!
//! Shared by the client transport and the server handler so both sides agree
//! on field names. Every array element carries the record's domain fields
//! flattened next to its idempotency token; the client's local id is never
//! part of the request.

use crate::{CapturedRecord, IdempotencyToken, PersistedRecord, RecordKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Path of the merge endpoint.
pub const SYNC_PATH: &str = "/api/sync";

/// Name of the token field inside a submitted element.
pub const TOKEN_FIELD: &str = "idempotencyToken";

/// One submitted record: domain fields plus its idempotency token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    /// Deduplication token
    pub idempotency_token: IdempotencyToken,
    /// Domain fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl SyncItem {
    /// Build the wire form of a captured record.
    pub fn from_record(record: &CapturedRecord) -> Self {
        let mut fields = record.payload.as_object().cloned().unwrap_or_default();
        fields.remove(TOKEN_FIELD);

        Self {
            idempotency_token: record.token.clone(),
            fields,
        }
    }

    /// The domain fields as a JSON object.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::Value::Object(self.fields.clone())
    }
}

/// Request body: zero or more records per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub mood_logs: Vec<SyncItem>,
    #[serde(default)]
    pub appointments: Vec<SyncItem>,
}

impl SyncRequest {
    /// Items submitted for a kind.
    pub fn items(&self, kind: RecordKind) -> &[SyncItem] {
        match kind {
            RecordKind::MoodLogs => &self.mood_logs,
            RecordKind::Appointments => &self.appointments,
        }
    }

    /// Add an item for a kind.
    pub fn push(&mut self, kind: RecordKind, item: SyncItem) {
        match kind {
            RecordKind::MoodLogs => self.mood_logs.push(item),
            RecordKind::Appointments => self.appointments.push(item),
        }
    }

    /// Total number of items across kinds.
    pub fn len(&self) -> usize {
        self.mood_logs.len() + self.appointments.len()
    }

    /// Check if nothing is submitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A record the server refused to store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Token of the rejected element, when it carried a usable one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_token: Option<IdempotencyToken>,
    /// Why the record was rejected
    pub reason: String,
}

impl Rejection {
    /// Create a rejection.
    pub fn new(token: Option<IdempotencyToken>, reason: impl Into<String>) -> Self {
        Self {
            idempotency_token: token,
            reason: reason.into(),
        }
    }
}

/// Response body with per-kind results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// True only when every submitted record was stored
    pub success: bool,
    #[serde(default)]
    pub saved_moods: Vec<PersistedRecord>,
    #[serde(default)]
    pub saved_appointments: Vec<PersistedRecord>,
    #[serde(default)]
    pub rejected_moods: Vec<Rejection>,
    #[serde(default)]
    pub rejected_appointments: Vec<Rejection>,
    /// Kinds that could not be stored at all, with the reason
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kind_errors: BTreeMap<RecordKind, String>,
}

impl SyncResponse {
    /// Records stored for a kind.
    pub fn saved(&self, kind: RecordKind) -> &[PersistedRecord] {
        match kind {
            RecordKind::MoodLogs => &self.saved_moods,
            RecordKind::Appointments => &self.saved_appointments,
        }
    }

    /// Records rejected for a kind.
    pub fn rejected(&self, kind: RecordKind) -> &[Rejection] {
        match kind {
            RecordKind::MoodLogs => &self.rejected_moods,
            RecordKind::Appointments => &self.rejected_appointments,
        }
    }

    /// Failure reported for a whole kind, if any.
    pub fn kind_error(&self, kind: RecordKind) -> Option<&str> {
        self.kind_errors.get(&kind).map(String::as_str)
    }

    /// Record stored items for a kind.
    pub fn extend_saved(&mut self, kind: RecordKind, records: Vec<PersistedRecord>) {
        match kind {
            RecordKind::MoodLogs => self.saved_moods.extend(records),
            RecordKind::Appointments => self.saved_appointments.extend(records),
        }
    }

    /// Record a rejected item for a kind.
    pub fn push_rejected(&mut self, kind: RecordKind, rejection: Rejection) {
        match kind {
            RecordKind::MoodLogs => self.rejected_moods.push(rejection),
            RecordKind::Appointments => self.rejected_appointments.push(rejection),
        }
    }

    /// Mark a whole kind as failed.
    pub fn set_kind_error(&mut self, kind: RecordKind, reason: impl Into<String>) {
        self.kind_errors.insert(kind, reason.into());
    }

    /// Derive `success` from the collected results.
    pub fn finish(mut self) -> Self {
        self.success = self.kind_errors.is_empty()
            && self.rejected_moods.is_empty()
            && self.rejected_appointments.is_empty();
        self
    }
}
