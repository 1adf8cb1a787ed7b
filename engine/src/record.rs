//! Record types flowing through the capture and sync path.

use crate::{Error, IdempotencyToken, LocalId, ServerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of records that can be captured offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    /// Mood log entries
    MoodLogs,
    /// Appointment requests
    Appointments,
}

impl RecordKind {
    /// Every kind, in a fixed order.
    pub const ALL: [RecordKind; 2] = [RecordKind::MoodLogs, RecordKind::Appointments];

    /// Collection name used in snapshots and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::MoodLogs => "moodLogs",
            RecordKind::Appointments => "appointments",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moodLogs" => Ok(RecordKind::MoodLogs),
            "appointments" => Ok(RecordKind::Appointments),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// Local-only synchronization state of a captured record.
///
/// Transitions: `Pending -> Submitting -> Synced` (removed) or back to
/// `Pending` after a transient failure. `Failed` is reached only when the
/// server rejected the record as malformed; it is not retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Submitting,
    Synced,
    Failed,
}

/// A user-submitted record not yet confirmed persisted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRecord {
    /// Client-only key, never sent to the server
    pub local_id: LocalId,
    /// Which collection the record belongs to
    pub kind: RecordKind,
    /// Token the server uses to deduplicate retried submissions
    pub token: IdempotencyToken,
    /// Domain fields (mood or appointment)
    pub payload: serde_json::Value,
    /// When the record was captured (milliseconds since epoch)
    pub captured_at: Timestamp,
    /// Local sync state
    pub sync_state: SyncState,
    /// Number of failed submission attempts
    #[serde(default)]
    pub attempts: u32,
    /// Reason for the last failure or rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CapturedRecord {
    /// Create a new pending record.
    pub fn new(
        local_id: LocalId,
        kind: RecordKind,
        token: impl Into<IdempotencyToken>,
        payload: serde_json::Value,
        captured_at: Timestamp,
    ) -> Self {
        Self {
            local_id,
            kind,
            token: token.into(),
            payload,
            captured_at,
            sync_state: SyncState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Whether the next sync cycle should pick this record up.
    pub fn is_pending(&self) -> bool {
        self.sync_state == SyncState::Pending
    }

    /// Whether the record counts towards the "N items pending sync" figure.
    pub fn is_queued(&self) -> bool {
        matches!(self.sync_state, SyncState::Pending | SyncState::Submitting)
    }

    /// Whether the server rejected this record and it waits for the user.
    pub fn is_rejected(&self) -> bool {
        self.sync_state == SyncState::Failed
    }
}

/// The authoritative, server-identified form of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    /// Identifier assigned by the server's store
    pub server_id: ServerId,
    /// Token the record was submitted with
    pub idempotency_token: IdempotencyToken,
    /// Stored domain fields
    pub payload: serde_json::Value,
    /// When the server received the record (milliseconds since epoch)
    pub received_at: Timestamp,
}
