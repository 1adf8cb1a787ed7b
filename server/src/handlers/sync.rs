//! Merge handler - stores a batch of offline captures.

use crate::db::{NewRecord, RecordRepository, RepositoryError};
use crate::error::{AppError, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use serene_engine::{RecordKind, Rejection, Schema, SyncResponse, TOKEN_FIELD};
use std::collections::HashSet;

/// Fields that identify a record on the client and never reach storage.
pub const CLIENT_ID_FIELDS: [&str; 5] = ["id", "_id", "localId", "serverId", TOKEN_FIELD];

/// A submitted element after parsing.
#[derive(Debug)]
enum Parsed {
    Valid(NewRecord),
    Rejected(Rejection),
}

/// Process a merge request body.
///
/// Every element is judged on its own: a malformed record is rejected without
/// affecting the rest of the batch, and one kind failing to store does not
/// prevent the other from being stored.
pub async fn handle_sync(
    repo: &dyn RecordRepository,
    schema: &Schema,
    max_batch_records: usize,
    body: &[u8],
) -> Result<SyncResponse> {
    let body: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Malformed JSON: {e}")))?;
    let body = body
        .as_object()
        .ok_or_else(|| AppError::BadRequest("Request body must be a JSON object".into()))?;

    let mut batches = Vec::with_capacity(RecordKind::ALL.len());
    for kind in RecordKind::ALL {
        let elements = match body.get(kind.as_str()) {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                return Err(AppError::BadRequest(format!("{kind} must be an array")));
            }
        };
        batches.push((kind, elements));
    }

    let total: usize = batches.iter().map(|(_, elements)| elements.len()).sum();
    if total > max_batch_records {
        return Err(AppError::PayloadTooLarge(format!(
            "{total} records submitted, at most {max_batch_records} accepted"
        )));
    }

    let received_at = Utc::now();
    let mut response = SyncResponse::default();

    for (kind, elements) in batches {
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for element in elements {
            match parse_element(schema, kind, element) {
                Parsed::Valid(record) => {
                    if seen.insert(record.idempotency_token.clone()) {
                        records.push(record);
                    }
                }
                Parsed::Rejected(rejection) => {
                    tracing::debug!(%kind, reason = %rejection.reason, "rejected record");
                    response.push_rejected(kind, rejection);
                }
            }
        }

        if records.is_empty() {
            continue;
        }

        match repo.persist(kind, records, received_at).await {
            Ok(persisted) => response.extend_saved(kind, persisted),
            Err(err @ RepositoryError::Unavailable(_)) => return Err(err.into()),
            Err(RepositoryError::Failed(msg)) => {
                tracing::error!(%kind, error = %msg, "failed to store records");
                response.set_kind_error(kind, "storage error");
            }
        }
    }

    let response = response.finish();
    tracing::info!(
        moods = response.saved_moods.len(),
        appointments = response.saved_appointments.len(),
        rejected = response.rejected_moods.len() + response.rejected_appointments.len(),
        success = response.success,
        "processed sync batch"
    );

    Ok(response)
}

fn parse_element(schema: &Schema, kind: RecordKind, element: &Value) -> Parsed {
    let Some(fields) = element.as_object() else {
        return Parsed::Rejected(Rejection::new(None, "record must be a JSON object"));
    };

    let token = match fields.get(TOKEN_FIELD).and_then(Value::as_str) {
        Some(token) if !token.trim().is_empty() => token.to_string(),
        _ => return Parsed::Rejected(Rejection::new(None, "missing idempotency token")),
    };

    let payload = Value::Object(strip_client_ids(fields));
    if let Err(err) = schema.validate(kind, &payload) {
        return Parsed::Rejected(Rejection::new(Some(token), err.to_string()));
    }

    Parsed::Valid(NewRecord {
        idempotency_token: token,
        payload,
    })
}

fn strip_client_ids(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .filter(|(name, _)| !CLIENT_ID_FIELDS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
