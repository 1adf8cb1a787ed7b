//! Wire-level tests for the merge protocol.
//!
//! These check that the JSON the server reads and writes matches what the
//! client engine produces and expects. Handler behaviour against storage is
//! covered by the unit tests in `src/handlers`.

use serde_json::json;
use serene_engine::{
    CaptureStore, PersistedRecord, RecordKind, Reconciler, Rejection, SubmissionBatch,
    SyncResponse, SYNC_PATH,
};

fn store_with_captures() -> CaptureStore {
    let mut store = CaptureStore::new();
    store
        .append(
            RecordKind::MoodLogs,
            json!({"mood": "good", "intensity": 70}),
            "tok-mood",
            1_706_745_600_000,
        )
        .unwrap();
    store
        .append(
            RecordKind::Appointments,
            json!({"date": "2024-02-01", "time": "09:30", "counselor": "Dr. Lee"}),
            "tok-appt",
            1_706_745_601_000,
        )
        .unwrap();
    store
}

#[cfg(test)]
mod protocol_tests {
    use super::*;

    #[test]
    fn test_endpoint_path() {
        assert_eq!(SYNC_PATH, "/api/sync");
    }

    #[test]
    fn test_request_shape() {
        let mut store = store_with_captures();
        let batch = SubmissionBatch::from_store(&mut store, usize::MAX);

        let body = serde_json::to_value(batch.to_request()).unwrap();

        assert_eq!(
            body,
            json!({
                "moodLogs": [
                    {"idempotencyToken": "tok-mood", "mood": "good", "intensity": 70}
                ],
                "appointments": [
                    {
                        "idempotencyToken": "tok-appt",
                        "date": "2024-02-01",
                        "time": "09:30",
                        "counselor": "Dr. Lee"
                    }
                ]
            })
        );
    }

    #[test]
    fn test_request_never_carries_local_ids() {
        let mut store = store_with_captures();
        let batch = SubmissionBatch::from_store(&mut store, usize::MAX);

        let body = serde_json::to_string(&batch.to_request()).unwrap();

        assert!(!body.contains("localId"));
        assert!(!body.contains("syncState"));
    }

    #[test]
    fn test_response_shape() {
        let mut response = SyncResponse::default();
        response.extend_saved(
            RecordKind::MoodLogs,
            vec![PersistedRecord {
                server_id: "0b6f6c7e-5a4e-4a43-9a7b-5f8f0a0b1c2d".into(),
                idempotency_token: "tok-mood".into(),
                payload: json!({"mood": "good", "intensity": 70}),
                received_at: 1_706_745_700_000,
            }],
        );
        response.push_rejected(
            RecordKind::Appointments,
            Rejection::new(Some("tok-appt".into()), "time must not be empty"),
        );
        let response = response.finish();

        let body = serde_json::to_value(&response).unwrap();

        assert_eq!(body["success"], false);
        assert_eq!(body["savedMoods"][0]["serverId"], "0b6f6c7e-5a4e-4a43-9a7b-5f8f0a0b1c2d");
        assert_eq!(body["savedMoods"][0]["receivedAt"], 1_706_745_700_000u64);
        assert_eq!(body["savedAppointments"], json!([]));
        assert_eq!(body["rejectedAppointments"][0]["idempotencyToken"], "tok-appt");
        assert!(body.get("kindErrors").is_none());
    }

    #[test]
    fn test_minimal_response_parses() {
        // Only the required fields, as an older server would send
        let response: SyncResponse = serde_json::from_value(json!({
            "success": true,
            "savedMoods": [],
            "savedAppointments": []
        }))
        .unwrap();

        assert!(response.success);
        assert!(response.rejected(RecordKind::MoodLogs).is_empty());
        assert_eq!(response.kind_error(RecordKind::Appointments), None);
    }

    #[test]
    fn test_server_answer_reconciles() {
        let mut store = store_with_captures();
        let batch = SubmissionBatch::from_store(&mut store, usize::MAX);

        let response: SyncResponse = serde_json::from_value(json!({
            "success": false,
            "savedMoods": [{
                "serverId": "srv-1",
                "idempotencyToken": "tok-mood",
                "payload": {"mood": "good", "intensity": 70},
                "receivedAt": 1_706_745_700_000u64
            }],
            "savedAppointments": [],
            "kindErrors": {"appointments": "storage error"}
        }))
        .unwrap();

        let result = Reconciler::new(&batch).with_response(&response);
        result.apply(&mut store);

        assert_eq!(result.synced_count(), 1);
        assert_eq!(result.retry_count(), 1);
        assert_eq!(store.queue_depth(RecordKind::MoodLogs), 0);
        assert_eq!(store.queue_depth(RecordKind::Appointments), 1);
    }

    #[test]
    fn test_duplicate_acknowledgement_is_harmless() {
        let mut store = store_with_captures();
        let batch = SubmissionBatch::from_store(&mut store, usize::MAX);
        let saved = PersistedRecord {
            server_id: "srv-1".into(),
            idempotency_token: "tok-mood".into(),
            payload: json!({"mood": "good", "intensity": 70}),
            received_at: 1,
        };
        let mut response = SyncResponse::default();
        response.extend_saved(RecordKind::MoodLogs, vec![saved.clone(), saved]);

        let result = Reconciler::new(&batch).with_response(&response);
        result.apply(&mut store);

        assert_eq!(result.synced_ids(RecordKind::MoodLogs).len(), 1);
        assert_eq!(store.queue_depth(RecordKind::MoodLogs), 0);
    }
}
