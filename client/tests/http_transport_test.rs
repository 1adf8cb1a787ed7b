//! HTTP transport against a throwaway axum server.

use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use serene_client::{HttpTransport, RemoteMerge, SyncError};
use serene_engine::{RecordKind, SyncItem, SyncRequest};
use std::time::Duration;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn one_mood_request() -> SyncRequest {
    let mut request = SyncRequest::default();
    request.push(
        RecordKind::MoodLogs,
        SyncItem {
            idempotency_token: "tok-1".into(),
            fields: json!({"mood": "good", "intensity": 70})
                .as_object()
                .cloned()
                .unwrap(),
        },
    );
    request
}

#[tokio::test]
async fn posts_batch_and_parses_response() {
    let app = Router::new().route(
        "/api/sync",
        post(|Json(body): Json<Value>| async move {
            let item = &body["moodLogs"][0];
            Json(json!({
                "success": true,
                "savedMoods": [{
                    "serverId": "6f1c",
                    "idempotencyToken": item["idempotencyToken"],
                    "payload": {"mood": item["mood"], "intensity": item["intensity"]},
                    "receivedAt": 1700000000000u64
                }],
                "savedAppointments": []
            }))
        }),
    );
    let endpoint = serve(app).await;
    let transport = HttpTransport::new(&endpoint, Duration::from_secs(2)).unwrap();

    let response = transport.submit(&one_mood_request()).await.unwrap();

    assert!(response.success);
    let saved = response.saved(RecordKind::MoodLogs);
    assert_eq!(saved[0].idempotency_token, "tok-1");
    assert_eq!(saved[0].payload["mood"], "good");
}

#[tokio::test]
async fn server_error_is_outage() {
    let app = Router::new().route(
        "/api/sync",
        post(|| async {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "Database unavailable"})),
            )
        }),
    );
    let endpoint = serve(app).await;
    let transport = HttpTransport::new(&endpoint, Duration::from_secs(2)).unwrap();

    let err = transport.submit(&one_mood_request()).await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteOutage(ref m) if m.contains("Database unavailable")));
}

#[tokio::test]
async fn client_error_is_rejected_request() {
    let app = Router::new().route(
        "/api/sync",
        post(|| async {
            (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({"error": "Batch too large"})),
            )
        }),
    );
    let endpoint = serve(app).await;
    let transport = HttpTransport::new(&endpoint, Duration::from_secs(2)).unwrap();

    let err = transport.submit(&one_mood_request()).await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejected { status: 413, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn garbage_body_is_malformed() {
    let app = Router::new().route("/api/sync", post(|| async { "<html>oops</html>" }));
    let endpoint = serve(app).await;
    let transport = HttpTransport::new(&endpoint, Duration::from_secs(2)).unwrap();

    let err = transport.submit(&one_mood_request()).await.unwrap_err();
    assert!(matches!(err, SyncError::MalformedResponse(_)));
}

#[tokio::test]
async fn slow_server_times_out_as_network_failure() {
    let app = Router::new().route(
        "/api/sync",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"success": true}))
        }),
    );
    let endpoint = serve(app).await;
    let transport = HttpTransport::new(&endpoint, Duration::from_millis(100)).unwrap();

    let err = transport.submit(&one_mood_request()).await.unwrap_err();
    assert!(matches!(err, SyncError::NetworkUnavailable(_)));
}

#[tokio::test]
async fn unreachable_server_is_network_failure() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();

    let err = transport.submit(&one_mood_request()).await.unwrap_err();
    assert!(matches!(err, SyncError::NetworkUnavailable(_)));
}
