//! Transport to the Remote Merge Service.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serene_engine::{SyncRequest, SyncResponse, SYNC_PATH};
use std::time::Duration;

/// Something that can merge a batch of records remotely.
#[async_trait]
pub trait RemoteMerge: Send + Sync {
    /// Submit one batch and return the per-kind outcome.
    async fn submit(&self, request: &SyncRequest) -> Result<SyncResponse>;
}

/// HTTP client for `POST /api/sync`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport for the service at `endpoint`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::NetworkUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}{}", endpoint.trim_end_matches('/'), SYNC_PATH),
        })
    }

    /// Full URL requests are sent to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteMerge for HttpTransport {
    async fn submit(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::NetworkUnavailable(format!("failed to read response body: {e}")))?;

        if status.is_server_error() {
            return Err(SyncError::RemoteOutage(format!(
                "server returned HTTP {}: {}",
                status.as_u16(),
                error_message(&body)
            )));
        }
        if !status.is_success() {
            return Err(SyncError::RemoteRejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| SyncError::MalformedResponse(e.to_string()))
    }
}

fn classify_send_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::NetworkUnavailable(format!("request timed out: {err}"))
    } else if err.is_connect() {
        SyncError::NetworkUnavailable(format!("connection failed: {err}"))
    } else if err.is_builder() || err.is_body() {
        SyncError::RemoteRejected {
            status: 0,
            message: err.to_string(),
        }
    } else {
        SyncError::NetworkUnavailable(err.to_string())
    }
}

/// Pull `error` out of a JSON error body, or fall back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_endpoint_and_path() {
        let transport = HttpTransport::new("http://localhost:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.url(), "http://localhost:3000/api/sync");
    }

    #[test]
    fn error_message_prefers_json_error_field() {
        assert_eq!(
            error_message(r#"{"error":"Database unavailable","details":"pool timed out"}"#),
            "Database unavailable"
        );
        assert_eq!(error_message("  Bad Gateway \n"), "Bad Gateway");
    }
}
