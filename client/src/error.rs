use thiserror::Error;

/// Errors surfaced by the client side of the sync path.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The device cannot hold another record.
    #[error("local storage exhausted: {0}")]
    StorageExhausted(String),

    /// The server could not be reached or did not answer in time.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The server refused a record as malformed.
    #[error("record rejected: {0}")]
    RemoteValidation(String),

    /// The server is up but its storage is not.
    #[error("remote outage: {0}")]
    RemoteOutage(String),

    /// The server refused the whole request.
    #[error("request rejected with status {status}: {message}")]
    RemoteRejected { status: u16, message: String },

    /// The server answered with something that is not a sync response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Engine(serene_engine::Error),
}

impl SyncError {
    /// Whether the failure is transient and the record should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkUnavailable(_)
                | SyncError::RemoteOutage(_)
                | SyncError::RemoteRejected { .. }
                | SyncError::MalformedResponse(_)
        )
    }

    /// Whether the server refused the request because of its size.
    ///
    /// Sending the same request again fails the same way; a smaller one may not.
    pub fn is_too_large(&self) -> bool {
        matches!(self, SyncError::RemoteRejected { status: 413, .. })
    }
}

impl From<serene_engine::Error> for SyncError {
    fn from(err: serene_engine::Error) -> Self {
        match err {
            serene_engine::Error::StorageExhausted(msg) => SyncError::StorageExhausted(msg),
            other => SyncError::Engine(other),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded | ErrorKind::FileTooLarge => {
                SyncError::StorageExhausted(err.to_string())
            }
            _ => SyncError::Persistence(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
