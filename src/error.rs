use thiserror::Error;

/// Failure of the durable key-value layer (SQLite, memory, encryption).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("encryption: {0}")]
    Encryption(String),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage lock poisoned: {0}")]
    Poisoned(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network: {0}")]
    Network(String),
    #[error("timed out: {0}")]
    Timeout(String),
    /// The request could not be built (bad url, bad header). Not retryable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A status arrived but the body could not be read. The server may have
    /// acted on the request, so it must not be sent again.
    #[error("response body unreadable: {0}")]
    BodyRead(String),
}

impl TransportError {
    /// Whether a later replay of the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::InvalidRequest(_) | TransportError::BodyRead(_)
        )
    }
}

/// Why exchanging the stale token for a new one failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh transport: {0}")]
    Transport(#[from] TransportError),
    #[error("refresh rejected with status {0}")]
    Rejected(u16),
    #[error("malformed refresh response: {0}")]
    Malformed(String),
    #[error("no session token to refresh")]
    NoToken,
    #[error("session ended while waiting for refresh")]
    SessionEnded,
}

/// Errors surfaced to callers of the request client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No connectivity and the request is not one that can be queued.
    #[error("offline")]
    Offline,
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// Any non-success status other than a recoverable 401. Passed through verbatim.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// Session refresh failed; the session has been torn down.
    #[error("refresh failed: {0}")]
    RefreshFailed(#[source] RefreshError),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("queue storage: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Map storage failures to messages a UI shell can show as-is.
pub fn storage_error_to_user_message(e: &StorageError) -> String {
    use rusqlite::ffi::ErrorCode;
    if let StorageError::Database(rusqlite::Error::SqliteFailure(ffi_err, _)) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => return "Offline queue unavailable (Disk Full?)".to_string(),
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                return "Offline queue unavailable (Permission denied?)".to_string()
            }
            ErrorCode::SystemIoFailure => {
                return "Offline queue unavailable (I/O error?)".to_string()
            }
            _ => {}
        }
    }
    format!("Failed to persist: {}", e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_retryable() {
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(TransportError::Timeout("2s".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad url".into()).is_retryable());
        assert!(!TransportError::BodyRead("eof".into()).is_retryable());
    }

    #[test]
    fn test_api_error_status() {
        let err = ApiError::Http {
            status: 401,
            body: String::new(),
        };
        assert!(err.is_unauthorized());
        assert_eq!(ApiError::Offline.status(), None);
    }

    #[test]
    fn test_disk_full_message() {
        let err = StorageError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        ));
        assert_eq!(
            storage_error_to_user_message(&err),
            "Offline queue unavailable (Disk Full?)"
        );
    }
}
