//! Error types for pairgate.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-adapter errors.
///
/// Every backend maps its native failures onto these variants so callers
/// written against the adapter trait never see a backend-specific type.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to read {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Failed to write {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("Failed to remove {key}: {reason}")]
    Remove { key: String, reason: String },

    #[error("Failed to list keys: {reason}")]
    List { reason: String },

    #[error("Invalid storage key: {key}")]
    InvalidKey { key: String },

    #[error("Storage backend unavailable: {reason}")]
    Backend { reason: String },

    #[error("Serialization error for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("Pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::BuildError),

    #[cfg(feature = "postgres")]
    #[error("Pool runtime error: {0}")]
    PoolRuntime(#[from] deadpool_postgres::PoolError),
}

/// Pairing-flow errors surfaced to the original caller.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Phone number {number:?} contains no digits")]
    InvalidNumber { number: String },

    #[error("Pairing code request rejected: {reason}")]
    CodeRequestFailed { reason: String },

    #[error("Archived session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Pairing flow ended before a code was issued: {reason}")]
    FlowEnded { reason: String },
}

/// Connection-level errors from the protocol client.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to construct protocol client: {reason}")]
    ConnectFailed { reason: String },

    #[error("Failed to send message to {target}: {reason}")]
    SendFailed { target: String, reason: String },

    #[error("Reconnect attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
}

/// Archive-upload errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No archive destinations configured")]
    NoDestinations,

    #[error("No archive destination accepted session {session_id}; failed keys: {}", .failed_keys.join(", "))]
    NoDestinationAccepted {
        session_id: String,
        failed_keys: Vec<String>,
    },

    #[error("Storage error during archive: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_read_display() {
        let err = StorageError::Read {
            key: "creds.json".to_string(),
            reason: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("creds.json"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_pairing_error_invalid_number_display() {
        let err = PairingError::InvalidNumber {
            number: "abc".to_string(),
        };
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_upload_error_names_failed_keys() {
        let err = UploadError::NoDestinationAccepted {
            session_id: "GATE~X1".to_string(),
            failed_keys: vec!["creds.json".to_string(), "key-1.json".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("GATE~X1"));
        assert!(msg.contains("creds.json"));
        assert!(msg.contains("key-1.json"));
    }

    #[test]
    fn test_connection_error_retries_exhausted_display() {
        let err = ConnectionError::RetriesExhausted { attempts: 5 };
        assert!(err.to_string().contains("5"));
    }

    #[test]
    fn test_error_from_config_error() {
        let inner = ConfigError::MissingEnvVar("PAIRGATE_DATABASE_URL".to_string());
        let err = Error::from(inner);
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_from_storage_error() {
        let inner = StorageError::List {
            reason: "bucket gone".to_string(),
        };
        let err = Error::from(inner);
        assert!(err.to_string().contains("Storage error"));
    }

    #[test]
    fn test_error_from_pairing_error() {
        let inner = PairingError::CodeRequestFailed {
            reason: "number blocked".to_string(),
        };
        let err = Error::from(inner);
        assert!(err.to_string().contains("Pairing error"));
    }
}
