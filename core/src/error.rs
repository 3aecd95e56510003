use thiserror::Error;

/// Wharf error types
#[derive(Error, Debug)]
pub enum WharfError {
    /// A record referenced by a job does not exist
    #[error("{kind} '{id}' not found")]
    MissingRecord { kind: &'static str, id: String },

    /// Object storage error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Container registry error (network failure or server fault)
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// The registry rejected a request outright
    #[error("Registry protocol error: {registry} - {message}")]
    ProtocolError { registry: String, message: String },

    /// Uploaded content does not match its expected digest
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// A build task failed
    #[error("Build step '{step}' failed: {message}")]
    BuildStepError { step: String, message: String },

    /// Key material is missing or corrupt
    #[error("Key error: {0}")]
    KeyError(String),

    /// Queue error
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl WharfError {
    /// Whether redelivering the job could succeed.
    ///
    /// Transient faults (storage, registry 5xx, timeouts) are worth
    /// retrying through queue redelivery. Everything else would fail
    /// the same way again and goes straight to the dead-letter queue.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WharfError::StorageError(_)
                | WharfError::RegistryError { .. }
                | WharfError::TimeoutError(_)
                | WharfError::QueueError(_)
                | WharfError::IoError(_)
        )
    }
}

impl From<serde_json::Error> for WharfError {
    fn from(err: serde_json::Error) -> Self {
        WharfError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for WharfError {
    fn from(err: serde_yaml::Error) -> Self {
        WharfError::SerializationError(err.to_string())
    }
}

/// Result type alias for Wharf operations
pub type Result<T> = std::result::Result<T, WharfError>;
