use thiserror::Error;

/// Ride tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid NMEA sentence: {0}")]
    InvalidNmea(String),

    #[error("Unknown subsystem: {0}")]
    UnknownSubsystem(String),

    #[error("Subsystem {name} failed: {reason}")]
    SubsystemFailed { name: String, reason: String },

    #[error("Tracking service is not running")]
    ServiceStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::StorageError(err.to_string())
    }
}
