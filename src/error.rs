//! Error taxonomy for the forwarding core.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to encode value for {scope}/{key}: {source}")]
    Encode {
        scope: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode value for {scope}/{key}: {source}")]
    Decode {
        scope: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure returned by a relay endpoint.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayError {
    #[error("Relay rejected the bot token")]
    Unauthorized,

    #[error("Relay is rate limiting requests")]
    RateLimited,

    #[error("Network error talking to relay")]
    NetworkError,

    #[error("Relay destination is invalid")]
    InvalidDestination,
}

/// Errors surfaced to callers of the core's commands.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Permission to observe messages has not been granted")]
    PermissionDenied,

    #[error("Relay token and destination must both be configured")]
    ConfigIncomplete,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Message observation is not supported on this platform")]
    PlatformUnsupported,
}

/// Serializable summary of the last error the service ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "relay", rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    ConfigIncomplete,
    Storage,
    Relay(RelayError),
    PlatformUnsupported,
}

impl From<&CoreError> for ErrorKind {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::PermissionDenied => ErrorKind::PermissionDenied,
            CoreError::ConfigIncomplete => ErrorKind::ConfigIncomplete,
            CoreError::Storage(_) => ErrorKind::Storage,
            CoreError::PlatformUnsupported => ErrorKind::PlatformUnsupported,
        }
    }
}

impl CoreError {
    /// Protocol error code for the daemon.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::PermissionDenied => "PERMISSION_DENIED",
            CoreError::ConfigIncomplete => "CONFIG_INCOMPLETE",
            CoreError::Storage(_) => "STORAGE_ERROR",
            CoreError::PlatformUnsupported => "PLATFORM_UNSUPPORTED",
        }
    }
}
