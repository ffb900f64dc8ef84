//! Core error types for gamecafe-core.
//!
//! Each concern gets its own thiserror enum; [`CoreError`] collects them for
//! callers that drive several components at once.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for gamecafe-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Quota store errors
    #[error("Quota store error: {0}")]
    Quota(#[from] QuotaError),

    /// Token errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Session lifecycle errors
    #[error("{0}")]
    Session(#[from] SessionError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Key does not exist in the configuration tree
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Errors surfaced by a quota store, local or remote.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Missing, malformed or expired bearer token
    #[error("not authenticated")]
    Unauthorized,

    /// Token is valid but belongs to another user
    #[error("token does not grant access to user '{user_id}'")]
    Forbidden { user_id: String },

    /// No quota record for this user
    #[error("no quota record for user '{user_id}'")]
    NotFound { user_id: String },

    /// Rejected numeric or structural input
    #[error("invalid value for '{field}': {message}")]
    InvalidInput { field: String, message: String },

    /// Record already exists
    #[error("quota record for user '{user_id}' already exists")]
    Conflict { user_id: String },

    /// Network or HTTP-level failure talking to a remote store
    #[error("transport failure: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("unexpected response: {0}")]
    Decode(String),

    /// Backing storage failed
    #[error("storage failure: {0}")]
    Storage(#[from] DatabaseError),
}

impl QuotaError {
    /// Failures worth falling back from: the store may well be fine on the
    /// next attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QuotaError::Transport(_) | QuotaError::Decode(_) | QuotaError::Storage(_)
        )
    }

    /// Failures that mean the session must log in again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, QuotaError::Unauthorized | QuotaError::Forbidden { .. })
    }

    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        QuotaError::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Bearer token errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token does not have the `<user>.<expiry>.<signature>` shape
    #[error("malformed token")]
    Malformed,

    /// Signature does not match the payload
    #[error("token signature verification failed")]
    BadSignature,

    /// Token expiry lies in the past
    #[error("token expired at {expired_at}")]
    Expired {
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    /// Token lifetime is not positive or overflows the calendar
    #[error("token lifetime out of range")]
    InvalidLifetime,
}

/// Session lifecycle errors, shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("please log in again")]
    NotAuthenticated,

    #[error("no time remaining")]
    NoTimeRemaining,

    #[error("session already terminated")]
    Terminated,
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for QuotaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            QuotaError::Decode(err.to_string())
        } else {
            QuotaError::Transport(err.to_string())
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
