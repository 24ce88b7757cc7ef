//! Error types for depotctl.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::operation::{FailureReason, OperationKind};

/// Why an authentication attempt was rejected.
///
/// The UI uses the sub-cause to tell the user which corrective action to take,
/// so every credential failure carries one of these instead of a generic message.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum AuthFailure {
    /// Username or password was rejected.
    #[error("bad credentials: {detail}")]
    BadCredentials { detail: String },

    /// A second-factor code was rejected and no retry is left for this attempt.
    #[error("bad second-factor code: {detail}")]
    BadSecondFactor { detail: String },

    /// Every allowed second-factor attempt was rejected.
    #[error("second-factor retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// The tool refused the login because of too many attempts.
    #[error("login rate limit exceeded")]
    RateLimited,

    /// No login outcome was observed within the login timeout.
    #[error("login timed out after {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    /// The caller declined to provide a second-factor code.
    #[error("no second-factor code was provided")]
    CodeUnavailable,
}

/// A shared error type for the whole depotctl workspace.
///
/// Serializable so the application layer can forward failures to a UI as-is.
#[derive(Error, Debug, Clone, Serialize)]
pub enum DepotError {
    /// Bad user input (profile or settings); recoverable by correcting and resaving.
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// A profile with the same name already exists and the save was not an update.
    #[error("Profile '{0}' already exists")]
    DuplicateName(String),

    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// The persisted store could not be parsed.
    #[error("Corrupt store at {}: {message}", path.display())]
    CorruptStore { path: PathBuf, message: String },

    /// IO error (file system operations)
    #[error("IO error{}: {message}", path.as_ref().map(|p| format!(" at {}", p.display())).unwrap_or_default())]
    Io {
        path: Option<PathBuf>,
        message: String,
    },

    /// The external tool is missing or could not be started.
    #[error("Launch error: {0}")]
    Launch(String),

    /// Window focus was lost while sending keystrokes, even after one retry.
    #[error("Focus error: {0}")]
    Focus(String),

    /// Credential or second-factor failure.
    #[error("Authentication failed: {cause}")]
    Authentication { cause: AuthFailure, tail: String },

    /// No recognizable output within the wait budget.
    #[error("Timed out after {waited_ms} ms waiting for console output")]
    Timeout { waited_ms: u64, tail: String },

    /// The session was closed while a wait was outstanding.
    #[error("Cancelled by user")]
    Cancelled { tail: String },

    /// The external process exited while a wait was outstanding.
    #[error("Console closed unexpectedly")]
    ConsoleClosed { tail: String },

    /// The tool reported an explicit failure marker.
    #[error("{kind} failed ({reason}): {detail}")]
    OperationFailure {
        kind: OperationKind,
        reason: FailureReason,
        detail: String,
        tail: String,
    },

    /// Another session already owns this tool installation.
    #[error("A session is already running for installation {}", root.display())]
    SessionInUse { root: PathBuf },

    /// A session state change that the state machine does not allow.
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DepotError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a Validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an IO error bound to a path
    pub fn io_at(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: Some(path.into()),
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }

    /// Creates a CorruptStore error
    pub fn corrupt_store(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptStore {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an Authentication error
    pub fn auth(cause: AuthFailure, tail: impl Into<String>) -> Self {
        Self::Authentication {
            cause,
            tail: tail.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_corrupt_store(&self) -> bool {
        matches!(self, Self::CorruptStore { .. })
    }

    /// Returns the authentication sub-cause, if this is an authentication error.
    pub fn auth_failure(&self) -> Option<&AuthFailure> {
        match self {
            Self::Authentication { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Raw console output captured at failure time, when the error has one.
    pub fn console_tail(&self) -> Option<&str> {
        match self {
            Self::Authentication { tail, .. }
            | Self::Timeout { tail, .. }
            | Self::Cancelled { tail }
            | Self::ConsoleClosed { tail }
            | Self::OperationFailure { tail, .. } => Some(tail.as_str()),
            _ => None,
        }
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for DepotError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: None,
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for DepotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for DepotError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for DepotError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, DepotError>`.
pub type Result<T> = std::result::Result<T, DepotError>;
