//! Error types for preset tracking operations

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for the preset tracker.
///
/// Every variant is recovered locally by the command layer and turned into a
/// result string plus a log entry; nothing escapes to the host unhandled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// A required collaborator (conversation, metadata) is unavailable.
    #[error("Missing context: {what} is not available")]
    MissingContext { what: String },

    /// Malformed message id / swipe number / unresolvable target.
    #[error("Invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// The reply carries no timestamp, so no fingerprint can be derived.
    #[error("Cannot derive a fingerprint without a timestamp")]
    KeyGeneration,

    /// The environment yielded no configuration field at all.
    #[error("No generation configuration could be collected")]
    Collection,

    /// A sweep was requested while another one is still running.
    #[error("{operation} is already in progress")]
    ConcurrentOperation { operation: String },

    /// A structured record without `genPreset`.
    #[error("Malformed record at {key}: missing genPreset")]
    MalformedRecord { key: String },

    #[error("Record store lock poisoned")]
    LockPoisoned,

    /// Raised by metadata sinks; the flush scheduler logs and drops it.
    #[error("Persistence failed: {reason}")]
    Persistence { reason: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TrackerError {
    pub fn missing_context(what: impl Into<String>) -> Self {
        Self::MissingContext { what: what.into() }
    }

    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }
}

/// Result type alias for preset tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

// =============================================================================
// TESTS
// =============================================================================
