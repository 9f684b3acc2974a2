//! Error types for xfer-core
//!
//! Planning errors (locator, credential, capability) abort a run before any
//! byte moves. Transfer errors are recorded per task by the executor.

use thiserror::Error;

use crate::capability::{IfExists, OperationKind};
use crate::locator::Scheme;

/// Result type alias for xfer-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by xfer-core and backend clients
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("{backend} backend does not support {operation}")]
    UnsupportedOperation {
        backend: Scheme,
        operation: OperationKind,
    },

    #[error("{backend} backend does not support --if-exists={mode}")]
    UnsupportedIfExists { backend: Scheme, mode: IfExists },

    #[error("No objects found under {0}")]
    EmptySource(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Destination already exists: {0}")]
    AlreadyExists(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("{0}")]
    General(String),
}

impl Error {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        crate::retry::is_retryable_error(self)
    }

    /// Whether this error belongs to the plan-time family that must abort a run
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidLocator(_)
                | Error::MissingCredential(_)
                | Error::UnsupportedOperation { .. }
                | Error::UnsupportedIfExists { .. }
                | Error::EmptySource(_)
                | Error::Config(_)
        )
    }
}
