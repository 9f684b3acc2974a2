//! Process exit codes
//!
//! Scripts branch on these, so the numeric values are stable.

use xfer_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// Unclassified error, or at least one task failed
    GeneralError = 1,
    /// Bad arguments, locators or configuration
    UsageError = 2,
    NetworkError = 3,
    /// Missing or rejected credentials
    AuthError = 4,
    NotFound = 5,
    /// Destination exists and `--if-exists=error` was requested
    Conflict = 6,
    /// A backend lacks a required capability
    UnsupportedFeature = 7,
    /// Ctrl-C cancelled the run
    Interrupted = 130,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&Error> for ExitCode {
    fn from(error: &Error) -> Self {
        match error {
            Error::InvalidLocator(_) | Error::Config(_) | Error::TomlParse(_) => Self::UsageError,
            Error::MissingCredential(_) | Error::Auth(_) => Self::AuthError,
            Error::UnsupportedOperation { .. } | Error::UnsupportedIfExists { .. } => {
                Self::UnsupportedFeature
            }
            Error::EmptySource(_) | Error::NotFound(_) => Self::NotFound,
            Error::AlreadyExists(_) => Self::Conflict,
            Error::Network(_) => Self::NetworkError,
            Error::Cancelled => Self::Interrupted,
            Error::Integrity(_) | Error::Io(_) | Error::General(_) => Self::GeneralError,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        // Every variant fits in a byte
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}
