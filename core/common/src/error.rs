//! Common error types for DriveHub.

use thiserror::Error;

/// Top-level error type for DriveHub operations.
///
/// The first three variants are the documented failure kinds callers match
/// on; the remaining ones cover local and transport problems.
#[derive(Debug, Error)]
pub enum Error {
    /// The consent prompt was dismissed or timed out.
    #[error("Action cancelled")]
    UserCancelled,

    /// No usable credential could be obtained for the account.
    #[error("Account '{account}' needs to be reconnected")]
    ReauthRequired {
        /// Display label of the affected account.
        account: String,
    },

    /// The remote API answered with a non-success status.
    #[error("API error {status}: {body}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body as text.
        body: String,
    },

    /// The identity provider refused to issue a token.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network transport failed before a response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// Account store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether this error came from a dismissed or expired consent prompt.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::UserCancelled)
    }

    /// Whether the account must be reconnected interactively.
    pub fn is_reauth_required(&self) -> bool {
        matches!(self, Error::ReauthRequired { .. })
    }

    /// HTTP status of a failed request, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
