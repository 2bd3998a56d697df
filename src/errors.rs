//! Application error model with user-facing text mapping
//!
//! Defines the gateway's failure taxonomy using `thiserror`. Core components
//! return these as typed values; only the tool dispatch layer decides how a
//! failure is rendered back to the caller (see [`AppError::user_message`]).

use thiserror::Error;

/// Text returned for any tool call on a connection without usable credentials
pub const NO_SESSION_MESSAGE: &str = "Error: No valid email configuration found for this session.";

/// Application error type
///
/// One variant per failure kind the gateway distinguishes. Messages carry
/// server-side or validation detail only; secrets and message bodies must
/// never be formatted into them.
#[derive(Debug, Error)]
pub enum AppError {
    /// Connection parameters did not carry a usable credential bundle
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    /// Invalid user input (malformed date, bad address, control characters)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The mail server rejected the credentials
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Network or TLS failure while reaching the mail server
    #[error("connection failed: {0}")]
    Connect(String),
    /// The mail server rejected a select, search, or fetch command
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Message bytes could not be parsed or decoded
    #[error("decode error: {0}")]
    Decode(String),
    /// The operation deadline elapsed
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// The caller abandoned the operation before it finished
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    /// The submission server refused the message
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// Internal error (worker panic, unexpected state)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Render as the plain text a tool caller sees
    ///
    /// Operation-specific wording (timeouts, send failures) is applied by the
    /// dispatch layer before falling back to this generic rendering.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingCredentials(_) => NO_SESSION_MESSAGE.to_owned(),
            other => format!("An error occurred: {other}"),
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::{AppError, NO_SESSION_MESSAGE};

    #[test]
    fn missing_credentials_renders_fixed_message() {
        let err = AppError::MissingCredentials("ADDR absent".to_owned());
        assert_eq!(err.user_message(), NO_SESSION_MESSAGE);
    }

    #[test]
    fn other_errors_render_with_description() {
        let err = AppError::Protocol("UID SEARCH failed: BAD".to_owned());
        assert_eq!(
            err.user_message(),
            "An error occurred: protocol error: UID SEARCH failed: BAD"
        );
        assert!(!err.is_timeout());
        assert!(AppError::Timeout("x".to_owned()).is_timeout());
    }
}
