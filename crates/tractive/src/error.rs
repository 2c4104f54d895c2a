//! Error taxonomy for the Tractive client.
//!
//! Every public operation fails with exactly one of four kinds:
//!
//! | Kind | Meaning |
//! |------|---------|
//! | `Unauthorized` | credentials rejected (HTTP 401/403) anywhere |
//! | `NotFound` | resource request returned HTTP 404 |
//! | `Request` | any other HTTP/transport/decode failure, with cause |
//! | `Disconnected` | the push channel was torn down by the local watchdog |
//!
//! Retryable conditions (429 responses, idle read timeouts on the stream)
//! are absorbed internally and never reach callers unless retries are
//! exhausted.

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, TractiveError>;

/// Errors returned by the Tractive API client and push channel.
#[derive(Debug, Error)]
pub enum TractiveError {
    /// Credentials were rejected by the vendor (HTTP 401 or 403).
    #[error("credentials rejected by the Tractive API")]
    Unauthorized,

    /// The requested resource does not exist (HTTP 404).
    #[error("resource not found")]
    NotFound,

    /// Catch-all for transport failures, unexpected statuses, timeouts after
    /// retry exhaustion, and malformed responses. The message carries the
    /// originating cause for diagnostics.
    #[error("request failed: {message}")]
    Request {
        /// Description of the underlying failure.
        message: String,
    },

    /// The streaming channel was closed by the local liveness watchdog, not
    /// by a remote or protocol failure. Callers typically reconstruct a new
    /// channel on this error.
    #[error("channel disconnected: {cause}")]
    Disconnected {
        /// Why the watchdog tore the connection down.
        cause: String,
    },
}

impl TractiveError {
    /// Create the catch-all request error.
    pub fn request<S: Into<String>>(message: S) -> Self {
        Self::Request { message: message.into() }
    }

    /// Create a watchdog-disconnect error.
    pub fn disconnected<S: Into<String>>(cause: S) -> Self {
        Self::Disconnected { cause: cause.into() }
    }
}

impl From<reqwest::Error> for TractiveError {
    fn from(err: reqwest::Error) -> Self {
        Self::request(err.to_string())
    }
}

impl From<serde_json::Error> for TractiveError {
    fn from(err: serde_json::Error) -> Self {
        Self::request(format!("invalid JSON payload: {err}"))
    }
}

impl From<url::ParseError> for TractiveError {
    fn from(err: url::ParseError) -> Self {
        Self::request(format!("invalid URL: {err}"))
    }
}
