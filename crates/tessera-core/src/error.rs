//! Error types for the derivative-image engine.
//!
//! Every fallible operation in the workspace returns [`Result`]. The error
//! kinds here are the ones callers can meaningfully dispatch on; components
//! propagate them unchanged and only add context when mapping a foreign
//! error into one of these variants.

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine.
///
/// # Categories
///
/// - **Resolution errors**: [`NotFound`](Error::NotFound),
///   [`AccessDenied`](Error::AccessDenied)
/// - **Format errors**: [`UnsupportedSourceFormat`](Error::UnsupportedSourceFormat),
///   [`UnsupportedOutputFormat`](Error::UnsupportedOutputFormat)
/// - **Request errors**: [`InvalidRequest`](Error::InvalidRequest)
/// - **Transport errors**: [`UpstreamUnavailable`](Error::UpstreamUnavailable)
/// - **Budget errors**: [`Timeout`](Error::Timeout), [`Cancelled`](Error::Cancelled)
/// - **Everything else**: [`Internal`](Error::Internal)
#[derive(Debug, Error)]
pub enum Error {
    /// The identifier does not resolve in the chosen source.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store rejected the configured credentials.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The format detector recognized no reader for the source bytes.
    #[error("no reader for source format: {0}")]
    UnsupportedSourceFormat(String),

    /// The operation list requests an encoding with no writer.
    #[error("no writer for output format: {0}")]
    UnsupportedOutputFormat(String),

    /// Operation-list normalization or validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transient source I/O failure.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A stage exceeded its time budget.
    #[error("{stage} exceeded its {seconds} s budget")]
    Timeout {
        /// The stage that ran out of budget.
        stage: &'static str,
        /// Budget in whole seconds.
        seconds: u64,
    },

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// Any other fault, including delegate failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a [`NotFound`](Error::NotFound) error.
    #[inline]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates an [`AccessDenied`](Error::AccessDenied) error.
    #[inline]
    pub fn access_denied(what: impl Into<String>) -> Self {
        Self::AccessDenied(what.into())
    }

    /// Creates an [`InvalidRequest`](Error::InvalidRequest) error.
    #[inline]
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Creates an [`UpstreamUnavailable`](Error::UpstreamUnavailable) error.
    #[inline]
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    /// Creates an [`Internal`](Error::Internal) error.
    #[inline]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns `true` if this error indicates a missing resource.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if retrying the request later could succeed.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_) | Self::Timeout { .. })
    }
}

impl From<std::io::Error> for Error {
    /// Classifies an I/O error raised while talking to a backing store.
    ///
    /// Decode-time I/O errors never reach this conversion; codec call sites
    /// map their own error types explicitly.
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => Self::AccessDenied(err.to_string()),
            _ => Self::UpstreamUnavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_classification() {
        let nf = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(Error::from(nf).is_not_found());

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(Error::from(denied), Error::AccessDenied(_)));

        let other = std::io::Error::other("broken pipe");
        assert!(Error::from(other).is_transient());
    }

    #[test]
    fn timeout_display() {
        let err = Error::Timeout {
            stage: "source open",
            seconds: 30,
        };
        let msg = err.to_string();
        assert!(msg.contains("source open"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn constructors() {
        assert!(Error::not_found("x").is_not_found());
        assert!(Error::upstream("y").is_transient());
        assert!(!Error::internal("z").is_transient());
    }
}
