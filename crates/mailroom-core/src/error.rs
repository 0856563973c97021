//! Error taxonomy for mailroom operations.
//!
//! Every fault crossing into the orchestration layer is translated into
//! exactly one of these kinds at the boundary where it occurs. Layers above
//! only add context; they never invent new kinds. Retry loops and the
//! webhook pipeline branch on [`Error::kind`] instead of downcasting.

use std::fmt;

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a domain error.
///
/// Carried by every [`Error`] value and inspected through a single
/// function ([`Error::kind`]) rather than repeated type assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller input or business-rule violation. Never retried.
    Validation,
    /// Referenced entity absent.
    NotFound,
    /// Uniqueness violation or optimistic-lock mismatch.
    Conflict,
    /// Authentication or signature failure.
    Unauthorized,
    /// Transient infrastructure fault, safe to retry.
    ServiceUnavailable,
    /// Unclassified fault. Non-retryable, logged at error severity.
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::ServiceUnavailable => write!(f, "service_unavailable"),
            Self::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// Domain error with one variant per [`ErrorKind`].
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Caller input or business-rule violation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced entity absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation or optimistic-lock mismatch.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authentication or signature failure.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transient infrastructure fault.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Unclassified fault.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates a service-unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Creates an unexpected error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Returns the kind carried by this error.
    ///
    /// The single classification point for retry and webhook-redelivery
    /// decisions.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Whether this error represents a transient fault worth retrying.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ServiceUnavailable)
    }

    /// Rebuilds the error with context prepended, preserving the kind.
    #[must_use]
    pub fn context(self, context: impl fmt::Display) -> Self {
        let wrap = |message: String| format!("{context}: {message}");
        match self {
            Self::Validation(m) => Self::Validation(wrap(m)),
            Self::NotFound(m) => Self::NotFound(wrap(m)),
            Self::Conflict(m) => Self::Conflict(wrap(m)),
            Self::Unauthorized(m) => Self::Unauthorized(wrap(m)),
            Self::ServiceUnavailable(m) => Self::ServiceUnavailable(wrap(m)),
            Self::Unexpected(m) => Self::Unexpected(wrap(m)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Unexpected(format!("serialization failed: {err}"))
    }
}
