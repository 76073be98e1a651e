//! Failure taxonomy and the crate-level error type.
//!
//! Every failure that reaches a caller is either an [`ErrorRecord`] (a
//! classified venue/transport failure) or one of the local conditions in
//! [`TransportError`].

use std::{fmt, time::Duration};

use thiserror::Error;

/// The main result type used throughout the connectivity core.
pub type TransportResult<T> = Result<T, TransportError>;

/// Closed set of failure classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The attempt did not complete before its deadline.
    Timeout,
    /// The venue could not be reached (refused, reset, closed, DNS).
    NetworkUnavailable,
    /// The venue throttled the caller (HTTP 429 or equivalent).
    RateLimited,
    /// Credentials or signature rejected (HTTP 401/403 or equivalent).
    AuthInvalid,
    /// The request itself is malformed (4xx other than 401/403/429).
    ClientRequestInvalid,
    /// The venue failed internally (5xx or maintenance).
    VenueUnavailable,
    /// The response did not match the expected shape.
    SchemaViolation,
    /// Anything not recognised by the classifier.
    Unknown,
}

impl ErrorKind {
    /// Whether a failure of this kind is transient and worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::NetworkUnavailable | Self::VenueUnavailable | Self::RateLimited
        )
    }

    /// Stable snake_case name, used in logs and `Display`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NetworkUnavailable => "network_unavailable",
            Self::RateLimited => "rate_limited",
            Self::AuthInvalid => "auth_invalid",
            Self::ClientRequestInvalid => "client_request_invalid",
            Self::VenueUnavailable => "venue_unavailable",
            Self::SchemaViolation => "schema_violation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, classified failure.
///
/// Produced by [`crate::classify::ErrorClassifier`], consumed by
/// [`crate::retry::RetryPolicy`] and surfaced to callers unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind} error from {venue}: {message}")]
pub struct ErrorRecord {
    kind: ErrorKind,
    code: Option<String>,
    venue: String,
    message: String,
    correlation_id: Option<String>,
    cause: Option<String>,
    retry_after: Option<Duration>,
}

impl ErrorRecord {
    /// Create a record with the mandatory fields.
    pub fn new(kind: ErrorKind, venue: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            venue: venue.into(),
            message: message.into(),
            correlation_id: None,
            cause: None,
            retry_after: None,
        }
    }

    /// Attach the venue's own status or error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach the id of the request that failed.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Attach a description of the underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attach a venue-suggested wait before retrying.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Whether the caller can fix this by changing the request.
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ClientRequestInvalid | ErrorKind::SchemaViolation
        )
    }
}

/// Error type for all public operations of the connectivity core.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A classified venue or transport failure.
    #[error(transparent)]
    Venue(Box<ErrorRecord>),

    /// Frames can only be sent while the connection is `Connected`.
    #[error("Not connected")]
    NotConnected,

    /// The client was disconnected and will not reconnect.
    #[error("Connection closed")]
    Closed,

    /// Connecting failed and every allowed attempt was used.
    #[error("Gave up after {attempts} connection attempts: {last}")]
    ReconnectExhausted {
        attempts: u32,
        last: Box<ErrorRecord>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<ErrorRecord> for TransportError {
    fn from(record: ErrorRecord) -> Self {
        Self::Venue(Box::new(record))
    }
}

impl TransportError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The classified record behind this error, if there is one.
    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            Self::Venue(record) => Some(record),
            Self::ReconnectExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Venue(record) => record.kind(),
            Self::ReconnectExhausted { last, .. } => last.kind(),
            Self::NotConnected | Self::Closed => ErrorKind::NetworkUnavailable,
            Self::Serialization(_) => ErrorKind::SchemaViolation,
            Self::Config { .. } | Self::Internal { .. } => ErrorKind::Unknown,
        }
    }
}
