//! Mapping raw transport failures into the [`ErrorKind`] taxonomy.
//!
//! Classification is layered: structured information (HTTP status, venue
//! error code, timeout/IO signals) wins; otherwise the failure text is
//! matched case-insensitively against a versioned per-venue [`PhraseTable`],
//! then against a generic table. Anything left over is [`ErrorKind::Unknown`].

use std::{collections::HashMap, io, time::Duration};

use serde_json::Value;

use crate::error::{ErrorKind, ErrorRecord};

/// Whatever the transport produced when an attempt failed.
#[derive(Clone, Debug)]
pub enum RawFailure {
    /// The attempt hit its deadline.
    Timeout,
    /// Socket-level failure.
    Io { kind: io::ErrorKind, message: String },
    /// A non-success HTTP status, with the response body if one was read.
    Status {
        status: u16,
        body: Option<String>,
        retry_after: Option<Duration>,
    },
    /// A venue's own structured failure (e.g. `{"code": -1021, "msg": ".."}`).
    Venue {
        code: Option<String>,
        message: String,
    },
    /// The response could not be parsed into the expected shape.
    Parse(String),
    /// The socket was closed by the remote side.
    Closed(Option<String>),
    /// Anything else, as text.
    Other(String),
}

impl RawFailure {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    pub fn io(err: &io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Self::Io { message, .. } => Some(message),
            Self::Status { body, .. } => body.as_deref(),
            Self::Venue { message, .. } => Some(message),
            Self::Parse(message) | Self::Other(message) => Some(message),
            Self::Closed(reason) => reason.as_deref(),
            Self::Timeout => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Timeout => "operation timed out".to_string(),
            Self::Io { message, .. } => message.clone(),
            Self::Status { status, body, .. } => match body {
                Some(body) if !body.is_empty() => format!("HTTP {status}: {body}"),
                _ => format!("HTTP {status}"),
            },
            Self::Venue { code, message } => match code {
                Some(code) => format!("[{code}] {message}"),
                None => message.clone(),
            },
            Self::Parse(message) => format!("unexpected response shape: {message}"),
            Self::Closed(Some(reason)) => format!("connection closed: {reason}"),
            Self::Closed(None) => "connection closed".to_string(),
            Self::Other(message) => message.clone(),
        }
    }
}

impl From<io::Error> for RawFailure {
    fn from(err: io::Error) -> Self {
        Self::io(&err)
    }
}

impl From<serde_json::Error> for RawFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Versioned lookup table of venue error codes and phrases.
///
/// Phrase matching is a best-effort heuristic over third-party text; keep
/// one table per venue and bump `version` whenever the wording changes.
#[derive(Clone, Debug)]
pub struct PhraseTable {
    version: String,
    code_field: String,
    codes: HashMap<String, ErrorKind>,
    phrases: Vec<(String, ErrorKind)>,
}

impl Default for PhraseTable {
    fn default() -> Self {
        Self {
            version: String::new(),
            code_field: "code".to_string(),
            codes: HashMap::new(),
            phrases: Vec::new(),
        }
    }
}

impl PhraseTable {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    /// Map an exact venue error code to a kind.
    #[must_use]
    pub fn code(mut self, code: impl Into<String>, kind: ErrorKind) -> Self {
        self.codes.insert(code.into(), kind);
        self
    }

    /// Field of a JSON error body holding the venue code (default `code`).
    #[must_use]
    pub fn code_field(mut self, field: impl Into<String>) -> Self {
        self.code_field = field.into();
        self
    }

    /// Map a phrase (matched case-insensitively as a substring) to a kind.
    ///
    /// Phrases are checked in insertion order.
    #[must_use]
    pub fn phrase(mut self, phrase: impl AsRef<str>, kind: ErrorKind) -> Self {
        self.phrases
            .push((phrase.as_ref().to_lowercase(), kind));
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn lookup_code(&self, code: &str) -> Option<ErrorKind> {
        self.codes.get(code).copied()
    }

    /// The venue code in an HTTP error body, with its kind, if this table
    /// knows it. The body may be the bare code or a JSON object carrying it.
    pub fn lookup_body(&self, body: &str) -> Option<(String, ErrorKind)> {
        let body = body.trim();
        if let Some(kind) = self.lookup_code(body) {
            return Some((body.to_string(), kind));
        }

        let json: Value = serde_json::from_str(body).ok()?;
        let code = match json.get(&self.code_field)? {
            Value::String(code) => code.clone(),
            Value::Number(code) => code.to_string(),
            _ => return None,
        };
        let kind = self.lookup_code(&code)?;
        Some((code, kind))
    }

    pub fn match_text(&self, text: &str) -> Option<ErrorKind> {
        let haystack = text.to_lowercase();
        self.phrases
            .iter()
            .find(|(phrase, _)| haystack.contains(phrase.as_str()))
            .map(|(_, kind)| *kind)
    }

    /// Wording common to most HTTP and WebSocket stacks.
    pub fn generic() -> Self {
        Self::new("generic-1")
            .phrase("too many requests", ErrorKind::RateLimited)
            .phrase("rate limit", ErrorKind::RateLimited)
            .phrase("request weight", ErrorKind::RateLimited)
            .phrase("timed out", ErrorKind::Timeout)
            .phrase("timeout", ErrorKind::Timeout)
            .phrase("invalid signature", ErrorKind::AuthInvalid)
            .phrase("invalid api key", ErrorKind::AuthInvalid)
            .phrase("unauthorized", ErrorKind::AuthInvalid)
            .phrase("forbidden", ErrorKind::AuthInvalid)
            .phrase("connection refused", ErrorKind::NetworkUnavailable)
            .phrase("connection reset", ErrorKind::NetworkUnavailable)
            .phrase("broken pipe", ErrorKind::NetworkUnavailable)
            .phrase("dns", ErrorKind::NetworkUnavailable)
            .phrase("service unavailable", ErrorKind::VenueUnavailable)
            .phrase("maintenance", ErrorKind::VenueUnavailable)
            .phrase("internal server error", ErrorKind::VenueUnavailable)
            .phrase("bad gateway", ErrorKind::VenueUnavailable)
            .phrase("invalid parameter", ErrorKind::ClientRequestInvalid)
            .phrase("bad request", ErrorKind::ClientRequestInvalid)
    }
}

/// Total mapping from [`RawFailure`] to [`ErrorRecord`].
#[derive(Clone, Debug)]
pub struct ErrorClassifier {
    venue: String,
    table: PhraseTable,
    fallback: PhraseTable,
}

impl ErrorClassifier {
    /// Classifier with only the generic phrase table.
    pub fn new(venue: impl Into<String>) -> Self {
        Self::with_table(venue, PhraseTable::default())
    }

    /// Classifier consulting `table` before the generic phrases.
    pub fn with_table(venue: impl Into<String>, table: PhraseTable) -> Self {
        Self {
            venue: venue.into(),
            table,
            fallback: PhraseTable::generic(),
        }
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn table_version(&self) -> &str {
        self.table.version()
    }

    /// Classify a failure. Never fails; unrecognised input is `Unknown`.
    pub fn classify(&self, raw: &RawFailure) -> ErrorRecord {
        // A known venue code in the body is more precise than the status.
        let body_code = match raw {
            RawFailure::Status {
                body: Some(body), ..
            } => self.table.lookup_body(body),
            _ => None,
        };
        let kind = match &body_code {
            Some((_, kind)) => *kind,
            None => self.kind_of(raw),
        };
        let mut record = ErrorRecord::new(kind, self.venue.as_str(), raw.describe());

        match raw {
            RawFailure::Status {
                status,
                retry_after,
                ..
            } => {
                let code = body_code.map_or_else(|| status.to_string(), |(code, _)| code);
                record = record.with_code(code);
                if let Some(retry_after) = retry_after {
                    record = record.with_retry_after(*retry_after);
                }
            }
            RawFailure::Venue {
                code: Some(code), ..
            } => {
                record = record.with_code(code.as_str());
            }
            RawFailure::Io { kind, .. } => {
                record = record.with_cause(format!("{kind:?}"));
            }
            _ => {}
        }

        record
    }

    fn kind_of(&self, raw: &RawFailure) -> ErrorKind {
        if let Some(kind) = self.structured_kind(raw) {
            return kind;
        }

        raw.text()
            .and_then(|text| {
                self.table
                    .match_text(text)
                    .or_else(|| self.fallback.match_text(text))
            })
            .unwrap_or_else(|| match raw {
                RawFailure::Closed(_) => ErrorKind::NetworkUnavailable,
                _ => ErrorKind::Unknown,
            })
    }

    fn structured_kind(&self, raw: &RawFailure) -> Option<ErrorKind> {
        match raw {
            RawFailure::Timeout => Some(ErrorKind::Timeout),
            RawFailure::Parse(_) => Some(ErrorKind::SchemaViolation),
            RawFailure::Io { kind, .. } => io_kind(*kind),
            RawFailure::Status { status, .. } => status_kind(*status),
            RawFailure::Venue { code, .. } => {
                code.as_deref().and_then(|code| self.table.lookup_code(code))
            }
            RawFailure::Closed(_) | RawFailure::Other(_) => None,
        }
    }
}

fn status_kind(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimited),
        401 | 403 => Some(ErrorKind::AuthInvalid),
        400..=499 => Some(ErrorKind::ClientRequestInvalid),
        500..=599 => Some(ErrorKind::VenueUnavailable),
        _ => None,
    }
}

fn io_kind(kind: io::ErrorKind) -> Option<ErrorKind> {
    match kind {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Some(ErrorKind::Timeout),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::UnexpectedEof => Some(ErrorKind::NetworkUnavailable),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ErrorClassifier {
        let table = PhraseTable::new("test-1")
            .code("-1021", ErrorKind::Timeout)
            .code("-1015", ErrorKind::RateLimited)
            .code("-2010", ErrorKind::ClientRequestInvalid)
            .phrase("Account has insufficient balance", ErrorKind::ClientRequestInvalid);
        ErrorClassifier::with_table("testex", table)
    }

    fn status(status: u16) -> RawFailure {
        RawFailure::Status {
            status,
            body: None,
            retry_after: None,
        }
    }

    #[test]
    fn test_status_codes() {
        let c = classifier();
        assert_eq!(c.classify(&status(429)).kind(), ErrorKind::RateLimited);
        assert_eq!(c.classify(&status(401)).kind(), ErrorKind::AuthInvalid);
        assert_eq!(c.classify(&status(403)).kind(), ErrorKind::AuthInvalid);
        assert_eq!(
            c.classify(&status(400)).kind(),
            ErrorKind::ClientRequestInvalid
        );
        assert_eq!(
            c.classify(&status(404)).kind(),
            ErrorKind::ClientRequestInvalid
        );
        assert_eq!(c.classify(&status(502)).kind(), ErrorKind::VenueUnavailable);
        assert_eq!(c.classify(&status(503)).code(), Some("503"));
    }

    #[test]
    fn test_structured_venue_code_wins() {
        let c = classifier();
        let raw = RawFailure::Venue {
            code: Some("-1015".to_string()),
            message: "Invalid parameter".to_string(),
        };
        let record = c.classify(&raw);
        assert_eq!(record.kind(), ErrorKind::RateLimited);
        assert_eq!(record.code(), Some("-1015"));
        assert_eq!(record.venue(), "testex");
    }

    #[test]
    fn test_venue_code_in_json_body_beats_status() {
        let c = classifier();
        let raw = RawFailure::Status {
            status: 400,
            body: Some(r#"{"code":-1015,"msg":"Too many new orders."}"#.to_string()),
            retry_after: None,
        };
        let record = c.classify(&raw);
        assert_eq!(record.kind(), ErrorKind::RateLimited);
        assert_eq!(record.code(), Some("-1015"));

        // String codes and bare codes are read as well.
        let raw = RawFailure::Status {
            status: 400,
            body: Some(r#"{"code":"-1021"}"#.to_string()),
            retry_after: None,
        };
        assert_eq!(c.classify(&raw).kind(), ErrorKind::Timeout);
        let raw = RawFailure::Status {
            status: 400,
            body: Some(" -1015\n".to_string()),
            retry_after: None,
        };
        assert_eq!(c.classify(&raw).kind(), ErrorKind::RateLimited);
    }

    #[test]
    fn test_unknown_body_code_falls_back_to_status() {
        let c = classifier();
        let raw = RawFailure::Status {
            status: 400,
            body: Some(r#"{"code":-4242,"msg":"nope"}"#.to_string()),
            retry_after: None,
        };
        let record = c.classify(&raw);
        assert_eq!(record.kind(), ErrorKind::ClientRequestInvalid);
        assert_eq!(record.code(), Some("400"));
    }

    #[test]
    fn test_custom_code_field() {
        let table = PhraseTable::new("v2")
            .code_field("retCode")
            .code("10006", ErrorKind::RateLimited);
        let c = ErrorClassifier::with_table("x", table);
        let raw = RawFailure::Status {
            status: 403,
            body: Some(r#"{"retCode":10006,"retMsg":"Too many visits!"}"#.to_string()),
            retry_after: None,
        };
        assert_eq!(c.classify(&raw).kind(), ErrorKind::RateLimited);
    }

    #[test]
    fn test_phrase_fallback_is_case_insensitive() {
        let c = classifier();
        let raw = RawFailure::Venue {
            code: Some("-9999".to_string()),
            message: "ACCOUNT HAS INSUFFICIENT BALANCE for requested action".to_string(),
        };
        assert_eq!(c.classify(&raw).kind(), ErrorKind::ClientRequestInvalid);

        let raw = RawFailure::other("Service Unavailable, try later");
        assert_eq!(c.classify(&raw).kind(), ErrorKind::VenueUnavailable);
    }

    #[test]
    fn test_venue_table_before_generic() {
        let table = PhraseTable::new("v1").phrase("timeout", ErrorKind::VenueUnavailable);
        let c = ErrorClassifier::with_table("x", table);
        let raw = RawFailure::other("matching engine timeout");
        assert_eq!(c.classify(&raw).kind(), ErrorKind::VenueUnavailable);
        assert_eq!(c.table_version(), "v1");
    }

    #[test]
    fn test_io_and_timeout() {
        let c = classifier();
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            c.classify(&RawFailure::from(refused)).kind(),
            ErrorKind::NetworkUnavailable
        );
        assert_eq!(c.classify(&RawFailure::Timeout).kind(), ErrorKind::Timeout);
        assert_eq!(
            c.classify(&RawFailure::Closed(None)).kind(),
            ErrorKind::NetworkUnavailable
        );
    }

    #[test]
    fn test_parse_failure_is_schema_violation() {
        let c = classifier();
        let err = serde_json::from_str::<u64>("{not json").unwrap_err();
        assert_eq!(
            c.classify(&RawFailure::from(err)).kind(),
            ErrorKind::SchemaViolation
        );
    }

    #[test]
    fn test_unrecognised_input_is_unknown() {
        let c = classifier();
        assert_eq!(
            c.classify(&RawFailure::other("¯\\_(ツ)_/¯")).kind(),
            ErrorKind::Unknown
        );
        assert_eq!(c.classify(&status(302)).kind(), ErrorKind::Unknown);
        assert_eq!(
            c.classify(&RawFailure::Venue {
                code: None,
                message: String::new()
            })
            .kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_retry_after_is_carried() {
        let c = classifier();
        let raw = RawFailure::Status {
            status: 429,
            body: Some("slow down".to_string()),
            retry_after: Some(Duration::from_secs(3)),
        };
        let record = c.classify(&raw);
        assert_eq!(record.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(record.message(), "HTTP 429: slow down");
    }
}
