//! Request/response abstractions consumed by [`crate::executor::RequestExecutor`].

use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{classify::RawFailure, error::TransportResult};

/// Unique identifier for requests, used as the correlation id of failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP method enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        })
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => http::Method::GET,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Delete => http::Method::DELETE,
            Method::Patch => http::Method::PATCH,
        }
    }
}

/// One logical call: method, target, body, deadline and rate-limit weight.
///
/// The executor clones the request for every attempt, so signers always
/// start from the unsigned original.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub method: Method,
    /// Endpoint path (e.g. `/api/v3/order`), resolved against the
    /// transport's base URL.
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Per-attempt deadline; the executor's default applies when unset.
    pub timeout: Option<Duration>,
    /// Rate-limit weight; the endpoint's configured weight applies when unset.
    pub weight: Option<u32>,
}

impl Request {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            method,
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
            weight: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Post, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Put, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Delete, endpoint)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize>(mut self, data: &T) -> TransportResult<Self> {
        let json_str = serde_json::to_string(data)?;
        self.body = Some(json_str.into());
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// A response as read off the wire.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: RequestId,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Response {
    pub fn new(request_id: RequestId, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `Retry-After` given in seconds, if present.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the response body as JSON.
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> TransportResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Executes one attempt of a request.
///
/// Implementations do not retry, throttle or classify; non-2xx responses are
/// returned as `Ok` and judged by the executor.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: Request) -> Result<Response, RawFailure>;
}

/// Per-venue request signing, invoked before every attempt.
#[async_trait]
pub trait RequestSigner: Send + Sync + fmt::Debug {
    /// Sign the request in place (headers, query or body).
    async fn sign(&self, request: &mut Request) -> TransportResult<()>;
}

/// Leaves requests untouched.
#[derive(Debug, Clone, Default)]
pub struct NoSigner;

#[async_trait]
impl RequestSigner for NoSigner {
    async fn sign(&self, _request: &mut Request) -> TransportResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let request = Request::get("/api/v3/depth")
            .header("Accept", "application/json")
            .query("limit", "10")
            .timeout(Duration::from_secs(30))
            .weight(5);

        assert_eq!(request.method, Method::Get);
        assert_eq!(request.endpoint, "/api/v3/depth");
        assert_eq!(
            request.headers.get("Accept"),
            Some(&"application/json".to_string())
        );
        assert_eq!(request.query, vec![("limit".to_string(), "10".to_string())]);
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
        assert_eq!(request.weight, Some(5));
    }

    #[test]
    fn test_request_json() {
        #[derive(Serialize)]
        struct NewOrder {
            symbol: String,
            qty: u32,
        }

        let request = Request::post("/order")
            .json(&NewOrder {
                symbol: "BTCUSDT".to_string(),
                qty: 1,
            })
            .unwrap();

        assert_eq!(
            request.body.as_deref(),
            Some(br#"{"symbol":"BTCUSDT","qty":1}"#.as_slice())
        );
        assert_eq!(
            request.headers.get("Content-Type"),
            Some(&"application/json".to_string())
        );
    }

    #[test]
    fn test_response_helpers() {
        let response = Response::new(RequestId::new(), 429, "slow down")
            .with_header("Retry-After", " 7 ");
        assert!(!response.is_success());
        assert_eq!(response.header("retry-after"), Some(" 7 "));
        assert_eq!(response.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(response.text(), "slow down");

        let response = Response::new(RequestId::new(), 200, r#"{"price":"1.5"}"#);
        assert!(response.is_success());
        assert!(response.retry_after().is_none());
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["price"], "1.5");
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(http::Method::from(Method::Delete), http::Method::DELETE);
        assert_eq!(Method::Patch.to_string(), "PATCH");
    }
}
