//! HTTP [`Transport`] backed by `reqwest`.
//!
//! One attempt per call. Retries, rate limiting, signing and classification
//! happen in [`crate::executor::RequestExecutor`].

use std::{collections::HashMap, io, time::Duration};

use async_trait::async_trait;

use crate::{
    classify::RawFailure,
    error::{TransportError, TransportResult},
    transport::{Request, Response, Transport},
};

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL every request endpoint is appended to.
    pub base_url: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// Pool idle timeout.
    pub pool_idle_timeout: Duration,

    /// Maximum idle connections kept per host.
    pub max_idle_per_host: usize,

    /// Headers included with every request.
    pub default_headers: HashMap<String, String>,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("venue-link/", env!("CARGO_PKG_VERSION")).to_string(),
            pool_idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 32,
            default_headers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!("Invalid base URL: {}", self.base_url));
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout cannot be zero".to_string());
        }
        Ok(())
    }
}

/// Sends [`Request`]s with a pooled `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: HttpConfig,
}

impl ReqwestTransport {
    pub fn new(config: HttpConfig) -> TransportResult<Self> {
        config.validate().map_err(TransportError::config)?;

        let mut headers = http::HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::config(format!("Invalid header name {name}: {e}")))?;
            let value = http::HeaderValue::from_str(value)
                .map_err(|e| TransportError::config(format!("Invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::config(format!("Failed to build client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Use an already configured client.
    pub fn with_client(client: reqwest::Client, config: HttpConfig) -> TransportResult<Self> {
        config.validate().map_err(TransportError::config)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = endpoint.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<Response, RawFailure> {
        let mut builder = self
            .client
            .request(request.method.into(), self.url(&request.endpoint));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_error)?;

        tracing::debug!(
            request_id = %request.id,
            method = %request.method,
            endpoint = %request.endpoint,
            status,
            "HTTP response received"
        );

        Ok(Response {
            request_id: request.id,
            status,
            headers,
            body,
        })
    }
}

fn map_error(err: reqwest::Error) -> RawFailure {
    if err.is_timeout() {
        RawFailure::Timeout
    } else if err.is_connect() {
        RawFailure::Io {
            kind: io::ErrorKind::ConnectionRefused,
            message: err.to_string(),
        }
    } else if err.is_decode() || err.is_body() {
        RawFailure::Io {
            kind: io::ErrorKind::UnexpectedEof,
            message: err.to_string(),
        }
    } else {
        RawFailure::other(err.to_string())
    }
}
