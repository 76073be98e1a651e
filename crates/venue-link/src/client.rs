//! The per-venue facade composing the streaming and request halves.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::{
    classify::{ErrorClassifier, PhraseTable},
    context::VenueContext,
    error::{TransportError, TransportResult},
    executor::{DEFAULT_TIMEOUT, RequestExecutor},
    rate_limit::{RateLimitConfig, RateLimiter},
    retry::RetryConfig,
    stream::{
        ConnectionEvent, ConnectionState, Connector, Frame, ProtocolHandler, StreamClient,
        StreamConfig, Subscription, SubscriptionInfo,
    },
    transport::{Request, RequestSigner, Response, Transport},
};

/// Configuration for a [`VenueClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Venue name carried by every error record and log line.
    pub venue: String,
    /// Streaming half.
    pub stream: StreamConfig,
    /// Retry policy for `request`.
    pub retry: RetryConfig,
    /// Buckets and weights shared by every request of this client.
    pub rate_limit: RateLimitConfig,
    /// Venue phrase table for error classification; the generic table is
    /// always consulted after it.
    pub phrase_table: Option<PhraseTable>,
    /// Per-attempt deadline for requests that do not set their own.
    pub default_timeout: Duration,
}

impl ClientConfig {
    pub fn new(venue: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            stream: StreamConfig::new(stream_url),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            phrase_table: None,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn phrase_table(mut self, table: PhraseTable) -> Self {
        self.phrase_table = Some(table);
        self
    }

    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.venue.is_empty() {
            return Err("Venue name cannot be empty".to_string());
        }
        if self.default_timeout.is_zero() {
            return Err("Default timeout must be > 0".to_string());
        }
        self.stream.validate()?;
        self.retry.validate()?;
        self.rate_limit.validate()
    }
}

/// One venue's connectivity: a streaming connection plus a request executor
/// sharing one [`VenueContext`].
pub struct VenueClient<T> {
    context: VenueContext,
    executor: RequestExecutor<T>,
    stream: StreamClient,
}

impl<T: Transport> VenueClient<T> {
    /// Build the client. The stream stays `Disconnected` until
    /// [`connect`](Self::connect). Must be called within a Tokio runtime.
    pub fn new<C, H>(
        config: ClientConfig,
        transport: T,
        handler: H,
        connector: C,
    ) -> TransportResult<Self>
    where
        C: Connector,
        H: ProtocolHandler,
    {
        config.validate().map_err(TransportError::config)?;

        let classifier = match config.phrase_table {
            Some(table) => ErrorClassifier::with_table(config.venue.as_str(), table),
            None => ErrorClassifier::new(config.venue.as_str()),
        };
        let limiter = RateLimiter::from_config(&config.rate_limit).map_err(TransportError::config)?;
        let context = VenueContext::new(config.venue)
            .with_classifier(classifier)
            .with_limiter(limiter.into());

        let executor = RequestExecutor::new(transport, context.clone(), config.retry)?
            .with_default_timeout(config.default_timeout);
        let stream = StreamClient::new(config.stream, handler, connector, context.clone())?;

        tracing::debug!(
            venue = context.venue(),
            table = context.classifier().table_version(),
            "Venue client created"
        );
        Ok(Self {
            context,
            executor,
            stream,
        })
    }

    /// Sign every request with `signer`.
    #[must_use]
    pub fn with_signer(mut self, signer: impl RequestSigner + 'static) -> Self {
        self.executor = self.executor.with_signer(signer);
        self
    }

    pub fn venue(&self) -> &str {
        self.context.venue()
    }

    pub fn context(&self) -> &VenueContext {
        &self.context
    }

    /// The streaming half, for callers that want their own handle clone.
    pub fn stream(&self) -> &StreamClient {
        &self.stream
    }

    pub async fn connect(&self) -> TransportResult<()> {
        self.stream.connect().await
    }

    pub async fn disconnect(&self) -> TransportResult<()> {
        self.stream.disconnect().await
    }

    pub async fn send(&self, frame: Frame) -> TransportResult<()> {
        self.stream.send(frame).await
    }

    pub async fn subscribe(
        &self,
        channel: impl Into<String>,
        params: Value,
    ) -> TransportResult<Subscription> {
        self.stream.subscribe(channel, params).await
    }

    pub async fn request(&self, request: Request) -> TransportResult<Response> {
        self.executor.execute(request).await
    }

    pub async fn request_json<R: DeserializeOwned>(&self, request: Request) -> TransportResult<R> {
        self.executor.execute_json(request).await
    }

    pub fn state(&self) -> ConnectionState {
        self.stream.state()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.stream.state_watch()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.stream.events()
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.stream.subscriptions().await
    }

    pub async fn subscription_count(&self) -> usize {
        self.stream.subscription_count().await
    }
}

impl<T> std::fmt::Debug for VenueClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueClient")
            .field("venue", &self.context.venue())
            .field("stream", &self.stream)
            .finish()
    }
}
