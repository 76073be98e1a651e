//! # venue-link
//!
//! Resilient connectivity core for trading venue adapters.
//!
//! Two halves share one per-client [`VenueContext`]:
//!
//! - **Streaming**: a [`StreamClient`] keeps one logical connection alive
//!   across socket failures. It runs a connection state machine, heartbeats,
//!   bounded exponential reconnects and a subscription registry that replays
//!   every live subscription after each reconnect.
//! - **Request/response**: a [`RequestExecutor`] throttles through the shared
//!   [`RateLimiter`], applies a deadline per attempt, classifies failures into
//!   a closed [`ErrorKind`] taxonomy and retries the transient ones.
//!
//! Venue adapters supply the schema-dependent pieces: a
//! [`ProtocolHandler`](stream::ProtocolHandler) for frames, a
//! [`PhraseTable`] for error text and a [`RequestSigner`] for authentication.
//!
//! ## Features
//!
//! - `websocket` (default): [`stream::TungsteniteConnector`].
//! - `http` (default): [`http::ReqwestTransport`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use venue_link::{
//!     ClientConfig, Request, VenueClient,
//!     http::{HttpConfig, ReqwestTransport},
//!     stream::{TungsteniteConnector, handlers::JsonChannelHandler},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("example", "wss://stream.example.com/ws");
//!     let transport = ReqwestTransport::new(HttpConfig::new("https://api.example.com"))?;
//!     let client = VenueClient::new(
//!         config,
//!         transport,
//!         JsonChannelHandler::new(),
//!         TungsteniteConnector::new(),
//!     )?;
//!
//!     client.connect().await?;
//!     let mut trades = client.subscribe("trades", json!({"symbol": "BTC-USD"})).await?;
//!     let ticker = client.request(Request::get("/ticker").query("symbol", "BTC-USD")).await?;
//!     println!("{}", ticker.text());
//!
//!     while let Some(frame) = trades.recv().await {
//!         println!("{frame:?}");
//!     }
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod client;
pub mod context;
pub mod error;
pub mod executor;
pub mod rate_limit;
pub mod reconnect;
pub mod retry;
pub mod stream;
pub mod transport;

#[cfg(feature = "http")]
pub mod http;

// Re-export commonly used types
pub use classify::{ErrorClassifier, PhraseTable, RawFailure};
pub use client::{ClientConfig, VenueClient};
pub use context::VenueContext;
pub use error::{ErrorKind, ErrorRecord, TransportError, TransportResult};
pub use executor::RequestExecutor;
pub use rate_limit::{BucketConfig, BucketScope, RateLimitConfig, RateLimiter};
pub use reconnect::{ReconnectAttempt, ReconnectConfig, ReconnectionScheduler, compute_delay};
pub use retry::{RetryConfig, RetryContext, RetryDecision, RetryPolicy};
pub use stream::{
    ConnectionEvent, ConnectionState, Frame, HeartbeatConfig, StreamClient, StreamConfig,
    Subscription,
};
pub use transport::{Method, NoSigner, Request, RequestSigner, Response, Transport};
