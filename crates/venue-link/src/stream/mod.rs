//! Long-lived streaming connections.
//!
//! A [`StreamClient`] owns one logical connection to a venue. It survives
//! socket drops: failed sockets are torn down, a replacement is opened on the
//! reconnect schedule and every live subscription is replayed on it.
//!
//! ```text
//! ┌──────────────┐  commands   ┌──────────────────┐  frames  ┌─────────┐
//! │ StreamClient │────────────▶│  driver task     │◀────────▶│  venue  │
//! │   (Clone)    │◀── state ───│  state machine   │          └─────────┘
//! └──────────────┘◀── events ──│  heartbeat       │
//! ┌──────────────┐             │  reconnect sched │
//! │ Subscription │◀── frames ──│  registry        │
//! └──────────────┘── cancel ──▶└──────────────────┘
//! ```
//!
//! ```rust,ignore
//! use venue_link::{VenueContext, stream::{StreamClient, StreamConfig, TungsteniteConnector}};
//! use venue_link::stream::handlers::JsonChannelHandler;
//!
//! let client = StreamClient::new(
//!     StreamConfig::new("wss://stream.example.com/ws"),
//!     JsonChannelHandler::new(),
//!     TungsteniteConnector::new(),
//!     VenueContext::new("example"),
//! )?;
//! client.connect().await?;
//!
//! let mut trades = client.subscribe("trades", json!({"symbol": "BTC-USD"})).await?;
//! while let Some(frame) = trades.recv().await {
//!     println!("{frame:?}");
//! }
//! ```

pub mod config;
mod connection;
pub mod events;
pub mod handlers;
pub mod heartbeat;
pub mod protocol;
pub mod socket;
pub mod state;
pub mod subscription;
#[cfg(feature = "websocket")]
mod tungstenite;
pub mod types;

pub use config::{HeartbeatConfig, StreamConfig};
pub use connection::StreamClient;
pub use events::ConnectionEvent;
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use protocol::{Inbound, ProtocolHandler};
pub use socket::{Connector, FrameReader, FrameWriter, SocketParts};
pub use state::{ConnectionState, ConnectionStateMachine};
pub use subscription::{Subscription, SubscriptionInfo, SubscriptionRegistry, SubscriptionStatus};
#[cfg(feature = "websocket")]
pub use tungstenite::TungsteniteConnector;
pub use types::{Frame, SubscriptionId, SubscriptionKey};
