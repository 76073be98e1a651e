//! Custom Protocol Handler Example
//!
//! Implements a `ProtocolHandler` for a hypothetical venue whose streams are
//! named `<channel>@<symbol>` and whose heartbeat is a bare `"ping"` text.
//!
//! Run with: `cargo run -p venue-link --example ws_custom_handler -- wss://stream.example.com/ws`

use std::time::Duration;

use serde_json::{Value, json};
use venue_link::{
    ReconnectConfig, StreamClient, StreamConfig, TransportResult, VenueContext,
    stream::{
        ConnectionEvent, Frame, HeartbeatConfig, ProtocolHandler, SubscriptionKey,
        TungsteniteConnector,
    },
};

/// Handler for a hypothetical venue.
struct HypotheticalVenueHandler {
    api_key: String,
}

impl HypotheticalVenueHandler {
    fn stream_name(key: &SubscriptionKey) -> String {
        match key.params.get("symbol").and_then(Value::as_str) {
            Some(symbol) => format!("{}@{}", key.channel, symbol.to_lowercase()),
            None => key.channel.clone(),
        }
    }
}

impl ProtocolHandler for HypotheticalVenueHandler {
    fn on_connect(&self) -> Vec<Frame> {
        vec![Frame::text(
            json!({"method": "LOGIN", "key": self.api_key}).to_string(),
        )]
    }

    fn build_subscribe(&self, key: &SubscriptionKey) -> Frame {
        Frame::text(json!({"method": "SUBSCRIBE", "params": [Self::stream_name(key)]}).to_string())
    }

    fn build_unsubscribe(&self, key: &SubscriptionKey) -> Frame {
        Frame::text(
            json!({"method": "UNSUBSCRIBE", "params": [Self::stream_name(key)]}).to_string(),
        )
    }

    fn route(&self, message: &str) -> Option<SubscriptionKey> {
        let json: Value = serde_json::from_str(message).ok()?;
        let stream = json.get("stream")?.as_str()?;
        Some(match stream.split_once('@') {
            Some((channel, symbol)) => {
                SubscriptionKey::new(channel, json!({"symbol": symbol.to_uppercase()}))
            }
            None => SubscriptionKey::channel(stream),
        })
    }

    fn is_pong(&self, message: &str) -> bool {
        message == "pong"
    }

    fn reply_to_ping(&self, message: &str) -> Option<Frame> {
        (message == "ping").then(|| Frame::text("pong"))
    }
}

#[tokio::main]
async fn main() -> TransportResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://stream.example.com/ws".to_string());

    let config = StreamConfig::new(url)
        .heartbeat(
            HeartbeatConfig::default()
                .interval(Duration::from_secs(15))
                .ping_payload("ping"),
        )
        .reconnect(ReconnectConfig::new().max_attempts(Some(5)));

    let client = StreamClient::new(
        config,
        HypotheticalVenueHandler {
            api_key: std::env::var("VENUE_API_KEY").unwrap_or_default(),
        },
        TungsteniteConnector::new(),
        VenueContext::new("hypothetical"),
    )?;

    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectionEvent::Reconnecting(attempt) => {
                    println!("reconnecting (attempt {}, in {:?})", attempt.attempt, attempt.delay);
                }
                ConnectionEvent::MaxRetriesExceeded { attempts } => {
                    println!("giving up after {attempts} attempts");
                }
                other => println!("{other:?}"),
            }
        }
    });

    client.connect().await?;
    let mut trades = client
        .subscribe("trade", json!({"symbol": "BTCUSDT"}))
        .await?;

    for _ in 0..10 {
        match trades.recv().await {
            Some(frame) => println!("{}", frame.as_text().unwrap_or("<binary>")),
            None => break,
        }
    }

    trades.cancel();
    client.disconnect().await
}
