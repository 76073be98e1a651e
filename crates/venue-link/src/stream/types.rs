//! Frames and subscription identity.

use std::fmt;

use bytes::Bytes;
use serde_json::Value;

/// One WebSocket-style frame, inbound or outbound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    /// Protocol-level liveness probe.
    Ping(Bytes),
    /// Protocol-level liveness response.
    Pong(Bytes),
}

impl Frame {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Get as text if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text and binary frames carry data; ping/pong are control frames.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text(_) | Self::Binary(_))
    }
}

/// Stable identity of a subscription: channel name plus serialized params.
///
/// Object keys serialize in sorted order, so two keys with the same params
/// map to the same id regardless of how the params were built.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a caller subscribed to.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionKey {
    pub channel: String,
    pub params: Value,
}

impl SubscriptionKey {
    pub fn new(channel: impl Into<String>, params: Value) -> Self {
        Self {
            channel: channel.into(),
            params,
        }
    }

    /// A channel with no parameters.
    pub fn channel(channel: impl Into<String>) -> Self {
        Self::new(channel, Value::Null)
    }

    pub fn id(&self) -> SubscriptionId {
        if self.params.is_null() {
            SubscriptionId(self.channel.clone())
        } else {
            SubscriptionId(format!("{}:{}", self.channel, self.params))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_subscription_id_is_canonical() {
        let a = SubscriptionKey::new("book", json!({"symbol": "BTC-USD", "depth": 10}));
        let b = SubscriptionKey::new("book", json!({"depth": 10, "symbol": "BTC-USD"}));
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().as_str(), r#"book:{"depth":10,"symbol":"BTC-USD"}"#);

        let c = SubscriptionKey::new("book", json!({"symbol": "ETH-USD", "depth": 10}));
        assert_ne!(a.id(), c.id());

        assert_eq!(SubscriptionKey::channel("heartbeat").id().as_str(), "heartbeat");
    }

    #[test]
    fn test_frame_helpers() {
        let frame = Frame::text("hello");
        assert_eq!(frame.as_text(), Some("hello"));
        assert_eq!(frame.len(), 5);
        assert!(frame.is_data());

        let frame = Frame::Ping(Bytes::from_static(b"hb"));
        assert!(!frame.is_data());
        assert_eq!(frame.as_text(), None);
        assert!(!frame.is_empty());
        assert!(Frame::binary(Vec::new()).is_empty());
    }
}
