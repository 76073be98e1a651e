//! JSON protocol handler with configurable field names.
//!
//! Fits the many venues whose messages look like
//! `{"op": "subscribe", "channel": "trades", "params": {...}}` and whose
//! updates echo the channel (and params) back.

use serde_json::{Map, Value};

use crate::stream::{
    protocol::{Inbound, ProtocolHandler},
    types::{Frame, SubscriptionKey},
};

/// Field names and operation values for [`JsonChannelHandler`].
#[derive(Clone, Debug)]
pub struct JsonChannelConfig {
    /// Operation field name (e.g. "op", "method", "event").
    pub op_field: String,
    pub subscribe_op: String,
    pub unsubscribe_op: String,
    /// Field carrying the channel name in both directions.
    pub channel_field: String,
    /// Field carrying the subscription params in both directions.
    pub params_field: String,
    /// Operation value of an application-level ping.
    pub ping_op: String,
    /// Operation value of an application-level pong.
    pub pong_op: String,
    /// Operation value by which the venue asks clients to reconnect.
    pub reconnect_op: Option<String>,
}

impl Default for JsonChannelConfig {
    fn default() -> Self {
        Self {
            op_field: "op".to_string(),
            subscribe_op: "subscribe".to_string(),
            unsubscribe_op: "unsubscribe".to_string(),
            channel_field: "channel".to_string(),
            params_field: "params".to_string(),
            ping_op: "ping".to_string(),
            pong_op: "pong".to_string(),
            reconnect_op: None,
        }
    }
}

impl JsonChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn op_field(mut self, field: impl Into<String>) -> Self {
        self.op_field = field.into();
        self
    }

    #[must_use]
    pub fn subscribe_op(mut self, op: impl Into<String>) -> Self {
        self.subscribe_op = op.into();
        self
    }

    #[must_use]
    pub fn unsubscribe_op(mut self, op: impl Into<String>) -> Self {
        self.unsubscribe_op = op.into();
        self
    }

    #[must_use]
    pub fn channel_field(mut self, field: impl Into<String>) -> Self {
        self.channel_field = field.into();
        self
    }

    #[must_use]
    pub fn params_field(mut self, field: impl Into<String>) -> Self {
        self.params_field = field.into();
        self
    }

    #[must_use]
    pub fn ping_op(mut self, op: impl Into<String>) -> Self {
        self.ping_op = op.into();
        self
    }

    #[must_use]
    pub fn pong_op(mut self, op: impl Into<String>) -> Self {
        self.pong_op = op.into();
        self
    }

    #[must_use]
    pub fn reconnect_op(mut self, op: impl Into<String>) -> Self {
        self.reconnect_op = Some(op.into());
        self
    }
}

/// Generic JSON channel protocol.
///
/// ```rust,ignore
/// use venue_link::stream::handlers::JsonChannelHandler;
///
/// let handler = JsonChannelHandler::new()
///     .with_config(|c| c.op_field("method").channel_field("stream"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct JsonChannelHandler {
    config: JsonChannelConfig,
}

impl JsonChannelHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, f: impl FnOnce(JsonChannelConfig) -> JsonChannelConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn config(&self) -> &JsonChannelConfig {
        &self.config
    }

    fn op_frame(&self, op: &str, key: Option<&SubscriptionKey>) -> Frame {
        let mut msg = Map::new();
        msg.insert(self.config.op_field.clone(), Value::from(op));
        if let Some(key) = key {
            msg.insert(
                self.config.channel_field.clone(),
                Value::from(key.channel.as_str()),
            );
            if !key.params.is_null() {
                msg.insert(self.config.params_field.clone(), key.params.clone());
            }
        }
        Frame::text(Value::Object(msg).to_string())
    }

    fn op_of(&self, message: &str) -> Option<String> {
        let json: Value = serde_json::from_str(message).ok()?;
        json.get(&self.config.op_field)?.as_str().map(str::to_owned)
    }

    fn key_of(&self, json: &Value) -> Option<SubscriptionKey> {
        let channel = json.get(&self.config.channel_field)?.as_str()?;
        let params = json
            .get(&self.config.params_field)
            .cloned()
            .unwrap_or(Value::Null);
        Some(SubscriptionKey::new(channel, params))
    }
}

impl ProtocolHandler for JsonChannelHandler {
    fn build_subscribe(&self, key: &SubscriptionKey) -> Frame {
        self.op_frame(&self.config.subscribe_op, Some(key))
    }

    fn build_unsubscribe(&self, key: &SubscriptionKey) -> Frame {
        self.op_frame(&self.config.unsubscribe_op, Some(key))
    }

    fn route(&self, message: &str) -> Option<SubscriptionKey> {
        let json: Value = serde_json::from_str(message).ok()?;
        // Acks of our own requests carry the op field; they are not data.
        if json.get(&self.config.op_field).is_some() {
            return None;
        }
        self.key_of(&json)
    }

    fn build_ping(&self, payload: Option<&str>) -> Frame {
        match payload {
            Some(payload) => Frame::text(payload),
            None => self.op_frame(&self.config.ping_op, None),
        }
    }

    fn is_pong(&self, message: &str) -> bool {
        self.op_of(message).as_deref() == Some(self.config.pong_op.as_str())
    }

    fn reply_to_ping(&self, message: &str) -> Option<Frame> {
        (self.op_of(message)? == self.config.ping_op)
            .then(|| self.op_frame(&self.config.pong_op, None))
    }

    fn should_reconnect(&self, message: &str) -> bool {
        match &self.config.reconnect_op {
            Some(op) => self.op_of(message).as_deref() == Some(op.as_str()),
            None => false,
        }
    }

    fn inspect(&self, message: &str) -> Inbound {
        let Ok(json) = serde_json::from_str::<Value>(message) else {
            return Inbound::Ignored;
        };
        let Some(op) = json.get(&self.config.op_field) else {
            return self.key_of(&json).map_or(Inbound::Ignored, Inbound::Data);
        };

        let config = &self.config;
        match op.as_str() {
            Some(op) if op == config.pong_op => Inbound::Pong,
            Some(op) if op == config.ping_op => {
                Inbound::Ping(self.op_frame(&config.pong_op, None))
            }
            Some(op) if config.reconnect_op.as_deref() == Some(op) => Inbound::Reconnect,
            _ => Inbound::Ignored,
        }
    }
}
