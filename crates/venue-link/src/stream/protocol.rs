//! Protocol handler trait for venue-agnostic stream handling.
//!
//! The connection only guarantees frame delivery. Everything that depends on
//! a venue's message schema (subscribe frames, routing, application-level
//! heartbeats) lives behind [`ProtocolHandler`].

use bytes::Bytes;

use super::types::{Frame, SubscriptionKey};

/// What an inbound text message means to the connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Answers our liveness probe.
    Pong,
    /// A venue ping; send the reply.
    Ping(Frame),
    /// The venue asks us to reconnect.
    Reconnect,
    /// Data for a subscription.
    Data(SubscriptionKey),
    /// Nothing to do with it.
    Ignored,
}

/// Venue-specific framing for one streaming connection.
///
/// # Example
///
/// ```rust,ignore
/// struct MyVenue;
///
/// impl ProtocolHandler for MyVenue {
///     fn build_subscribe(&self, key: &SubscriptionKey) -> Frame {
///         Frame::text(format!(r#"{{"sub":"{}"}}"#, key.channel))
///     }
///     // ... other methods
/// }
/// ```
pub trait ProtocolHandler: Send + Sync + 'static {
    /// Frames to send right after every socket open, before subscriptions
    /// are replayed (handshake, login).
    fn on_connect(&self) -> Vec<Frame> {
        Vec::new()
    }

    /// Build the frame that subscribes to `key`.
    fn build_subscribe(&self, key: &SubscriptionKey) -> Frame;

    /// Build the frame that unsubscribes from `key`.
    fn build_unsubscribe(&self, key: &SubscriptionKey) -> Frame;

    /// Find the subscription an inbound data message belongs to.
    ///
    /// `None` drops the message.
    fn route(&self, message: &str) -> Option<SubscriptionKey>;

    /// Build the liveness probe. `payload` is the configured application-level
    /// probe, if any.
    fn build_ping(&self, payload: Option<&str>) -> Frame {
        match payload {
            Some(payload) => Frame::text(payload),
            None => Frame::Ping(Bytes::new()),
        }
    }

    /// Whether a text message answers our liveness probe.
    ///
    /// Protocol-level pongs are always recognised.
    fn is_pong(&self, message: &str) -> bool {
        let _ = message;
        false
    }

    /// Reply to an application-level ping from the venue, if `message` is one.
    fn reply_to_ping(&self, message: &str) -> Option<Frame> {
        let _ = message;
        None
    }

    /// Whether the venue is asking us to reconnect.
    fn should_reconnect(&self, message: &str) -> bool {
        let _ = message;
        false
    }

    /// Sort an inbound text message.
    ///
    /// The default asks `is_pong`, `reply_to_ping`, `should_reconnect` and
    /// `route` in that order. Handlers that parse messages can override it to
    /// parse once.
    fn inspect(&self, message: &str) -> Inbound {
        if self.is_pong(message) {
            Inbound::Pong
        } else if let Some(reply) = self.reply_to_ping(message) {
            Inbound::Ping(reply)
        } else if self.should_reconnect(message) {
            Inbound::Reconnect
        } else {
            self.route(message).map_or(Inbound::Ignored, Inbound::Data)
        }
    }

    /// Decode a binary frame to text.
    ///
    /// Override this for venues that compress their payloads.
    fn decode_binary(&self, data: &[u8]) -> Option<String> {
        std::str::from_utf8(data).ok().map(str::to_owned)
    }
}
