//! Observable lifecycle notifications.

use super::state::ConnectionState;
use crate::{error::ErrorRecord, reconnect::ReconnectAttempt};

/// Broadcast to every [`events()`](super::StreamClient::events) receiver.
///
/// Receivers that fall behind lose the oldest events; the connection never
/// waits for them.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// Every state transition, exactly once.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A reconnect was scheduled.
    Reconnecting(ReconnectAttempt),
    /// A reconnect attempt succeeded.
    Reconnected,
    /// Every allowed attempt failed; the connection is closing.
    MaxRetriesExceeded { attempts: u32 },
    /// A classified failure (socket error, heartbeat expiry, failed attempt).
    Error(ErrorRecord),
}
