//! Connection lifecycle states and the single place they change.

use std::fmt;

use tokio::sync::{broadcast, watch};

use super::events::ConnectionEvent;

/// Lifecycle of one logical connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected; `connect()` has not been called.
    Disconnected,
    /// Opening a socket.
    Connecting,
    /// Socket open, subscriptions replayed, heartbeat running.
    Connected,
    /// Waiting out the backoff before the next attempt.
    Reconnecting,
    /// Terminal. No further automatic reconnects.
    Closed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Disconnected | Connecting | Connected | Reconnecting, Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the current [`ConnectionState`] and publishes every change.
///
/// Lives inside the connection driver task; handles observe it through the
/// watch and broadcast channels only.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionStateMachine {
    pub fn new(
        state_tx: watch::Sender<ConnectionState>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        let state = *state_tx.borrow();
        Self {
            state,
            state_tx,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`, publishing the change.
    ///
    /// Illegal transitions are refused and logged; the state is unchanged.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        let from = self.state;
        if !from.can_transition_to(next) {
            tracing::warn!(%from, to = %next, "Ignoring illegal state transition");
            return false;
        }

        self.state = next;
        self.state_tx.send_replace(next);
        tracing::info!(%from, to = %next, "Connection state changed");
        self.emit(ConnectionEvent::StateChanged { from, to: next });
        true
    }

    /// Publish a lifecycle event. Nobody listening is fine.
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}
