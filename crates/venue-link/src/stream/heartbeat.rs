//! Liveness probing for a connected socket.

use tokio::time::Instant;

use super::config::HeartbeatConfig;

/// What the driver must do when the heartbeat deadline passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a probe now.
    SendPing,
    /// The last probe went unanswered; the socket is dead.
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Stopped,
    Idle { next_ping: Instant },
    AwaitingPong { sent_at: Instant, expires: Instant },
}

/// Deadline bookkeeping for ping/pong.
///
/// Holds no timers of its own: the driver sleeps until [`next_deadline`]
/// and calls [`on_deadline`], so a stopped monitor leaves nothing behind.
///
/// [`next_deadline`]: HeartbeatMonitor::next_deadline
/// [`on_deadline`]: HeartbeatMonitor::on_deadline
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    phase: Phase,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            phase: Phase::Stopped,
        }
    }

    /// Arm the monitor; the first probe is due one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        if self.config.enabled {
            self.phase = Phase::Idle {
                next_ping: now + self.config.interval,
            };
        }
    }

    pub fn stop(&mut self) {
        self.phase = Phase::Stopped;
    }

    pub fn is_running(&self) -> bool {
        self.phase != Phase::Stopped
    }

    pub fn ping_payload(&self) -> Option<&str> {
        self.config.ping_payload.as_deref()
    }

    /// A liveness response arrived.
    pub fn record_pong(&mut self) {
        if let Phase::AwaitingPong { sent_at, .. } = self.phase {
            self.phase = Phase::Idle {
                next_ping: sent_at + self.config.interval,
            };
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Stopped => None,
            Phase::Idle { next_ping } => Some(next_ping),
            Phase::AwaitingPong { expires, .. } => Some(expires),
        }
    }

    /// Advance past a deadline. Returns `None` when nothing is due yet.
    pub fn on_deadline(&mut self, now: Instant) -> Option<HeartbeatAction> {
        match self.phase {
            Phase::Stopped => None,
            Phase::Idle { next_ping } if now >= next_ping => {
                self.phase = Phase::AwaitingPong {
                    sent_at: now,
                    expires: now + self.config.timeout,
                };
                Some(HeartbeatAction::SendPing)
            }
            Phase::AwaitingPong { expires, .. } if now >= expires => {
                self.phase = Phase::Stopped;
                Some(HeartbeatAction::Expired)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(
            HeartbeatConfig::default()
                .interval(Duration::from_millis(5000))
                .timeout(Duration::from_millis(2000)),
        )
    }

    #[test]
    fn test_inert_until_started() {
        let mut hb = monitor();
        assert!(!hb.is_running());
        assert!(hb.next_deadline().is_none());
        assert!(hb.on_deadline(Instant::now() + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_unanswered_ping_expires() {
        let mut hb = monitor();
        let t0 = Instant::now();
        hb.start(t0);

        let ping_at = t0 + Duration::from_millis(5000);
        assert_eq!(hb.next_deadline(), Some(ping_at));
        assert!(hb.on_deadline(t0 + Duration::from_millis(4999)).is_none());
        assert_eq!(hb.on_deadline(ping_at), Some(HeartbeatAction::SendPing));

        let expires = ping_at + Duration::from_millis(2000);
        assert_eq!(hb.next_deadline(), Some(expires));
        assert_eq!(hb.on_deadline(expires), Some(HeartbeatAction::Expired));
        assert!(!hb.is_running());
    }

    #[test]
    fn test_pong_rearms_at_fixed_cadence() {
        let mut hb = monitor();
        let t0 = Instant::now();
        hb.start(t0);

        let ping_at = t0 + Duration::from_millis(5000);
        hb.on_deadline(ping_at);
        hb.record_pong();
        assert_eq!(
            hb.next_deadline(),
            Some(ping_at + Duration::from_millis(5000))
        );

        // A stray pong while idle changes nothing.
        hb.record_pong();
        assert_eq!(
            hb.next_deadline(),
            Some(ping_at + Duration::from_millis(5000))
        );
    }

    #[test]
    fn test_stop_and_disabled() {
        let mut hb = monitor();
        hb.start(Instant::now());
        hb.stop();
        assert!(hb.next_deadline().is_none());

        let mut hb = HeartbeatMonitor::new(HeartbeatConfig::disabled());
        hb.start(Instant::now());
        assert!(!hb.is_running());
    }
}
