//! Streaming connection configuration.

use std::time::Duration;

use crate::reconnect::ReconnectConfig;

/// Liveness probing while connected.
#[derive(Clone, Debug)]
pub struct HeartbeatConfig {
    /// Probe the connection while it is up.
    pub enabled: bool,
    /// Time between the last probe (or connect) and the next probe.
    pub interval: Duration,
    /// Time allowed for the matching response.
    pub timeout: Duration,
    /// Application-level probe text. `None` sends a protocol-level ping.
    pub ping_payload: Option<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            ping_payload: None,
        }
    }
}

impl HeartbeatConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn ping_payload(mut self, payload: impl Into<String>) -> Self {
        self.ping_payload = Some(payload.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.interval.is_zero() {
            return Err("Ping interval must be > 0".to_string());
        }
        if self.timeout.is_zero() {
            return Err("Pong timeout must be > 0".to_string());
        }
        Ok(())
    }
}

/// Configuration for one logical streaming connection.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Endpoint URL.
    pub url: String,
    /// Backoff and attempt limit after an unexpected close.
    pub reconnect: ReconnectConfig,
    /// Liveness probing while connected.
    pub heartbeat: HeartbeatConfig,
    /// Deadline for opening one socket.
    pub connect_timeout: Duration,
    /// Frames buffered per subscription before the oldest are dropped.
    pub subscription_capacity: usize,
    /// Queued calls from handles to the connection task.
    pub command_capacity: usize,
    /// Events buffered per `events()` receiver.
    pub event_capacity: usize,
    /// Inbound frames larger than this are dropped.
    pub max_frame_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
            subscription_capacity: 1024,
            command_capacity: 64,
            event_capacity: 256,
            max_frame_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity;
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        self.reconnect.validate()?;
        self.heartbeat.validate()?;
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.subscription_capacity == 0 {
            return Err("Subscription channel capacity must be > 0".to_string());
        }
        if self.command_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        if self.event_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        Ok(())
    }
}
