//! The connection driver task and the [`StreamClient`] handle.
//!
//! One driver task per logical connection owns the socket, the state machine,
//! the heartbeat, the reconnect scheduler and the subscription registry.
//! Handles talk to it over a command channel, so there is never more than
//! one writer to the socket and never two sockets for one connection.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Duration, Instant, sleep, sleep_until, timeout},
};
use tracing::Instrument;

use super::{
    config::StreamConfig,
    events::ConnectionEvent,
    heartbeat::{HeartbeatAction, HeartbeatMonitor},
    protocol::{Inbound, ProtocolHandler},
    socket::{Connector, SocketParts},
    state::{ConnectionState, ConnectionStateMachine},
    subscription::{Subscription, SubscriptionInfo, SubscriptionRegistry, SubscriptionStatus},
    types::{Frame, SubscriptionId, SubscriptionKey},
};
use crate::{
    classify::RawFailure,
    context::VenueContext,
    error::{ErrorKind, ErrorRecord, TransportError, TransportResult},
    reconnect::ReconnectionScheduler,
};

enum Command {
    Connect {
        reply: oneshot::Sender<TransportResult<()>>,
    },
    Subscribe {
        key: SubscriptionKey,
        reply: oneshot::Sender<broadcast::Receiver<Frame>>,
    },
    Send {
        frame: Frame,
        reply: oneshot::Sender<TransportResult<()>>,
    },
    Inspect {
        reply: oneshot::Sender<Vec<SubscriptionInfo>>,
    },
    Disconnect,
}

struct Shared {
    cmd_tx: mpsc::Sender<Command>,
    release_tx: mpsc::UnboundedSender<SubscriptionId>,
    state_rx: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Handle on one logical streaming connection.
///
/// Cheap to clone. Dropping the last clone shuts the connection down as if
/// [`disconnect`](Self::disconnect) had been called.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<Shared>,
}

impl StreamClient {
    /// Create the connection in the `Disconnected` state and spawn its driver.
    ///
    /// Must be called from within a Tokio runtime. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new<C, H>(
        config: StreamConfig,
        handler: H,
        connector: C,
        context: VenueContext,
    ) -> TransportResult<Self>
    where
        C: Connector,
        H: ProtocolHandler,
    {
        config.validate().map_err(TransportError::config)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(config.event_capacity);

        let span = tracing::info_span!("stream", venue = context.venue());
        let driver = Driver {
            connector: Arc::new(connector),
            handler,
            context,
            machine: ConnectionStateMachine::new(state_tx, events.clone()),
            scheduler: ReconnectionScheduler::new(config.reconnect.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat.clone()),
            registry: SubscriptionRegistry::new(config.subscription_capacity),
            config,
            cmd_rx,
            release_rx,
            waiters: Vec::new(),
            next_delay: Duration::ZERO,
            reconnecting: false,
        };
        let handle = tokio::spawn(driver.run().instrument(span));

        Ok(Self {
            shared: Arc::new(Shared {
                cmd_tx,
                release_tx,
                state_rx,
                events,
                driver: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Connect, suspending until `Connected`.
    ///
    /// Failed attempts follow the reconnect schedule. Fails with
    /// [`TransportError::ReconnectExhausted`] once it runs out, or
    /// [`TransportError::Closed`] if the connection was closed meanwhile.
    pub async fn connect(&self) -> TransportResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { reply }).await?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Close the connection and wait until the driver has released the
    /// socket, its timers and every subscription. Idempotent.
    pub async fn disconnect(&self) -> TransportResult<()> {
        let mut driver = self.shared.driver.lock().await;
        let Some(handle) = driver.take() else {
            return Ok(());
        };
        // The driver may already have exited on its own.
        let _ = self.shared.cmd_tx.send(Command::Disconnect).await;
        handle
            .await
            .map_err(|err| TransportError::internal(format!("Connection driver failed: {err}")))
    }

    /// Send a raw frame. Fails with [`TransportError::NotConnected`] unless
    /// the connection is `Connected`.
    pub async fn send(&self, frame: Frame) -> TransportResult<()> {
        if !self.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        let (reply, rx) = oneshot::channel();
        self.shared
            .cmd_tx
            .send(Command::Send { frame, reply })
            .await
            .map_err(|_| TransportError::NotConnected)?;
        rx.await.map_err(|_| TransportError::NotConnected)?
    }

    /// Subscribe to `channel` with `params`.
    ///
    /// The subscription survives reconnects. Cancel it (or drop it) to stop.
    pub async fn subscribe(
        &self,
        channel: impl Into<String>,
        params: Value,
    ) -> TransportResult<Subscription> {
        self.subscribe_key(SubscriptionKey::new(channel, params)).await
    }

    pub async fn subscribe_key(&self, key: SubscriptionKey) -> TransportResult<Subscription> {
        let id = key.id();
        let (reply, rx) = oneshot::channel();
        self.command(Command::Subscribe { key, reply }).await?;
        let receiver = rx.await.map_err(|_| TransportError::Closed)?;
        Ok(Subscription::new(
            id,
            receiver,
            self.shared.release_tx.clone(),
        ))
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_rx.borrow()
    }

    /// Watch state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_rx.clone()
    }

    /// Receive lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the registry. Empty once closed.
    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Inspect { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions().await.len()
    }

    async fn command(&self, command: Command) -> TransportResult<()> {
        self.shared
            .cmd_tx
            .send(command)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("state", &self.state())
            .finish()
    }
}

/// Why the connected phase ended.
enum Exit {
    Lost(ErrorRecord),
    Shutdown,
}

enum Flow {
    Continue,
    Shutdown,
}

struct Driver<C, H> {
    config: StreamConfig,
    connector: Arc<C>,
    handler: H,
    context: VenueContext,
    machine: ConnectionStateMachine,
    scheduler: ReconnectionScheduler,
    heartbeat: HeartbeatMonitor,
    registry: SubscriptionRegistry,
    cmd_rx: mpsc::Receiver<Command>,
    release_rx: mpsc::UnboundedReceiver<SubscriptionId>,
    waiters: Vec<oneshot::Sender<TransportResult<()>>>,
    next_delay: Duration,
    reconnecting: bool,
}

impl<C, H> Driver<C, H>
where
    C: Connector,
    H: ProtocolHandler,
{
    async fn run(mut self) {
        loop {
            match self.machine.state() {
                ConnectionState::Disconnected => self.idle().await,
                ConnectionState::Connecting => {
                    if let Some(socket) = self.open().await {
                        let exit = self.serve(socket).await;
                        self.teardown(exit);
                    }
                }
                ConnectionState::Reconnecting => self.backoff().await,
                // serve() never returns in Connected.
                ConnectionState::Connected | ConnectionState::Closed => break,
            }
        }
        self.finish();
    }

    async fn idle(&mut self) {
        tokio::select! {
            biased;
            Some(id) = self.release_rx.recv() => self.release_offline(&id),
            cmd = self.cmd_rx.recv() => {
                if let Flow::Shutdown = self.handle_offline(cmd) {
                    self.close();
                }
            }
        }
    }

    /// One connection attempt. Returns the open socket after its on-connect
    /// frames went out, with the state already `Connected`.
    async fn open(&mut self) -> Option<SocketParts> {
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let deadline = self.config.connect_timeout;
        let attempt = async move {
            match timeout(deadline, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(RawFailure::Timeout),
            }
        };
        tokio::pin!(attempt);

        tracing::debug!(url = %self.config.url, "Opening socket");
        let result = loop {
            tokio::select! {
                biased;
                Some(id) = self.release_rx.recv() => self.release_offline(&id),
                cmd = self.cmd_rx.recv() => {
                    if let Flow::Shutdown = self.handle_offline(cmd) {
                        self.close();
                        return None;
                    }
                }
                result = &mut attempt => break result,
            }
        };

        let mut socket = match result {
            Ok(socket) => socket,
            Err(raw) => {
                let record = self.classify(&raw);
                self.lost(record);
                return None;
            }
        };

        for frame in self.handler.on_connect() {
            if let Err(raw) = socket.writer.send_frame(frame).await {
                let record = self.classify(&raw);
                self.lost(record);
                return None;
            }
        }

        self.machine.transition(ConnectionState::Connected);
        let attempts = self.scheduler.attempts();
        self.scheduler.reset();
        if std::mem::take(&mut self.reconnecting) {
            tracing::info!(attempts, "Reconnected");
            self.machine.emit(ConnectionEvent::Reconnected);
        }
        Some(socket)
    }

    async fn serve(&mut self, mut socket: SocketParts) -> Exit {
        for key in self.registry.pending() {
            let frame = self.handler.build_subscribe(&key);
            if let Err(raw) = socket.writer.send_frame(frame).await {
                return Exit::Lost(self.classify(&raw));
            }
            let id = key.id();
            tracing::debug!(subscription = %id, "Subscription replayed");
            self.registry.mark_active(&id);
        }

        self.heartbeat.start(Instant::now());
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        loop {
            let deadline = self.heartbeat.next_deadline();
            let heartbeat = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                Some(id) = self.release_rx.recv() => self.release_online(&id, &mut socket).await,
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(Command::Disconnect) => {
                            if let Err(raw) = socket.writer.close().await {
                                tracing::debug!(error = ?raw, "Close handshake failed");
                            }
                            return Exit::Shutdown;
                        }
                        Some(cmd) => {
                            if let Err(record) = self.handle_online(cmd, &mut socket).await {
                                return Exit::Lost(record);
                            }
                        }
                    }
                }
                frame = socket.reader.next() => {
                    if let Err(record) = self.handle_inbound(frame, &mut socket).await {
                        return Exit::Lost(record);
                    }
                }
                () = heartbeat => {
                    match self.heartbeat.on_deadline(Instant::now()) {
                        Some(HeartbeatAction::SendPing) => {
                            let ping = self.handler.build_ping(self.heartbeat.ping_payload());
                            if let Err(raw) = socket.writer.send_frame(ping).await {
                                return Exit::Lost(self.classify(&raw));
                            }
                            tracing::trace!("Heartbeat ping sent");
                        }
                        Some(HeartbeatAction::Expired) => {
                            tracing::warn!("Heartbeat response not received in time");
                            return Exit::Lost(ErrorRecord::new(
                                ErrorKind::Timeout,
                                self.context.venue(),
                                "heartbeat response not received in time",
                            ));
                        }
                        None => {}
                    }
                }
            }
        }
    }

    /// Leave `Connected`. The socket has already been dropped by the caller.
    fn teardown(&mut self, exit: Exit) {
        self.heartbeat.stop();
        self.registry.demote_all();
        match exit {
            Exit::Shutdown => self.close(),
            Exit::Lost(record) => self.lost(record),
        }
    }

    async fn backoff(&mut self) {
        let wake = sleep(self.next_delay);
        tokio::pin!(wake);

        loop {
            tokio::select! {
                biased;
                Some(id) = self.release_rx.recv() => self.release_offline(&id),
                cmd = self.cmd_rx.recv() => {
                    if let Flow::Shutdown = self.handle_offline(cmd) {
                        self.close();
                        return;
                    }
                }
                () = &mut wake => break,
            }
        }
        self.machine.transition(ConnectionState::Connecting);
    }

    /// The socket (or an attempt to open one) failed.
    fn lost(&mut self, record: ErrorRecord) {
        tracing::warn!(kind = %record.kind(), error = %record, "Connection lost");
        self.machine.emit(ConnectionEvent::Error(record.clone()));

        match self.scheduler.next_attempt(record.kind()) {
            Some(attempt) => {
                self.machine.transition(ConnectionState::Reconnecting);
                tracing::info!(
                    attempt = attempt.attempt,
                    delay_ms = attempt.delay.as_millis() as u64,
                    cause = %attempt.cause,
                    "Scheduling reconnect"
                );
                self.next_delay = attempt.delay;
                self.reconnecting = true;
                self.machine.emit(ConnectionEvent::Reconnecting(attempt));
            }
            None => {
                let attempts = self.scheduler.attempts();
                if self.scheduler.is_enabled() {
                    tracing::error!(attempts, "Reconnect attempts exhausted");
                    self.machine
                        .emit(ConnectionEvent::MaxRetriesExceeded { attempts });
                }
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(TransportError::ReconnectExhausted {
                        attempts: attempts + 1,
                        last: Box::new(record.clone()),
                    }));
                }
                self.close();
            }
        }
    }

    fn close(&mut self) {
        self.heartbeat.stop();
        if !self.machine.state().is_closed() {
            self.machine.transition(ConnectionState::Closed);
        }
    }

    fn finish(&mut self) {
        self.close();
        self.registry.clear();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(TransportError::Closed));
        }
        tracing::info!("Connection closed");
    }

    fn handle_offline(&mut self, cmd: Option<Command>) -> Flow {
        let Some(cmd) = cmd else {
            return Flow::Shutdown;
        };
        match cmd {
            Command::Connect { reply } => {
                if self.machine.state() == ConnectionState::Disconnected {
                    self.machine.transition(ConnectionState::Connecting);
                }
                self.waiters.push(reply);
            }
            Command::Subscribe { key, reply } => {
                let id = key.id();
                let (rx, _) = self.registry.subscribe(key);
                if reply.send(rx).is_err() {
                    self.registry.release(&id);
                }
            }
            Command::Send { reply, .. } => {
                let _ = reply.send(Err(TransportError::NotConnected));
            }
            Command::Inspect { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Disconnect => return Flow::Shutdown,
        }
        Flow::Continue
    }

    async fn handle_online(
        &mut self,
        cmd: Command,
        socket: &mut SocketParts,
    ) -> Result<(), ErrorRecord> {
        match cmd {
            Command::Connect { reply } => {
                let _ = reply.send(Ok(()));
            }
            Command::Subscribe { key, reply } => {
                let id = key.id();
                let (rx, is_new) = self.registry.subscribe(key.clone());
                if reply.send(rx).is_err() {
                    self.registry.release(&id);
                    return Ok(());
                }
                if is_new {
                    let frame = self.handler.build_subscribe(&key);
                    socket
                        .writer
                        .send_frame(frame)
                        .await
                        .map_err(|raw| self.classify(&raw))?;
                    self.registry.mark_active(&id);
                    tracing::debug!(subscription = %id, "Subscribed");
                }
            }
            Command::Send { frame, reply } => match socket.writer.send_frame(frame).await {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                }
                Err(raw) => {
                    let record = self.classify(&raw);
                    let _ = reply.send(Err(record.clone().into()));
                    return Err(record);
                }
            },
            Command::Inspect { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Disconnect => {}
        }
        Ok(())
    }

    fn release_offline(&mut self, id: &SubscriptionId) {
        if self.registry.release(id).is_some() {
            tracing::debug!(subscription = %id, "Subscription removed");
        }
    }

    async fn release_online(&mut self, id: &SubscriptionId, socket: &mut SocketParts) {
        let Some((key, status)) = self.registry.release(id) else {
            return;
        };
        if status != SubscriptionStatus::Active {
            tracing::debug!(subscription = %id, "Subscription removed");
            return;
        }
        let frame = self.handler.build_unsubscribe(&key);
        match socket.writer.send_frame(frame).await {
            Ok(()) => tracing::debug!(subscription = %id, "Unsubscribed"),
            Err(raw) => tracing::debug!(subscription = %id, error = ?raw, "Unsubscribe not sent"),
        }
    }

    async fn handle_inbound(
        &mut self,
        frame: Option<Result<Frame, RawFailure>>,
        socket: &mut SocketParts,
    ) -> Result<(), ErrorRecord> {
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(raw)) => return Err(self.classify(&raw)),
            None => return Err(self.classify(&RawFailure::Closed(None))),
        };

        if frame.len() > self.config.max_frame_size {
            tracing::warn!(
                size = frame.len(),
                max = self.config.max_frame_size,
                "Dropping oversized frame"
            );
            return Ok(());
        }

        let decoded: String;
        let text = match &frame {
            Frame::Ping(payload) => {
                if let Err(raw) = socket.writer.send_frame(Frame::Pong(payload.clone())).await {
                    tracing::debug!(error = ?raw, "Pong not sent");
                }
                return Ok(());
            }
            Frame::Pong(_) => {
                self.heartbeat.record_pong();
                return Ok(());
            }
            Frame::Text(text) => text.as_str(),
            Frame::Binary(data) => match self.handler.decode_binary(data) {
                Some(text) => {
                    decoded = text;
                    decoded.as_str()
                }
                None => {
                    tracing::debug!(size = data.len(), "Dropping undecodable binary frame");
                    return Ok(());
                }
            },
        };

        let key = match self.handler.inspect(text) {
            Inbound::Pong => {
                self.heartbeat.record_pong();
                return Ok(());
            }
            Inbound::Ping(reply) => {
                if let Err(raw) = socket.writer.send_frame(reply).await {
                    tracing::debug!(error = ?raw, "Ping reply not sent");
                }
                return Ok(());
            }
            Inbound::Reconnect => {
                return Err(ErrorRecord::new(
                    ErrorKind::VenueUnavailable,
                    self.context.venue(),
                    "venue requested reconnect",
                ));
            }
            Inbound::Data(key) => key,
            Inbound::Ignored => {
                tracing::trace!("Dropping unroutable message");
                return Ok(());
            }
        };
        let id = key.id();
        if !self.registry.dispatch(&id, frame) {
            tracing::trace!(subscription = %id, "No subscriber for message");
        }
        Ok(())
    }

    fn classify(&self, raw: &RawFailure) -> ErrorRecord {
        self.context.classifier().classify(raw)
    }
}
