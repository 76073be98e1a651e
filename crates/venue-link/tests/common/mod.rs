//! Scriptable in-memory sockets for driving a `StreamClient`.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use venue_link::{
    RawFailure, ReconnectConfig, StreamClient, StreamConfig, VenueContext,
    stream::{
        ConnectionState, Connector, Frame, FrameWriter, HeartbeatConfig, SocketParts,
        handlers::JsonChannelHandler,
    },
};

/// What the next `connect()` call does.
#[derive(Clone, Debug)]
pub enum Outcome {
    Open,
    Fail(RawFailure),
}

pub fn refused() -> Outcome {
    Outcome::Fail(RawFailure::Io {
        kind: std::io::ErrorKind::ConnectionRefused,
        message: "connection refused".to_string(),
    })
}

/// The test's end of one open socket.
pub struct RemoteSocket {
    /// Frames the venue sends. Drop it to close the socket.
    pub inbound: mpsc::UnboundedSender<Result<Frame, RawFailure>>,
    /// Frames the client wrote, in order. Ends when the client drops the socket.
    pub sent: mpsc::UnboundedReceiver<Frame>,
}

impl RemoteSocket {
    pub fn push(&self, text: &str) {
        let _ = self.inbound.send(Ok(Frame::text(text)));
    }

    pub fn push_frame(&self, frame: Frame) {
        let _ = self.inbound.send(Ok(frame));
    }

    pub async fn next_sent(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(30), self.sent.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("socket dropped before sending")
    }

    pub async fn next_sent_json(&mut self) -> Value {
        let frame = self.next_sent().await;
        serde_json::from_str(frame.as_text().expect("text frame")).expect("json frame")
    }
}

struct Script {
    queue: VecDeque<Outcome>,
    fallback: Outcome,
}

#[derive(Clone)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
    opened: mpsc::UnboundedSender<RemoteSocket>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Every connect opens a socket unless scripted otherwise.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteSocket>) {
        Self::with_fallback(Outcome::Open)
    }

    pub fn with_fallback(fallback: Outcome) -> (Self, mpsc::UnboundedReceiver<RemoteSocket>) {
        let (opened, opened_rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Arc::new(Mutex::new(Script {
                    queue: VecDeque::new(),
                    fallback,
                })),
                opened,
                attempts: Arc::new(AtomicUsize::new(0)),
            },
            opened_rx,
        )
    }

    /// Queue outcomes for the next connects, before the fallback applies.
    pub fn then(self, outcome: Outcome) -> Self {
        self.script.lock().unwrap().queue.push_back(outcome);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

struct MockWriter {
    sent: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl FrameWriter for MockWriter {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), RawFailure> {
        // The remote end may already be gone; the driver learns that from
        // the reader.
        let _ = self.sent.send(frame);
        Ok(())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<SocketParts, RawFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut script = self.script.lock().unwrap();
            script
                .queue
                .pop_front()
                .unwrap_or_else(|| script.fallback.clone())
        };

        match outcome {
            Outcome::Fail(raw) => Err(raw),
            Outcome::Open => {
                let (inbound, inbound_rx) = mpsc::unbounded_channel();
                let (sent_tx, sent) = mpsc::unbounded_channel();
                let reader = futures::stream::unfold(inbound_rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                let _ = self.opened.send(RemoteSocket { inbound, sent });
                Ok(SocketParts::new(
                    Box::pin(reader),
                    MockWriter { sent: sent_tx },
                ))
            }
        }
    }
}

pub fn config() -> StreamConfig {
    StreamConfig::new("mock://venue/ws")
        .reconnect(
            ReconnectConfig::new()
                .initial_delay(Duration::from_millis(100))
                .jitter(0.0),
        )
        .heartbeat(HeartbeatConfig::disabled())
}

pub fn client(config: StreamConfig, connector: MockConnector) -> StreamClient {
    StreamClient::new(
        config,
        JsonChannelHandler::new().with_config(|c| c.reconnect_op("reconnect")),
        connector,
        VenueContext::new("mock"),
    )
    .unwrap()
}

pub async fn wait_for_state(client: &StreamClient, state: ConnectionState) {
    let mut watch = client.state_watch();
    tokio::time::timeout(Duration::from_secs(600), watch.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("driver gone");
}

pub async fn next_socket(opened: &mut mpsc::UnboundedReceiver<RemoteSocket>) -> RemoteSocket {
    tokio::time::timeout(Duration::from_secs(600), opened.recv())
        .await
        .expect("timed out waiting for a socket")
        .expect("connector dropped")
}
