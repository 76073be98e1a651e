//! WebSocket sockets backed by `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};

use super::{
    socket::{Connector, FrameWriter, SocketParts},
    types::Frame,
};
use crate::classify::RawFailure;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens plain or TLS WebSocket connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<SocketParts, RawFailure> {
        let (ws, response) = connect_async(url).await.map_err(map_error)?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = ws.split();
        Ok(SocketParts::new(reader(stream), TungsteniteWriter { sink }))
    }
}

fn reader(stream: SplitStream<WsStream>) -> super::socket::FrameReader {
    Box::pin(stream.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
            Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
            // tungstenite queues the pong reply itself.
            Ok(Message::Ping(_)) => None,
            Ok(Message::Pong(data)) => Some(Ok(Frame::Pong(data))),
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                Some(Err(RawFailure::Closed(reason)))
            }
            Ok(Message::Frame(_)) => None,
            Err(err) => Some(Err(map_error(err))),
        }
    }))
}

struct TungsteniteWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for TungsteniteWriter {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), RawFailure> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
        };
        self.sink.send(message).await.map_err(map_error)
    }

    async fn close(&mut self) -> Result<(), RawFailure> {
        self.sink.close().await.map_err(map_error)
    }
}

fn map_error(err: WsError) -> RawFailure {
    match err {
        WsError::Io(err) => RawFailure::io(&err),
        WsError::Http(response) => RawFailure::Status {
            status: response.status().as_u16(),
            body: None,
            retry_after: response
                .headers()
                .get(http::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        WsError::ConnectionClosed | WsError::AlreadyClosed => RawFailure::Closed(None),
        other => RawFailure::other(other.to_string()),
    }
}
