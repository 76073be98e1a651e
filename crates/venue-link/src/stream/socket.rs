//! The physical socket seam.
//!
//! A [`Connector`] opens one socket and hands back its two halves. The
//! connection driver owns both halves exclusively and drops them before it
//! opens a replacement.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use super::types::Frame;
use crate::classify::RawFailure;

/// Inbound half. Ends (or yields `RawFailure::Closed`) when the venue closes.
///
/// A `Frame::Ping` yielded here is answered by the connection task with a
/// matching pong. Readers over libraries that already reply to pings must
/// not yield them.
pub type FrameReader = Pin<Box<dyn Stream<Item = Result<Frame, RawFailure>> + Send>>;

/// Outbound half.
#[async_trait]
pub trait FrameWriter: Send {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), RawFailure>;

    /// Best-effort close handshake.
    async fn close(&mut self) -> Result<(), RawFailure> {
        Ok(())
    }
}

/// An open socket.
pub struct SocketParts {
    pub reader: FrameReader,
    pub writer: Box<dyn FrameWriter>,
}

impl SocketParts {
    pub fn new(reader: FrameReader, writer: impl FrameWriter + 'static) -> Self {
        Self {
            reader,
            writer: Box::new(writer),
        }
    }
}

/// Opens sockets to a venue.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<SocketParts, RawFailure>;
}
