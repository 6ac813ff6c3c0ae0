//! Transport layer for agent ↔ controller communication.
//!
//! Provides the `MessageSink` trait (outbound half of the channel), the
//! inbound message stream type, and the framing codec. The production
//! channel is a WebSocket (`websocket`); `ChannelSink` is an in-process
//! loopback used for wiring and tests.

pub mod protocol;
pub mod websocket;

pub use protocol::{Codec, CodecError, Frame, Op};

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

/// One complete message on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A codec frame.
    Text(String),
    /// A raw fetch body.
    Binary(Bytes),
}

impl WireMessage {
    /// Byte length of the message content.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("connecting to {endpoint} timed out after {seconds}s")]
    ConnectTimeout { endpoint: String, seconds: u64 },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("channel closed")]
    Closed,
}

/// Inbound half of the channel. Ends when the peer closes the connection.
pub type Inbound = Pin<Box<dyn Stream<Item = Result<WireMessage, TransportError>> + Send>>;

/// Outbound half of the channel.
///
/// Implementations are owned by a single `Session`, which serializes all
/// writes; they need not be safe for concurrent use.
#[async_trait]
pub trait MessageSink: Send {
    /// Write one message.
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Close the channel. Best effort; errors are reported but not fatal.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Sink writing into an unbounded mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WireMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiver observing everything written to it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Wrap an mpsc receiver as an inbound stream.
pub fn channel_inbound(mut rx: mpsc::UnboundedReceiver<Result<WireMessage, TransportError>>) -> Inbound {
    Box::pin(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (mut sink, mut rx) = ChannelSink::new();
        sink.send(WireMessage::Text("a".into())).await.unwrap();
        sink.send(WireMessage::Binary(Bytes::from_static(b"\x00\xff")))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(WireMessage::Text("a".into())));
        assert_eq!(
            rx.recv().await,
            Some(WireMessage::Binary(Bytes::from_static(b"\x00\xff")))
        );
    }

    #[tokio::test]
    async fn channel_sink_reports_dropped_receiver() {
        let (mut sink, rx) = ChannelSink::new();
        drop(rx);
        let result = sink.send(WireMessage::Text("late".into())).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn channel_inbound_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inbound = channel_inbound(rx);
        tx.send(Ok(WireMessage::Text("debug\0hi".into()))).unwrap();
        drop(tx);

        assert!(matches!(inbound.next().await, Some(Ok(WireMessage::Text(_)))));
        assert!(inbound.next().await.is_none());
    }

    #[test]
    fn wire_message_len() {
        assert_eq!(WireMessage::Text("abc".into()).len(), 3);
        assert!(WireMessage::Binary(Bytes::new()).is_empty());
    }
}
