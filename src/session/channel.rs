//! # Duplex Channel Abstraction
//!
//! Defines the frame-level view of the WebSocket connection that the session
//! state machine operates on. The session never touches the socket directly;
//! it reads `Frame`s from a `FrameSource` and writes text frames through a
//! `FrameSink`. The production implementations live in `websocket.rs`;
//! tests substitute scripted sources and recording sinks.
//!
//! ## Frame Model:
//! - **Text**: one complete textual frame (control traffic, UTF-8 JSON)
//! - **Binary**: one fragment of an audio message; `end_of_message` marks the
//!   final fragment, so a single-frame message arrives with the flag set
//! - **Close**: the peer initiated the close handshake
//!
//! Transport-level ping/pong is answered inside the source implementation and
//! never reaches the session.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// One normalized frame received from the duplex channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A complete text frame carrying a control message.
    Text(Bytes),

    /// A binary frame carrying audio bytes. `end_of_message` is true on the
    /// final fragment of the message (and on unfragmented messages).
    Binary { data: Bytes, end_of_message: bool },

    /// The peer sent a Close frame.
    Close,
}

/// A read/write failure on the underlying transport.
///
/// Carries a short kind string for logging; the session treats any transport
/// error as terminal for the connection and never retries.
#[derive(Debug, Clone)]
pub struct TransportError {
    kind: String,
}

impl TransportError {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }

    /// Error used when sending on a channel that has already been closed.
    pub fn closed() -> Self {
        Self::new("connection closed")
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.kind)
    }
}

impl std::error::Error for TransportError {}

/// Ingress half of the duplex channel.
///
/// There is exactly one logical reader per session; `next_frame` returns
/// `None` once the transport has ended without a Close frame (peer vanished
/// or stream exhausted).
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Egress half of the duplex channel.
///
/// Implementations must serialize sends internally: the worker loop sends
/// transcripts and the ingress loop may attempt one best-effort error send
/// while draining.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one complete text frame. Fails once the channel is closed.
    async fn send_text(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Best-effort close handshake with Normal closure. Idempotent; after
    /// the first call all sends fail with `closed`.
    async fn close(&self);
}
