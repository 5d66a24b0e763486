//! Frame transports.
//!
//! A [`FrameTransport`] moves whole protocol frames over a persistent
//! bidirectional connection. The WebSocket implementation is the production
//! transport; the in-memory implementation backs hermetic tests while still
//! running every frame through the wire codec.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use thiserror::Error;
use tether_wire::{DecodeError, EncodeError, Frame};

/// Transport failure.
///
/// `Decode` and `Protocol` indicate peer desync and are fatal to the
/// connection that produced them; the dispatcher closes the socket rather
/// than attempt local recovery.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("peer violated the framing protocol: {0}")]
    Protocol(String),
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether the error indicates wire corruption or desync rather than an
    /// ordinary network failure.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(self, TransportError::Decode(_) | TransportError::Protocol(_))
    }
}

/// A bidirectional, ordered stream of frames.
#[async_trait]
pub trait FrameTransport: Send {
    /// Send one frame. Frames sent from one task are delivered in order.
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Receive the next frame. `Ok(None)` means the peer closed cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Close the connection. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Accepts inbound connections for a server.
#[async_trait]
pub trait FrameListener: Send {
    type Transport: FrameTransport + Send + 'static;

    /// Wait for the next inbound connection.
    async fn accept(&mut self) -> Result<Self::Transport, TransportError>;
}

pub use memory::{hub, MemoryHub, MemoryListener, MemoryTransport};
pub use ws::{connect, WsListener, WsTransport};
