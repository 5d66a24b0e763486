//! Transport connectors.
//!
//! A [`Connector`] knows how to open one fresh transport to the server; the
//! connection manager calls it for the initial connect and again on every
//! reconnect attempt.

use async_trait::async_trait;

use tether_transport::{ws, FrameTransport, MemoryHub, MemoryTransport, TransportError, WsTransport};

/// Opens transports to one server endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: FrameTransport + Send + 'static;

    async fn connect(&self) -> Result<Self::Transport, TransportError>;
}

/// Connects over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport<ws::ClientStream>;

    async fn connect(&self) -> Result<Self::Transport, TransportError> {
        ws::connect(&self.url).await
    }
}

/// In-memory connector: every connect dials a fresh in-memory pair to the
/// listener side of the hub.
#[async_trait]
impl Connector for MemoryHub {
    type Transport = MemoryTransport;

    async fn connect(&self) -> Result<Self::Transport, TransportError> {
        self.dial()
    }
}
