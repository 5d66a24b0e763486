//! In-memory transport for tests and local wiring.
//!
//! Frames still pass through the wire codec, so the in-memory path
//! exercises exactly the bytes the WebSocket path would carry.

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_wire::{codec, Frame};

use crate::{FrameListener, FrameTransport, TransportError};

/// One end of an in-memory connection.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Create a connected pair of in-memory transports.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: left_tx,
            rx: left_rx,
        },
        MemoryTransport {
            tx: right_tx,
            rx: right_rx,
        },
    )
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = codec::encode(frame)?;
        self.tx.send(bytes).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.rx.recv().await {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.rx.close();
        Ok(())
    }
}

/// Dialing side of an in-memory link: every [`MemoryHub::dial`] creates a
/// fresh connection delivered to the paired [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryHub {
    tx: mpsc::UnboundedSender<MemoryTransport>,
}

/// Accepting side of an in-memory link.
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<MemoryTransport>,
}

/// Create a connected hub/listener pair.
pub fn hub() -> (MemoryHub, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryHub { tx }, MemoryListener { rx })
}

impl MemoryHub {
    /// Open a new connection to the listener.
    pub fn dial(&self) -> Result<MemoryTransport, TransportError> {
        let (client_side, server_side) = pair();
        self.tx
            .send(server_side)
            .map_err(|_| TransportError::Closed)?;
        Ok(client_side)
    }
}

#[async_trait]
impl FrameListener for MemoryListener {
    type Transport = MemoryTransport;

    async fn accept(&mut self) -> Result<Self::Transport, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tether_wire::CorrelationId;

    #[tokio::test]
    async fn pair_round_trips_frames() {
        let (mut a, mut b) = pair();
        let frame = Frame::Unsubscribe {
            id: CorrelationId::new(5),
        };
        a.send(&frame).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn dropped_peer_ends_the_stream() {
        let (mut a, b) = pair();
        drop(b);
        assert_matches!(a.recv().await, Ok(None));
        let frame = Frame::Goodbye {
            reason: "done".into(),
        };
        assert_matches!(a.send(&frame).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn hub_delivers_dialed_connections() {
        let (hub, mut listener) = hub();
        let mut client_side = hub.dial().unwrap();
        let mut server_side = listener.accept().await.unwrap();

        let frame = Frame::Hello {
            credential: "tok".into(),
        };
        client_side.send(&frame).await.unwrap();
        assert_eq!(server_side.recv().await.unwrap(), Some(frame));
    }
}
