//! WebSocket transport (tokio-tungstenite).
//!
//! One protocol frame per binary WebSocket message. Text messages are
//! protocol violations; ping/pong is answered inline and never surfaced.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

use tether_wire::{codec, Frame, MAX_FRAME_BYTES};

use crate::{FrameListener, FrameTransport, TransportError};

/// WebSocket-backed frame transport.
pub struct WsTransport<S> {
    stream: WebSocketStream<S>,
    max_frame_bytes: usize,
}

impl<S> WsTransport<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self {
            stream,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }

    pub fn with_frame_limit(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Consume the transport and return the underlying stream.
    pub fn into_inner(self) -> WebSocketStream<S> {
        self.stream
    }
}

#[async_trait]
impl<S> FrameTransport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = codec::encode(frame)?;
        self.stream.send(WsMessage::Binary(bytes)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => {
                    let frame = codec::decode_with_limit(&data, self.max_frame_bytes)?;
                    return Ok(Some(frame));
                }
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = self.stream.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Text(_))) => {
                    return Err(TransportError::Protocol("text frames not allowed".into()));
                }
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // An already-closed stream reports an error we don't care about.
        let _ = self.stream.close(None).await;
        Ok(())
    }
}

/// Stream type produced by [`connect`].
pub type ClientStream = MaybeTlsStream<TcpStream>;

/// Dial a WebSocket URL.
pub async fn connect(url: &str) -> Result<WsTransport<ClientStream>, TransportError> {
    let (stream, _response) = connect_async(url).await?;
    Ok(WsTransport::new(stream))
}

/// Listens for inbound WebSocket connections on a TCP socket.
pub struct WsListener {
    listener: TcpListener,
}

impl WsListener {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl FrameListener for WsListener {
    type Transport = WsTransport<TcpStream>;

    async fn accept(&mut self) -> Result<Self::Transport, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!(peer = %peer, "accepting websocket connection");
        let ws = accept_async(stream).await?;
        Ok(WsTransport::new(ws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tether_wire::{CorrelationId, Value};
    use tokio_tungstenite::client_async;

    #[tokio::test]
    async fn frames_round_trip_over_duplex() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let ws = accept_async(server_io).await.unwrap();
            let mut transport = WsTransport::new(ws);
            let frame = transport.recv().await.unwrap().unwrap();
            transport.send(&frame).await.unwrap();
            transport.close().await.unwrap();
        });

        let (ws, _) = client_async("ws://localhost/", client_io).await.unwrap();
        let mut transport = WsTransport::new(ws);

        let frame = Frame::Request {
            id: CorrelationId::new(1),
            handler: "echo".into(),
            params: Value::object([("msg", Value::text("hi"))]),
            payload: None,
        };
        transport.send(&frame).await.unwrap();
        let echoed = transport.recv().await.unwrap().unwrap();
        assert_eq!(echoed, frame);

        // Clean close surfaces as end of stream, not an error.
        assert_matches!(transport.recv().await, Ok(None));
        server.await.unwrap();
    }
}
