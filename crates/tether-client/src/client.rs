//! Public client surface.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use tether_transport::{FrameTransport, TransportError};
use tether_wire::{Frame, Value, WireError};

use crate::actor::Actor;
use crate::connector::Connector;
use crate::reconnect::ReconnectConfig;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Opaque bearer credential presented during the handshake.
    pub credential: String,
    /// Reconnection backoff policy.
    pub reconnect: ReconnectConfig,
    /// Capacity of each subscription's event queue. The connection manager
    /// suspends forwarding to a subscription whose consumer lags this far.
    pub subscription_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            reconnect: ReconnectConfig::default(),
            subscription_buffer: 32,
        }
    }
}

/// Client-side failure.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dial or transport failure while establishing a connection.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),
    /// The server rejected the handshake.
    #[error("handshake rejected: {0}")]
    Handshake(String),
    /// The connection dropped while the exchange was in flight. Mutations
    /// are not assumed idempotent, so they are never resent automatically.
    #[error("connection lost")]
    ConnectionLost,
    /// The client was closed, or reconnection attempts were exhausted.
    #[error("client closed")]
    Closed,
    /// The server answered with a typed error.
    #[error("rpc failed: {0}")]
    Rpc(WireError),
}

/// One element of a subscription's result sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// Provisional value; a `Complete` always follows (or the subscription
    /// fails).
    Optimistic(Value),
    /// First authoritative value. Appears again after every reconnect
    /// replay.
    Complete(Value),
    /// Subsequent authoritative value.
    Update(Value),
    /// Terminal failure; the sequence ends after this.
    Failed(WireError),
}

pub(crate) enum Command {
    Call {
        handler: String,
        params: Value,
        payload: Option<Value>,
        reply: oneshot::Sender<Result<Value, ClientError>>,
    },
    Subscribe {
        handler: String,
        params: Value,
        reply: oneshot::Sender<(u64, mpsc::Receiver<SubscriptionEvent>)>,
    },
    Unsubscribe {
        key: u64,
    },
    Close,
}

/// Handle to one live subscription.
///
/// Dropping the handle unsubscribes implicitly; [`Subscription::unsubscribe`]
/// does so explicitly and stops delivery immediately, discarding any frames
/// that arrive afterwards.
pub struct Subscription {
    key: u64,
    events: Option<mpsc::Receiver<SubscriptionEvent>>,
    cmd: mpsc::Sender<Command>,
    done: bool,
}

impl Subscription {
    /// Next element of the sequence. `None` once the subscription has
    /// terminated and all buffered elements were consumed.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        match &mut self.events {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Stop the subscription. Idempotent with the implicit drop path.
    pub async fn unsubscribe(mut self) {
        // Delivery stops here; in-flight frames are discarded unseen.
        self.events = None;
        self.done = true;
        let _ = self.cmd.send(Command::Unsubscribe { key: self.key }).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.cmd.try_send(Command::Unsubscribe { key: self.key });
        }
    }
}

/// A connection to a tether server.
///
/// Cheap to clone; all clones share the same underlying connection.
#[derive(Debug, Clone)]
pub struct Client {
    cmd: mpsc::Sender<Command>,
}

impl Client {
    /// Connect and perform the handshake.
    pub async fn connect<C: Connector>(
        connector: C,
        config: ClientConfig,
    ) -> Result<Client, ClientError> {
        let transport = connector
            .connect()
            .await
            .map_err(ClientError::Connect)?;
        let transport = handshake(transport, &config.credential).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = Actor::new(connector, config, cmd_rx);
        tokio::spawn(actor.run(transport));
        Ok(Client { cmd: cmd_tx })
    }

    /// Invoke a mutation and await its result.
    ///
    /// No timeout is imposed here; callers own their deadlines.
    pub async fn call(
        &self,
        handler: &str,
        params: Value,
        payload: Option<Value>,
    ) -> Result<Value, ClientError> {
        let (reply, response) = oneshot::channel();
        self.cmd
            .send(Command::Call {
                handler: handler.to_owned(),
                params,
                payload,
                reply,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }

    /// Open a subscription.
    ///
    /// The sequence is infinite until unsubscribed or the client is closed;
    /// it survives reconnects by replaying under a fresh correlation id.
    pub async fn subscribe(
        &self,
        handler: &str,
        params: Value,
    ) -> Result<Subscription, ClientError> {
        let (reply, response) = oneshot::channel();
        self.cmd
            .send(Command::Subscribe {
                handler: handler.to_owned(),
                params,
                reply,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        let (key, events) = response.await.map_err(|_| ClientError::Closed)?;
        Ok(Subscription {
            key,
            events: Some(events),
            cmd: self.cmd.clone(),
            done: false,
        })
    }

    /// Close the connection, cancel pending work, and suppress reconnects.
    pub async fn close(&self) {
        let _ = self.cmd.send(Command::Close).await;
    }
}

/// Present the credential and await the server's verdict.
pub(crate) async fn handshake<T: FrameTransport>(
    mut transport: T,
    credential: &str,
) -> Result<T, ClientError> {
    transport
        .send(&Frame::Hello {
            credential: credential.to_owned(),
        })
        .await
        .map_err(ClientError::Connect)?;
    match transport.recv().await {
        Ok(Some(Frame::Welcome { .. })) => Ok(transport),
        Ok(Some(Frame::Goodbye { reason })) => Err(ClientError::Handshake(reason)),
        Ok(Some(other)) => Err(ClientError::Handshake(format!(
            "unexpected {} frame",
            other.kind_name()
        ))),
        Ok(None) => Err(ClientError::Handshake(
            "connection closed during handshake".into(),
        )),
        Err(e) => Err(ClientError::Connect(e)),
    }
}
