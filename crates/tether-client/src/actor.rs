//! Connection manager actor.
//!
//! One task owns the transport, the pending-request table, and the
//! subscription registry. It is the single writer for the socket; callers
//! talk to it through commands and get results back through oneshot replies
//! and per-subscription event queues.
//!
//! Subscriptions are keyed twice: a stable client-side key that survives
//! reconnects, and the wire correlation id of the current attempt. On
//! reconnect, every surviving subscription is re-issued under a fresh wire
//! id and the old ids become invalid.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tether_transport::FrameTransport;
use tether_wire::{CorrelationId, Frame, Outcome, ResultKind, Value};

use crate::client::{handshake, ClientConfig, ClientError, Command, SubscriptionEvent};
use crate::connector::Connector;

struct SubEntry {
    handler: String,
    params: Value,
    events: mpsc::Sender<SubscriptionEvent>,
    wire_id: Option<CorrelationId>,
}

enum Exit {
    /// Connection dropped or desynced; reconnection policy applies.
    Lost,
    /// Explicit close; reconnection is suppressed.
    Close,
}

pub(crate) struct Actor<C: Connector> {
    connector: C,
    config: ClientConfig,
    cmd_rx: mpsc::Receiver<Command>,
    /// In-flight mutations by wire id.
    pending: HashMap<CorrelationId, oneshot::Sender<Result<Value, ClientError>>>,
    /// Wire id of the current attempt → stable subscription key.
    by_wire: HashMap<CorrelationId, u64>,
    /// Stable subscription key → subscription.
    subs: HashMap<u64, SubEntry>,
    /// Next correlation id. Monotonic across reconnects, so an inbound id
    /// at or above this was never issued by us.
    next_id: u64,
    next_key: u64,
}

impl<C: Connector> Actor<C> {
    pub fn new(connector: C, config: ClientConfig, cmd_rx: mpsc::Receiver<Command>) -> Self {
        Self {
            connector,
            config,
            cmd_rx,
            pending: HashMap::new(),
            by_wire: HashMap::new(),
            subs: HashMap::new(),
            next_id: 1,
            next_key: 1,
        }
    }

    pub async fn run(mut self, mut transport: C::Transport) {
        loop {
            match self.online(&mut transport).await {
                Exit::Close => {
                    let _ = transport
                        .send(&Frame::Goodbye {
                            reason: "client closed".into(),
                        })
                        .await;
                    let _ = transport.close().await;
                    self.shutdown();
                    return;
                }
                Exit::Lost => {
                    let _ = transport.close().await;
                    self.drop_connection_state();
                    match self.reconnect().await {
                        Some(fresh) => transport = fresh,
                        None => {
                            self.shutdown();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Serve one established connection until it ends.
    async fn online(&mut self, transport: &mut C::Transport) -> Exit {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Call { handler, params, payload, reply }) => {
                        let id = self.allocate_id();
                        self.pending.insert(id, reply);
                        let frame = Frame::Request { id, handler, params, payload };
                        if transport.send(&frame).await.is_err() {
                            return Exit::Lost;
                        }
                    }
                    Some(Command::Subscribe { handler, params, reply }) => {
                        let key = self.register_subscription(handler, params, reply);
                        if self.issue_subscription(key, transport).await.is_err() {
                            return Exit::Lost;
                        }
                    }
                    Some(Command::Unsubscribe { key }) => {
                        if let Some(entry) = self.subs.remove(&key) {
                            if let Some(id) = entry.wire_id {
                                self.by_wire.remove(&id);
                                if transport.send(&Frame::Unsubscribe { id }).await.is_err() {
                                    return Exit::Lost;
                                }
                            }
                        }
                    }
                    Some(Command::Close) | None => return Exit::Close,
                },
                inbound = transport.recv() => match inbound {
                    Ok(Some(frame)) => {
                        if self.handle_frame(frame, transport).await.is_err() {
                            return Exit::Lost;
                        }
                    }
                    Ok(None) => {
                        debug!("server closed the connection");
                        return Exit::Lost;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport failure");
                        return Exit::Lost;
                    }
                },
            }
        }
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        transport: &mut C::Transport,
    ) -> Result<(), ()> {
        let frame_kind = frame.kind_name();
        match frame {
            Frame::Response { id, outcome } => {
                if let Some(reply) = self.pending.remove(&id) {
                    let result = match outcome {
                        Outcome::Ok(value) => Ok(value),
                        Outcome::Err(error) => Err(ClientError::Rpc(error)),
                    };
                    let _ = reply.send(result);
                    Ok(())
                } else if let Some(key) = self.by_wire.remove(&id) {
                    // A response frame for a subscription request is its
                    // rejection (validation, authorization, unknown name).
                    match outcome {
                        Outcome::Err(error) => {
                            if let Some(entry) = self.subs.remove(&key) {
                                let _ =
                                    entry.events.send(SubscriptionEvent::Failed(error)).await;
                            }
                            Ok(())
                        }
                        Outcome::Ok(_) => {
                            warn!(id = %id, "success response to a subscription request");
                            Err(())
                        }
                    }
                } else {
                    self.check_known(id)
                }
            }
            Frame::Update { id, kind, body } => {
                let Some(&key) = self.by_wire.get(&id) else {
                    return self.check_known(id);
                };
                let event = match kind {
                    ResultKind::Optimistic => SubscriptionEvent::Optimistic(body),
                    ResultKind::Complete => SubscriptionEvent::Complete(body),
                    ResultKind::Update => SubscriptionEvent::Update(body),
                };
                let delivered = match self.subs.get(&key) {
                    Some(entry) => entry.events.send(event).await.is_ok(),
                    None => false,
                };
                if !delivered {
                    // Consumer dropped its handle; tear the stream down.
                    self.by_wire.remove(&id);
                    self.subs.remove(&key);
                    if transport.send(&Frame::Unsubscribe { id }).await.is_err() {
                        return Err(());
                    }
                }
                Ok(())
            }
            Frame::Abort { id, error } => {
                if let Some(key) = self.by_wire.remove(&id) {
                    if let Some(entry) = self.subs.remove(&key) {
                        let _ = entry.events.send(SubscriptionEvent::Failed(error)).await;
                    }
                    Ok(())
                } else {
                    self.check_known(id)
                }
            }
            Frame::Goodbye { reason } => {
                debug!(reason = %reason, "server said goodbye");
                Err(())
            }
            Frame::Hello { .. }
            | Frame::Welcome { .. }
            | Frame::Request { .. }
            | Frame::Unsubscribe { .. } => {
                warn!(kind = frame_kind, "server sent a client-only frame");
                Err(())
            }
        }
    }

    /// A frame for an id this client never issued means the peer is
    /// desynced; late frames for terminated exchanges are merely discarded.
    fn check_known(&self, id: CorrelationId) -> Result<(), ()> {
        if id.raw() >= self.next_id {
            warn!(id = %id, "frame for an id never issued");
            Err(())
        } else {
            Ok(())
        }
    }

    fn allocate_id(&mut self) -> CorrelationId {
        let id = CorrelationId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn register_subscription(
        &mut self,
        handler: String,
        params: Value,
        reply: oneshot::Sender<(u64, mpsc::Receiver<SubscriptionEvent>)>,
    ) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        let (events_tx, events_rx) = mpsc::channel(self.config.subscription_buffer);
        self.subs.insert(
            key,
            SubEntry {
                handler,
                params,
                events: events_tx,
                wire_id: None,
            },
        );
        let _ = reply.send((key, events_rx));
        key
    }

    /// Send the request frame for a registered subscription under a fresh
    /// wire id.
    async fn issue_subscription(
        &mut self,
        key: u64,
        transport: &mut C::Transport,
    ) -> Result<(), ()> {
        let id = self.allocate_id();
        let Some(entry) = self.subs.get_mut(&key) else {
            return Ok(());
        };
        entry.wire_id = Some(id);
        let frame = Frame::Request {
            id,
            handler: entry.handler.clone(),
            params: entry.params.clone(),
            payload: None,
        };
        self.by_wire.insert(id, key);
        transport.send(&frame).await.map_err(|_| ())
    }

    /// Fail in-flight mutations and invalidate wire ids, keeping
    /// subscriptions registered for replay.
    fn drop_connection_state(&mut self) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(ClientError::ConnectionLost));
        }
        self.by_wire.clear();
        for entry in self.subs.values_mut() {
            entry.wire_id = None;
        }
    }

    /// Final teardown. Dropping the subscription entries closes their event
    /// queues, which is how callers observe the end of the sequence.
    fn shutdown(&mut self) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(ClientError::Closed));
        }
        self.by_wire.clear();
        self.subs.clear();
    }

    async fn reconnect(&mut self) -> Option<C::Transport> {
        let max = self.config.reconnect.max_attempts;
        for attempt in 1..=max {
            let delay = self.config.reconnect.delay_for(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            if self.wait_offline(delay).await.is_err() {
                return None;
            }
            match self.connector.connect().await {
                Ok(raw) => match handshake(raw, &self.config.credential).await {
                    Ok(mut transport) => {
                        if self.replay(&mut transport).await.is_ok() {
                            info!(attempt, "reconnected");
                            return Some(transport);
                        }
                        warn!(attempt, "connection dropped during subscription replay");
                    }
                    Err(e) => warn!(attempt, error = %e, "reconnect handshake failed"),
                },
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }
        warn!(attempts = max, "reconnect attempts exhausted");
        None
    }

    /// Sit out the backoff delay while still answering commands. `Err`
    /// means the client was closed meanwhile.
    async fn wait_offline(&mut self, delay: Duration) -> Result<(), ()> {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Call { reply, .. }) => {
                        let _ = reply.send(Err(ClientError::ConnectionLost));
                    }
                    Some(Command::Subscribe { handler, params, reply }) => {
                        // Registered now, issued by the replay after the
                        // next successful handshake.
                        self.register_subscription(handler, params, reply);
                    }
                    Some(Command::Unsubscribe { key }) => {
                        self.subs.remove(&key);
                    }
                    Some(Command::Close) | None => return Err(()),
                },
            }
        }
    }

    /// Re-issue every surviving subscription under fresh correlation ids.
    async fn replay(&mut self, transport: &mut C::Transport) -> Result<(), ()> {
        let keys: Vec<u64> = self.subs.keys().copied().collect();
        for key in keys {
            self.issue_subscription(key, transport).await?;
        }
        Ok(())
    }
}
