//! Per-connection driver.
//!
//! Each accepted transport gets one worker task running [`run`]. The worker
//! owns the transport exclusively: it is the only reader and the only
//! writer, so per-connection frame ordering falls out of the loop
//! structure. Mutation and subscription work runs in separate tasks that
//! funnel their frames through a bounded channel back into this loop.
//!
//! Protocol violations (corrupt frames, duplicate in-flight ids, frames a
//! client must not send) end the connection with a best-effort `Goodbye`;
//! everything else is answered on the wire and leaves the connection open.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, warn};

use tether_transport::FrameTransport;
use tether_wire::{CorrelationId, Frame};

use crate::dispatch::{self, DispatchCtx};
use crate::server::Shared;

/// One in-flight exchange on a connection.
pub(crate) enum Exchange {
    /// Mutation executing; the entry is removed when its response is queued.
    Mutation,
    /// Live subscription; aborting the handle tears the stream down.
    Subscription(AbortHandle),
}

/// State owned by one connection's driver, shared with its worker tasks.
pub(crate) struct ConnectionState {
    pub conn_id: u64,
    exchanges: Mutex<HashMap<CorrelationId, Exchange>>,
    /// Ids torn down by unsubscribe whose streaming task may still have
    /// frames queued. The writer drops updates for these before send.
    cancelled: Mutex<HashSet<CorrelationId>>,
    tasks: Mutex<JoinSet<()>>,
}

impl ConnectionState {
    pub fn new(conn_id: u64) -> Self {
        Self {
            conn_id,
            exchanges: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Whether the id names an in-flight exchange.
    pub async fn is_live(&self, id: CorrelationId) -> bool {
        self.exchanges.lock().await.contains_key(&id)
    }

    /// Whether the id was torn down by unsubscribe.
    pub async fn is_cancelled(&self, id: CorrelationId) -> bool {
        self.cancelled.lock().await.contains(&id)
    }

    /// Register a mutation and spawn its task. Fails if the id is in use.
    pub async fn spawn_mutation(
        &self,
        id: CorrelationId,
        task: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> bool {
        let mut exchanges = self.exchanges.lock().await;
        if exchanges.contains_key(&id) {
            return false;
        }
        // A legally reused id sheds the tombstone of its previous life.
        self.cancelled.lock().await.remove(&id);
        exchanges.insert(id, Exchange::Mutation);
        self.tasks.lock().await.spawn(task);
        true
    }

    /// Register a subscription and spawn its streaming task. Fails if the
    /// id is in use.
    pub async fn spawn_subscription(
        &self,
        id: CorrelationId,
        task: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> bool {
        let mut exchanges = self.exchanges.lock().await;
        if exchanges.contains_key(&id) {
            return false;
        }
        self.cancelled.lock().await.remove(&id);
        let handle = self.tasks.lock().await.spawn(task);
        exchanges.insert(id, Exchange::Subscription(handle));
        true
    }

    /// Cancel a live subscription. Idempotent: unknown ids and mutation ids
    /// are left untouched.
    pub async fn cancel_subscription(&self, id: CorrelationId) -> bool {
        let mut exchanges = self.exchanges.lock().await;
        match exchanges.get(&id) {
            Some(Exchange::Subscription(_)) => {
                // Tombstone first so the writer filter is already in effect
                // when the abort lands.
                self.cancelled.lock().await.insert(id);
                if let Some(Exchange::Subscription(handle)) = exchanges.remove(&id) {
                    handle.abort();
                }
                true
            }
            _ => false,
        }
    }

    /// Remove a finished exchange. Called by worker tasks on completion.
    pub async fn finish(&self, id: CorrelationId) {
        self.exchanges.lock().await.remove(&id);
    }

    /// Abort every in-flight exchange. Dropping the streaming tasks drops
    /// their change streams, which cancels the underlying sources.
    pub async fn teardown(&self) {
        self.exchanges.lock().await.clear();
        self.tasks.lock().await.abort_all();
    }
}

/// Outcome of handling one inbound frame.
pub(crate) enum Handled {
    Continue,
    /// Immediate reply the driver sends itself (request rejections).
    Reply(Frame),
    /// Peer said goodbye.
    Stop,
}

/// Unrecoverable client behavior; ends the connection.
#[derive(Debug)]
pub(crate) struct Violation {
    pub reason: String,
}

impl Violation {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Drive one connection to completion.
pub(crate) async fn run<T: FrameTransport>(shared: Arc<Shared>, conn_id: u64, mut transport: T) {
    let credential = match handshake(conn_id, &mut transport, &shared).await {
        Some(credential) => credential,
        None => return,
    };

    info!(conn = conn_id, "connection established");

    let state = Arc::new(ConnectionState::new(conn_id));
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(shared.config.write_buffer);
    let ctx = DispatchCtx {
        shared: Arc::clone(&shared),
        state: Arc::clone(&state),
        out: out_tx,
        credential,
    };

    let mut close_reason: Option<String> = None;
    loop {
        tokio::select! {
            inbound = transport.recv() => match inbound {
                Ok(Some(frame)) => {
                    debug!(conn = conn_id, kind = frame.kind_name(), "frame received");
                    match dispatch::handle_frame(&ctx, frame).await {
                        Ok(Handled::Continue) => {}
                        Ok(Handled::Reply(reply)) => {
                            if transport.send(&reply).await.is_err() {
                                break;
                            }
                        }
                        Ok(Handled::Stop) => break,
                        Err(violation) => {
                            warn!(conn = conn_id, reason = %violation.reason, "protocol violation");
                            let goodbye = Frame::Goodbye {
                                reason: violation.reason.clone(),
                            };
                            let _ = transport.send(&goodbye).await;
                            close_reason = Some(violation.reason);
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_protocol_fault() => {
                    warn!(conn = conn_id, error = %e, "closing connection on wire corruption");
                    let goodbye = Frame::Goodbye {
                        reason: "malformed frame".into(),
                    };
                    let _ = transport.send(&goodbye).await;
                    close_reason = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    debug!(conn = conn_id, error = %e, "transport error");
                    break;
                }
            },
            outbound = out_rx.recv() => match outbound {
                Some(frame) => {
                    // Results for an unsubscribed id are discarded here,
                    // before they reach the socket.
                    let stale = match &frame {
                        Frame::Update { id, .. } | Frame::Abort { id, .. } => {
                            state.is_cancelled(*id).await
                        }
                        _ => false,
                    };
                    if stale {
                        continue;
                    }
                    if transport.send(&frame).await.is_err() {
                        break;
                    }
                }
                // The ctx keeps a sender alive, so the channel never closes
                // while this loop runs.
                None => break,
            },
        }
    }

    state.teardown().await;
    let _ = transport.close().await;
    info!(
        conn = conn_id,
        reason = close_reason.as_deref().unwrap_or("peer closed"),
        "connection closed"
    );
}

/// Await the opening `Hello` and answer it.
async fn handshake<T: FrameTransport>(
    conn_id: u64,
    transport: &mut T,
    shared: &Shared,
) -> Option<String> {
    match transport.recv().await {
        Ok(Some(Frame::Hello { credential })) => {
            if shared.authorizer.authenticate(&credential).await {
                let welcome = Frame::Welcome { conn_id };
                if transport.send(&welcome).await.is_err() {
                    return None;
                }
                Some(credential)
            } else {
                warn!(conn = conn_id, "handshake rejected");
                let goodbye = Frame::Goodbye {
                    reason: "unauthorized".into(),
                };
                let _ = transport.send(&goodbye).await;
                let _ = transport.close().await;
                None
            }
        }
        Ok(Some(other)) => {
            warn!(
                conn = conn_id,
                kind = other.kind_name(),
                "expected hello as first frame"
            );
            let goodbye = Frame::Goodbye {
                reason: "expected hello".into(),
            };
            let _ = transport.send(&goodbye).await;
            let _ = transport.close().await;
            None
        }
        Ok(None) => None,
        Err(e) => {
            debug!(conn = conn_id, error = %e, "handshake failed");
            None
        }
    }
}
