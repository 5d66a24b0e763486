//! Server entry point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use tether_transport::{FrameListener, FrameTransport, TransportError};

use crate::authorize::Authorizer;
use crate::connection;
use crate::registry::HandlerRegistry;

/// Server tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Capacity of the per-connection outbound frame queue. Mutation and
    /// subscription tasks suspend when it fills, which is the connection's
    /// backpressure.
    pub write_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { write_buffer: 64 }
    }
}

/// Immutable server internals shared by every connection worker.
pub(crate) struct Shared {
    pub registry: HandlerRegistry,
    pub authorizer: Box<dyn Authorizer>,
    pub config: ServerConfig,
}

/// A tether protocol server.
///
/// Holds the frozen handler registry and the authorizer; each accepted
/// transport is driven by its own worker task, so one slow connection never
/// head-of-line-blocks the others.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
    next_conn_id: Arc<AtomicU64>,
}

impl Server {
    pub fn new(registry: HandlerRegistry, authorizer: impl Authorizer + 'static) -> Self {
        Self::with_config(registry, authorizer, ServerConfig::default())
    }

    pub fn with_config(
        registry: HandlerRegistry,
        authorizer: impl Authorizer + 'static,
        config: ServerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                authorizer: Box::new(authorizer),
                config,
            }),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Accept connections until the listener fails.
    pub async fn serve<L: FrameListener>(&self, mut listener: L) -> Result<(), TransportError> {
        info!(handlers = self.shared.registry.len(), "server accepting connections");
        loop {
            let transport = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(transport).await;
            });
        }
    }

    /// Drive one connection to completion on the current task.
    ///
    /// `serve` spawns this per accepted transport; tests call it directly
    /// with an in-memory transport.
    pub async fn handle_connection<T: FrameTransport>(&self, transport: T) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        connection::run(Arc::clone(&self.shared), conn_id, transport).await;
    }
}
