//! Server side of the tether protocol.
//!
//! A [`Server`] owns a frozen [`HandlerRegistry`] and an [`Authorizer`] and
//! drives one connection worker per accepted transport. Within a
//! connection, mutations execute as independent tasks and each subscription
//! streams Optimistic → Complete → Update* frames through a single
//! per-connection writer, so frames for one correlation id are never
//! reordered.

pub mod authorize;
pub mod handler;
pub mod registry;
pub mod server;

mod connection;
mod dispatch;
mod subscription;

pub use authorize::{AllowAll, Authorizer};
pub use handler::{
    ready_value, Cancelled, ChangeSender, ChangeStream, HandlerFailure, HandlerInput,
    SubscriptionSource, ValueFuture,
};
pub use registry::{
    mutation, subscription_handler, HandlerConfig, HandlerExec, HandlerKind, HandlerRegistry,
    RegistryError,
};
pub use server::{Server, ServerConfig};
