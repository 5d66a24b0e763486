//! Client side of the tether protocol.
//!
//! A [`Client`] is an explicit connection object: it multiplexes mutations
//! and subscriptions over one transport, correlates replies by id, and
//! reconnects with capped, jittered exponential backoff when the connection
//! drops unexpectedly. Active subscriptions are replayed after a reconnect
//! under fresh correlation ids, so callers observe a fresh
//! optimistic/complete sequence instead of a gap; in-flight mutations are
//! failed with [`ClientError::ConnectionLost`] rather than silently resent.

mod actor;
mod client;
mod connector;
mod reconnect;

pub use client::{Client, ClientConfig, ClientError, Subscription, SubscriptionEvent};
pub use connector::{Connector, WsConnector};
pub use reconnect::ReconnectConfig;
