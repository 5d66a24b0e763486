//! Handler registry.
//!
//! The registry is a closed mapping from handler name to configuration,
//! assembled once from a fixed set of handler groups before the server
//! accepts connections, and never mutated afterwards. Registration errors
//! are start-up errors; at runtime an unknown name in a request is answered
//! on the wire, not raised here.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use tether_schema::Schema;
use tether_wire::Value;

use crate::handler::{HandlerFailure, HandlerInput, SubscriptionSource, ValueFuture};

/// Registry misuse. Fatal during start-up wiring, never seen at runtime.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler {name:?} registered twice")]
    Duplicate { name: String },
    #[error("no handler named {name:?}")]
    NotFound { name: String },
}

/// What a handler does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// One-shot request with a single success/error response.
    Mutation,
    /// Long-lived request streaming results until cancelled.
    Subscription,
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Mutation => f.write_str("mutation"),
            HandlerKind::Subscription => f.write_str("subscription"),
        }
    }
}

type MutationFn = Arc<dyn Fn(HandlerInput) -> ValueFuture + Send + Sync>;

type SubscriptionFuture =
    std::pin::Pin<Box<dyn Future<Output = Result<SubscriptionSource, HandlerFailure>> + Send>>;

type SubscriptionFn = Arc<dyn Fn(HandlerInput) -> SubscriptionFuture + Send + Sync>;

/// Execution function of a handler, tagged by kind.
#[derive(Clone)]
pub enum HandlerExec {
    Mutation(MutationFn),
    Subscription(SubscriptionFn),
}

/// Wrap an async function as a mutation execution function.
pub fn mutation<F, Fut>(f: F) -> HandlerExec
where
    F: Fn(HandlerInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerFailure>> + Send + 'static,
{
    HandlerExec::Mutation(Arc::new(move |input| Box::pin(f(input))))
}

/// Wrap an async function as a subscription execution function.
pub fn subscription_handler<F, Fut>(f: F) -> HandlerExec
where
    F: Fn(HandlerInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SubscriptionSource, HandlerFailure>> + Send + 'static,
{
    HandlerExec::Subscription(Arc::new(move |input| Box::pin(f(input))))
}

/// Immutable configuration of one named handler.
///
/// Constructed as a plain struct literal; groups of related handlers are
/// ordinary functions returning `Vec<HandlerConfig>`.
#[derive(Clone)]
pub struct HandlerConfig {
    /// Unique registry key.
    pub name: String,
    /// Schema for `Request.params`.
    pub request_params: Schema,
    /// Schema for `Request.payload`; `None` forbids a payload.
    pub payload: Option<Schema>,
    /// Schema every success result must match.
    pub response: Schema,
    /// Schema for domain errors the handler may report.
    pub response_error: Schema,
    /// The execution function.
    pub exec: HandlerExec,
}

impl HandlerConfig {
    pub fn kind(&self) -> HandlerKind {
        match self.exec {
            HandlerExec::Mutation(_) => HandlerKind::Mutation,
            HandlerExec::Subscription(_) => HandlerKind::Subscription,
        }
    }
}

impl std::fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Frozen name → handler mapping.
#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerConfig>,
}

impl HandlerRegistry {
    /// Assemble a registry from handler groups, rejecting duplicates.
    pub fn collect(
        groups: impl IntoIterator<Item = Vec<HandlerConfig>>,
    ) -> Result<Self, RegistryError> {
        let mut handlers = HashMap::new();
        for group in groups {
            for config in group {
                let name = config.name.clone();
                if handlers.insert(name.clone(), config).is_some() {
                    return Err(RegistryError::Duplicate { name });
                }
            }
        }
        Ok(Self { handlers })
    }

    /// Runtime lookup by request handler name.
    pub fn lookup(&self, name: &str) -> Option<&HandlerConfig> {
        self.handlers.get(name)
    }

    /// Start-up lookup that treats absence as misuse.
    pub fn get(&self, name: &str) -> Result<&HandlerConfig, RegistryError> {
        self.handlers.get(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_owned(),
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ready_value;
    use assert_matches::assert_matches;

    fn echo_config(name: &str) -> HandlerConfig {
        HandlerConfig {
            name: name.to_owned(),
            request_params: Schema::single("msg", Schema::Text),
            payload: None,
            response: Schema::single("msg", Schema::Text),
            response_error: Schema::Any,
            exec: mutation(|input: HandlerInput| async move { Ok(input.params) }),
        }
    }

    #[test]
    fn collect_and_lookup() {
        let registry =
            HandlerRegistry::collect([vec![echo_config("echo")], vec![echo_config("ping")]])
                .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("echo").unwrap().kind(), HandlerKind::Mutation);
        assert!(registry.lookup("missing").is_none());
        assert_matches!(
            registry.get("missing"),
            Err(RegistryError::NotFound { .. })
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = HandlerRegistry::collect([
            vec![echo_config("echo")],
            vec![echo_config("echo")],
        ]);
        assert_matches!(result, Err(RegistryError::Duplicate { name }) if name == "echo");
    }

    #[test]
    fn subscription_kind_is_tagged() {
        let config = HandlerConfig {
            name: "watch".into(),
            request_params: Schema::Any,
            payload: None,
            response: Schema::Any,
            response_error: Schema::Any,
            exec: subscription_handler(|_input: HandlerInput| async move {
                Ok(SubscriptionSource {
                    optimistic: None,
                    complete: ready_value(Value::Null),
                    changes: crate::handler::ChangeStream::never(),
                })
            }),
        };
        assert_eq!(config.kind(), HandlerKind::Subscription);
    }
}
