//! Handler execution types.
//!
//! Handlers receive validated, typed input and either produce a single
//! result (mutations) or a [`SubscriptionSource`]: an optional fast
//! snapshot, a future for the authoritative initial value, and a
//! cancellable stream of changes. Handlers are expected to return quickly;
//! long-running work belongs in the futures and streams they hand back.

use std::future::Future;
use std::pin::Pin;

use tether_wire::Value;
use tokio::sync::mpsc;

/// Validated input passed to a handler's execution function.
#[derive(Debug, Clone)]
pub struct HandlerInput {
    pub params: Value,
    pub payload: Option<Value>,
}

/// Failure reported by handler code.
#[derive(Debug)]
pub enum HandlerFailure {
    /// Domain error matching the handler's declared error schema; passed
    /// through to the caller verbatim.
    Domain(Value),
    /// Anything else. Reported to the caller as an unknown error carrying
    /// this message for diagnostics.
    Internal(String),
}

impl HandlerFailure {
    pub fn internal(message: impl Into<String>) -> Self {
        HandlerFailure::Internal(message.into())
    }
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerFailure::Domain(_) => f.write_str("domain error"),
            HandlerFailure::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

/// Boxed future producing one handler value.
pub type ValueFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerFailure>> + Send>>;

/// Wrap an already-computed value as a [`ValueFuture`].
pub fn ready_value(value: Value) -> ValueFuture {
    Box::pin(std::future::ready(Ok(value)))
}

/// What a subscription handler hands to the engine.
///
/// The engine emits `optimistic` first (if present), awaits `complete` for
/// the authoritative value, then forwards every change until the stream is
/// cancelled or ends.
pub struct SubscriptionSource {
    /// Fast, possibly stale snapshot. Optional by design; the complete
    /// value is the authoritative one.
    pub optimistic: Option<Value>,
    /// The authoritative initial value.
    pub complete: ValueFuture,
    /// Change notifications after the initial value.
    pub changes: ChangeStream,
}

/// Producer half of a change stream.
///
/// Sends fail as soon as the subscription is cancelled, which is how
/// cancellation propagates synchronously to the producing side.
#[derive(Clone)]
pub struct ChangeSender {
    tx: mpsc::Sender<Result<Value, HandlerFailure>>,
}

impl ChangeSender {
    /// Push one change. Suspends while the engine is backed up; fails once
    /// the subscription is cancelled.
    pub async fn send(&self, value: Value) -> Result<(), Cancelled> {
        self.tx.send(Ok(value)).await.map_err(|_| Cancelled)
    }

    /// Report a terminal failure. The subscription ends after this.
    pub async fn fail(&self, failure: HandlerFailure) -> Result<(), Cancelled> {
        self.tx.send(Err(failure)).await.map_err(|_| Cancelled)
    }

    /// Whether the subscription has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the subscription is cancelled. Producers that have
    /// nothing left to push can park on this instead of polling.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// The subscription was cancelled; the producer should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("subscription cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Consumer half of a change stream, owned by the subscription engine.
///
/// Cancelling closes the channel (so in-flight producer sends fail
/// immediately) and invokes the cancel hook exactly once, whichever of
/// explicit cancellation or drop comes first.
pub struct ChangeStream {
    rx: mpsc::Receiver<Result<Value, HandlerFailure>>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ChangeStream {
    /// Create a bounded change channel.
    pub fn channel(capacity: usize) -> (ChangeSender, ChangeStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ChangeSender { tx },
            ChangeStream {
                rx,
                on_cancel: None,
            },
        )
    }

    /// A stream that never yields. For subscriptions whose value only ever
    /// changes by resubscribing.
    pub fn never() -> ChangeStream {
        let (_tx, rx) = mpsc::channel(1);
        ChangeStream {
            rx,
            on_cancel: None,
        }
    }

    /// Attach a hook invoked exactly once when the subscription is torn
    /// down, for propagating cancellation to an external change source.
    pub fn with_cancel(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// Next change, suspending between emissions. `None` means the
    /// producer is gone.
    pub async fn next(&mut self) -> Option<Result<Value, HandlerFailure>> {
        self.rx.recv().await
    }

    /// Stop the stream: close the channel and run the cancel hook.
    pub fn cancel(&mut self) {
        self.rx.close();
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.cancel();
    }
}
