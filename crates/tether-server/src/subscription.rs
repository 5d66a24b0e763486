//! Subscription streaming.
//!
//! One task per live subscription bridges the handler's source into the
//! frame sequence Optimistic → Complete → Update*, each value validated
//! against the handler's response schema before it is queued. The task is
//! aborted on unsubscribe or connection loss; dropping the change stream
//! propagates cancellation to the producing side synchronously.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use tether_schema::{validate, Schema};
use tether_wire::{CorrelationId, ErrorCode, Frame, ResultKind, Value, WireError};

use crate::connection::ConnectionState;
use crate::dispatch::failure_to_wire;
use crate::handler::{HandlerFailure, SubscriptionSource};

type SourceFuture = Pin<Box<dyn Future<Output = Result<SubscriptionSource, HandlerFailure>> + Send>>;

pub(crate) async fn run(
    state: Arc<ConnectionState>,
    out: mpsc::Sender<Frame>,
    id: CorrelationId,
    source: SourceFuture,
    response: Schema,
    response_error: Schema,
) {
    let error = stream(&state, &out, id, source, &response, &response_error).await;
    if let Some(error) = error {
        let _ = out.send(Frame::Abort { id, error }).await;
    }
    state.finish(id).await;
    debug!(conn = state.conn_id, id = %id, "subscription ended");
}

/// Run the subscription until it fails or its source ends. `None` means the
/// writer went away and no terminal frame is owed.
async fn stream(
    state: &ConnectionState,
    out: &mpsc::Sender<Frame>,
    id: CorrelationId,
    source: SourceFuture,
    response: &Schema,
    response_error: &Schema,
) -> Option<WireError> {
    let source = match source.await {
        Ok(source) => source,
        Err(failure) => return Some(failure_to_wire(failure, response_error)),
    };

    if let Some(value) = source.optimistic {
        match emit(state, out, id, ResultKind::Optimistic, value, response).await {
            Emitted::Sent => {}
            Emitted::Invalid(error) => return Some(error),
            Emitted::WriterGone => return None,
        }
    }

    match source.complete.await {
        Ok(value) => match emit(state, out, id, ResultKind::Complete, value, response).await {
            Emitted::Sent => {}
            Emitted::Invalid(error) => return Some(error),
            Emitted::WriterGone => return None,
        },
        Err(failure) => return Some(failure_to_wire(failure, response_error)),
    }

    let mut changes = source.changes;
    let error = loop {
        match changes.next().await {
            Some(Ok(value)) => {
                match emit(state, out, id, ResultKind::Update, value, response).await {
                    Emitted::Sent => {}
                    Emitted::Invalid(error) => break Some(error),
                    Emitted::WriterGone => break None,
                }
            }
            Some(Err(failure)) => break Some(failure_to_wire(failure, response_error)),
            None => {
                break Some(WireError::new(
                    ErrorCode::StreamExhausted,
                    "change source ended unexpectedly",
                ));
            }
        }
    };
    // Explicit cancel so the producer learns of teardown now rather than at
    // some later drop point.
    changes.cancel();
    error
}

enum Emitted {
    Sent,
    Invalid(WireError),
    WriterGone,
}

async fn emit(
    state: &ConnectionState,
    out: &mpsc::Sender<Frame>,
    id: CorrelationId,
    kind: ResultKind,
    body: Value,
    response: &Schema,
) -> Emitted {
    if let Err(issues) = validate(response, &body) {
        warn!(
            conn = state.conn_id,
            id = %id,
            issues = issues.len(),
            "subscription result did not match response schema"
        );
        return Emitted::Invalid(WireError::new(
            ErrorCode::Unknown,
            "subscription result did not match its declared schema",
        ));
    }
    match out.send(Frame::Update { id, kind, body }).await {
        Ok(()) => Emitted::Sent,
        Err(_) => Emitted::WriterGone,
    }
}
