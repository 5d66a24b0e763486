//! Request dispatch.
//!
//! Lookup, authorization, and schema validation all happen here, before
//! handler code runs. Failures at this stage are answered with typed error
//! frames and never reach the handler.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use tether_schema::{issues_to_value, validate, Issue, Schema};
use tether_wire::{CorrelationId, ErrorCode, Frame, Outcome, Value, WireError};

use crate::connection::{ConnectionState, Handled, Violation};
use crate::handler::{HandlerFailure, HandlerInput, ValueFuture};
use crate::registry::HandlerExec;
use crate::server::Shared;
use crate::subscription;

/// Everything a dispatched task needs from its connection.
pub(crate) struct DispatchCtx {
    pub shared: Arc<Shared>,
    pub state: Arc<ConnectionState>,
    pub out: mpsc::Sender<Frame>,
    pub credential: String,
}

/// Handle one inbound frame after the handshake.
pub(crate) async fn handle_frame(ctx: &DispatchCtx, frame: Frame) -> Result<Handled, Violation> {
    match frame {
        Frame::Request {
            id,
            handler,
            params,
            payload,
        } => handle_request(ctx, id, handler, params, payload).await,
        Frame::Unsubscribe { id } => {
            // Idempotent by contract: cancelling an id that already ended
            // (or never existed) is a no-op.
            ctx.state.cancel_subscription(id).await;
            Ok(Handled::Continue)
        }
        Frame::Goodbye { .. } => Ok(Handled::Stop),
        other => Err(Violation::new(format!(
            "client sent {} frame",
            other.kind_name()
        ))),
    }
}

async fn handle_request(
    ctx: &DispatchCtx,
    id: CorrelationId,
    handler: String,
    params: Value,
    payload: Option<Value>,
) -> Result<Handled, Violation> {
    if ctx.state.is_live(id).await {
        return Err(Violation::new(format!(
            "correlation id {id} reused while in flight"
        )));
    }

    let Some(config) = ctx.shared.registry.lookup(&handler) else {
        return Ok(reject(
            id,
            WireError::new(
                ErrorCode::UnknownHandler,
                format!("no handler named {handler:?}"),
            ),
        ));
    };

    if !ctx
        .shared
        .authorizer
        .authorize(&ctx.credential, &handler)
        .await
    {
        return Ok(reject(
            id,
            WireError::new(
                ErrorCode::Unauthorized,
                format!("credential may not invoke {handler:?}"),
            ),
        ));
    }

    if let Err(issues) = validate(&config.request_params, &params) {
        return Ok(reject(id, validation_error("invalid params", &issues)));
    }
    match (&config.payload, &payload) {
        (Some(schema), Some(value)) => {
            if let Err(issues) = validate(schema, value) {
                return Ok(reject(id, validation_error("invalid payload", &issues)));
            }
        }
        // An absent payload is validated as null so optional payload
        // schemas accept it.
        (Some(schema), None) => {
            if let Err(issues) = validate(schema, &Value::Null) {
                return Ok(reject(id, validation_error("missing payload", &issues)));
            }
        }
        (None, Some(_)) => {
            return Ok(reject(
                id,
                WireError::new(
                    ErrorCode::Validation,
                    format!("handler {handler:?} does not accept a payload"),
                ),
            ));
        }
        (None, None) => {}
    }

    let input = HandlerInput { params, payload };
    match &config.exec {
        HandlerExec::Mutation(exec) => {
            let task = run_mutation(
                Arc::clone(&ctx.state),
                ctx.out.clone(),
                id,
                exec(input),
                config.response.clone(),
                config.response_error.clone(),
            );
            if !ctx.state.spawn_mutation(id, task).await {
                return Err(Violation::new(format!(
                    "correlation id {id} reused while in flight"
                )));
            }
        }
        HandlerExec::Subscription(exec) => {
            let task = subscription::run(
                Arc::clone(&ctx.state),
                ctx.out.clone(),
                id,
                exec(input),
                config.response.clone(),
                config.response_error.clone(),
            );
            if !ctx.state.spawn_subscription(id, task).await {
                return Err(Violation::new(format!(
                    "correlation id {id} reused while in flight"
                )));
            }
        }
    }
    Ok(Handled::Continue)
}

fn reject(id: CorrelationId, error: WireError) -> Handled {
    Handled::Reply(Frame::Response {
        id,
        outcome: Outcome::Err(error),
    })
}

fn validation_error(message: &str, issues: &[Issue]) -> WireError {
    WireError::new(ErrorCode::Validation, message).with_detail(issues_to_value(issues))
}

/// Map a handler failure to its wire shape, enforcing the declared error
/// schema.
pub(crate) fn failure_to_wire(failure: HandlerFailure, response_error: &Schema) -> WireError {
    match failure {
        HandlerFailure::Domain(value) => {
            if validate(response_error, &value).is_ok() {
                WireError::new(ErrorCode::Handler, "handler error").with_detail(value)
            } else {
                WireError::new(
                    ErrorCode::Unknown,
                    "handler error did not match its declared schema",
                )
                .with_detail(value)
            }
        }
        HandlerFailure::Internal(message) => WireError::new(ErrorCode::Unknown, message),
    }
}

async fn run_mutation(
    state: Arc<ConnectionState>,
    out: mpsc::Sender<Frame>,
    id: CorrelationId,
    fut: ValueFuture,
    response: Schema,
    response_error: Schema,
) {
    let outcome = match fut.await {
        Ok(value) => {
            if let Err(issues) = validate(&response, &value) {
                warn!(
                    conn = state.conn_id,
                    id = %id,
                    issues = issues.len(),
                    "mutation result did not match response schema"
                );
                Outcome::Err(WireError::new(
                    ErrorCode::Unknown,
                    "handler response did not match its declared schema",
                ))
            } else {
                Outcome::Ok(value)
            }
        }
        Err(failure) => Outcome::Err(failure_to_wire(failure, &response_error)),
    };
    state.finish(id).await;
    let _ = out.send(Frame::Response { id, outcome }).await;
}
