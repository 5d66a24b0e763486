//! Protocol frame types.
//!
//! One encoded frame is one protocol message unit. A connection starts with
//! a `Hello`/`Welcome` exchange; after that the client sends `Request` and
//! `Unsubscribe` frames and the server answers with `Response` (mutations),
//! `Update` (subscription results) and `Abort` (subscription failure)
//! frames. `Goodbye` may be sent by either side before closing.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Correlation id linking a request to its response or result stream.
///
/// Ids are unique per connection while the exchange they name is in flight;
/// an id may be reused only after the prior exchange reached a terminal
/// state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl CorrelationId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for CorrelationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

/// Tag distinguishing provisional from authoritative subscription results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// Fast, possibly stale snapshot delivered before the authoritative
    /// computation completes. At most one per subscription, always first.
    Optimistic,
    /// The first authoritative value. Exactly one per subscription.
    Complete,
    /// A subsequent authoritative value reflecting a change.
    Update,
}

/// Classification of a typed error reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request params or payload failed schema validation.
    Validation,
    /// Credential lacks permission for the handler.
    Unauthorized,
    /// No handler registered under the requested name.
    UnknownHandler,
    /// Domain error declared by the handler's error schema.
    Handler,
    /// Subscription change source ended unexpectedly.
    StreamExhausted,
    /// Handler failure outside its declared error schema.
    Unknown,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::Validation => "validation",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::UnknownHandler => "unknown_handler",
            ErrorCode::Handler => "handler",
            ErrorCode::StreamExhausted => "stream_exhausted",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Typed error reported on the wire.
///
/// `detail` carries the handler-specific error shape for `Handler` errors
/// and the validation issue list for `Validation` errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    pub detail: Option<Value>,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for WireError {}

/// Result of a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Value),
    Err(WireError),
}

/// Protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// First frame on a connection, client to server. Carries the opaque
    /// bearer credential validated by the authorization collaborator.
    Hello { credential: String },

    /// Handshake acceptance, server to client.
    Welcome { conn_id: u64 },

    /// Orderly close, either direction. After `Goodbye` no further frames
    /// are sent on the connection.
    Goodbye { reason: String },

    /// A mutation or subscription request.
    Request {
        id: CorrelationId,
        handler: String,
        params: Value,
        payload: Option<Value>,
    },

    /// Mutation reply, or rejection of a request before it started
    /// streaming (validation, authorization, unknown handler).
    Response { id: CorrelationId, outcome: Outcome },

    /// One subscription result.
    Update {
        id: CorrelationId,
        kind: ResultKind,
        body: Value,
    },

    /// Terminal subscription failure. No further frames carry this id.
    Abort { id: CorrelationId, error: WireError },

    /// Client signal to stop a subscription. Idempotent; ignored if the
    /// subscription already ended.
    Unsubscribe { id: CorrelationId },
}

impl Frame {
    /// Correlation id of the frame, if it belongs to an exchange.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Frame::Request { id, .. }
            | Frame::Response { id, .. }
            | Frame::Update { id, .. }
            | Frame::Abort { id, .. }
            | Frame::Unsubscribe { id } => Some(*id),
            Frame::Hello { .. } | Frame::Welcome { .. } | Frame::Goodbye { .. } => None,
        }
    }

    /// Short name of the frame kind for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Welcome { .. } => "welcome",
            Frame::Goodbye { .. } => "goodbye",
            Frame::Request { .. } => "request",
            Frame::Response { .. } => "response",
            Frame::Update { .. } => "update",
            Frame::Abort { .. } => "abort",
            Frame::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids() {
        let frame = Frame::Unsubscribe {
            id: CorrelationId::new(7),
        };
        assert_eq!(frame.correlation_id(), Some(CorrelationId(7)));
        assert_eq!(
            Frame::Welcome { conn_id: 1 }.correlation_id(),
            None,
        );
    }

    #[test]
    fn error_display() {
        let err = WireError::new(ErrorCode::Validation, "params.msg: expected text");
        assert_eq!(err.to_string(), "validation: params.msg: expected text");
    }
}
