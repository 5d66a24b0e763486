//! Binary frame codec.
//!
//! Frames are encoded as a single self-describing CBOR value. The codec is
//! pure and deterministic: object keys are ordered, and the same frame
//! always produces the same bytes.

use thiserror::Error;

use crate::frame::Frame;
use crate::value::Value;

/// Upper bound on a decoded frame, guarding against hostile length claims.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// The value contains something the wire format cannot represent.
#[derive(Debug, Error)]
#[error("encode failed: {0}")]
pub struct EncodeError(#[from] serde_cbor::Error);

/// The bytes are truncated, malformed, oversized, or carry an unsupported
/// type. Decode failures are fatal to the connection that produced them.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },
    #[error("decode failed: {0}")]
    Malformed(#[from] serde_cbor::Error),
}

/// Encode one frame to bytes.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_cbor::to_vec(frame)?)
}

/// Decode one frame, enforcing [`MAX_FRAME_BYTES`].
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    decode_with_limit(bytes, MAX_FRAME_BYTES)
}

/// Decode one frame with an explicit size limit.
pub fn decode_with_limit(bytes: &[u8], limit: usize) -> Result<Frame, DecodeError> {
    if bytes.len() > limit {
        return Err(DecodeError::TooLarge {
            len: bytes.len(),
            limit,
        });
    }
    Ok(serde_cbor::from_slice(bytes)?)
}

/// Encode a bare value (used by tests and tooling; frames embed values
/// directly).
pub fn encode_value(value: &Value) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_cbor::to_vec(value)?)
}

/// Decode a bare value.
pub fn decode_value(bytes: &[u8]) -> Result<Value, DecodeError> {
    Ok(serde_cbor::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CorrelationId, ErrorCode, Outcome, ResultKind, WireError};
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn frame_round_trip() {
        let frames = vec![
            Frame::Hello {
                credential: "token-123".into(),
            },
            Frame::Welcome { conn_id: 42 },
            Frame::Goodbye {
                reason: "shutting down".into(),
            },
            Frame::Request {
                id: CorrelationId::new(1),
                handler: "echo".into(),
                params: Value::object([("msg", Value::text("hi"))]),
                payload: None,
            },
            Frame::Response {
                id: CorrelationId::new(1),
                outcome: Outcome::Ok(Value::object([("msg", Value::text("hi"))])),
            },
            Frame::Response {
                id: CorrelationId::new(2),
                outcome: Outcome::Err(WireError::new(ErrorCode::Validation, "bad params")),
            },
            Frame::Update {
                id: CorrelationId::new(3),
                kind: ResultKind::Optimistic,
                body: Value::Int(0),
            },
            Frame::Abort {
                id: CorrelationId::new(3),
                error: WireError::new(ErrorCode::StreamExhausted, "source ended")
                    .with_detail(Value::text("counter")),
            },
            Frame::Unsubscribe {
                id: CorrelationId::new(3),
            },
        ];
        for frame in frames {
            let bytes = encode(&frame).unwrap();
            assert_eq!(decode(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn deterministic_encoding() {
        let frame = Frame::Request {
            id: CorrelationId::new(9),
            handler: "echo".into(),
            params: Value::object([("b", Value::Int(2)), ("a", Value::Int(1))]),
            payload: Some(Value::Bytes(vec![0, 1, 2])),
        };
        assert_eq!(encode(&frame).unwrap(), encode(&frame).unwrap());
    }

    #[test]
    fn non_finite_float_is_an_encode_error() {
        let frame = Frame::Update {
            id: CorrelationId::new(1),
            kind: ResultKind::Update,
            body: Value::Float(f64::NAN),
        };
        assert!(encode(&frame).is_err());
        let frame = Frame::Update {
            id: CorrelationId::new(1),
            kind: ResultKind::Update,
            body: Value::Float(f64::INFINITY),
        };
        assert!(encode(&frame).is_err());
    }

    #[test]
    fn truncated_bytes_are_a_decode_error() {
        let bytes = encode(&Frame::Welcome { conn_id: 7 }).unwrap();
        assert_matches!(decode(&bytes[..bytes.len() - 1]), Err(DecodeError::Malformed(_)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert_matches!(decode(&[0xff, 0xff, 0xff]), Err(DecodeError::Malformed(_)));
    }

    #[test]
    fn trailing_bytes_are_a_decode_error() {
        let mut bytes = encode(&Frame::Welcome { conn_id: 7 }).unwrap();
        bytes.push(0x00);
        assert_matches!(decode(&bytes), Err(DecodeError::Malformed(_)));
    }

    #[test]
    fn oversized_frame_is_rejected_before_parsing() {
        let bytes = vec![0u8; 32];
        assert_matches!(
            decode_with_limit(&bytes, 16),
            Err(DecodeError::TooLarge { len: 32, limit: 16 })
        );
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            // Finite floats only; the codec rejects the rest by design.
            prop::num::f64::NORMAL.prop_map(Value::Float),
            "[a-z]{0,8}".prop_map(Value::text),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Object),
            ]
        })
    }

    proptest! {
        #[test]
        fn value_round_trip(value in value_strategy()) {
            let bytes = encode_value(&value).unwrap();
            prop_assert_eq!(decode_value(&bytes).unwrap(), value);
        }
    }
}
