//! Wire-level types and binary codec for the tether protocol.
//!
//! A frame is one protocol message unit. Frames carry dynamic [`Value`]
//! payloads and are encoded as self-describing CBOR, so heterogeneous
//! payloads decode without external schema context; schema validation is a
//! separate step performed above this layer.

pub mod codec;
pub mod frame;
pub mod value;

pub use codec::{decode, decode_with_limit, encode, DecodeError, EncodeError, MAX_FRAME_BYTES};
pub use frame::{CorrelationId, ErrorCode, Frame, Outcome, ResultKind, WireError};
pub use value::Value;
