//! omemo_proto — OMEMO wire format
//!
//! The OMEMO key envelope uses a small, fixed subset of the Protobuf wire
//! format: uint32 varints and length-delimited byte fields, with single-byte
//! tags (field numbers 1..15). This crate implements that subset plus the
//! framing of the two Signal message types carried inside `<key>` elements.
//!
//! # Module layout
//! - `codec` — varint helpers, field writers, descriptor-driven parser
//! - `frame` — SerializedKey encoding, WhisperMessage / PreKeyWhisperMessage
//!   framing and the exact wire-size constants
//! - `error` — parse error type

pub mod codec;
pub mod error;
pub mod frame;

pub use error::ProtoError;
