use thiserror::Error;

/// Errors produced while reading the Protobuf subset or the message frames.
///
/// `Truncated`..`MissingField` are malformed-encoding errors; the remaining
/// variants are frame-level rejections (wrong version byte, out-of-bounds
/// ciphertext) that callers typically treat as corrupt rather than malformed.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ProtoError {
    #[error("input ends inside a field")]
    Truncated,

    #[error("field {0} is not part of this message")]
    UnknownField(u32),

    #[error("field {id} has wire type {got}, expected {want}")]
    WireType { id: u32, got: u8, want: u8 },

    #[error("field {0} does not match its pinned value")]
    ValueMismatch(u32),

    #[error("required field {0} is missing")]
    MissingField(u32),

    #[error("unsupported version byte {0:#04x}")]
    BadVersion(u8),

    #[error("message too short to carry a frame")]
    TooShort,

    #[error("ciphertext length {0} outside accepted bounds")]
    CiphertextLen(u32),
}

impl ProtoError {
    /// True for the frame-level rejections that indicate a semantically
    /// invalid message rather than a broken Protobuf encoding.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            ProtoError::BadVersion(_) | ProtoError::TooShort | ProtoError::CiphertextLen(_)
        )
    }
}
