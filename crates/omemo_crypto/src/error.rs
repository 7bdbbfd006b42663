use omemo_proto::ProtoError;
use thiserror::Error;

/// Unified error type for the engine.
///
/// Any error returned from a mutating entry point guarantees the session
/// and the skipped-key store are unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed wire data: {0}")]
    Protobuf(ProtoError),

    #[error("crypto primitive failure")]
    Crypto,

    #[error("corrupt message: {0}")]
    Corrupt(&'static str),

    #[error("invalid parameter: {0}")]
    Param(&'static str),

    #[error("operation not valid in the current session state")]
    State,

    #[error("prekey bundle signature does not verify")]
    Signature,

    #[error("message key is no longer available")]
    KeyGone,

    #[error("skip of {0} messages exceeds the allowed maximum")]
    MaxSkip(u64),

    #[error("skipped-key store has no room left")]
    SkipBufferFull,

    #[error("skipped-key store failure: {0}")]
    KeyStore(String),
}

impl From<ProtoError> for CryptoError {
    fn from(err: ProtoError) -> Self {
        // Wrong version bytes and out-of-bounds ciphertext lengths are
        // semantic rejections, not broken encodings.
        if err.is_frame_error() {
            CryptoError::Corrupt("invalid message frame")
        } else {
            CryptoError::Protobuf(err)
        }
    }
}
