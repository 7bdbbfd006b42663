//! omemo_crypto — OMEMO engine core
//!
//! The Signal protocol stack as OMEMO layers it on XMPP: X3DH session
//! bootstrap, the Double Ratchet, the per-recipient key envelope and the
//! persistent device store.
//!
//! # Design principles
//! - NO custom field arithmetic; all primitives come from audited crates.
//! - Zeroize secret material on drop and on error paths.
//! - Failed operations never leave partial session or cache state behind.
//!
//! # Module layout
//! - `keys`     — X25519 key pairs, XEdDSA signatures, constant-time compare
//! - `kdf`      — the three KDF call-sites (root step, chain step, message keys)
//! - `x3dh`     — initial shared-secret agreement, both roles
//! - `store`    — long-term device material: identity, signed prekeys, prekey pool
//! - `skipped`  — skipped-message-key store trait + bounded in-memory impl
//! - `ratchet`  — Double Ratchet state and the DH ratchet turn
//! - `envelope` — AES-256-CBC + truncated-HMAC sealing of the key payload
//! - `session`  — the session state machine: bootstrap, encrypt_key, decrypt_key
//! - `payload`  — AES-128-GCM message body encryption (`<payload>` element)
//! - `serial`   — store/session persistence in the Protobuf subset
//! - `error`    — unified error type

pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod payload;
pub mod ratchet;
pub mod serial;
pub mod session;
pub mod skipped;
pub mod store;
pub mod x3dh;

pub use error::CryptoError;
pub use ratchet::MAX_SKIP;
pub use session::{Bundle, KeyMessage, Session, SessionPhase};
pub use skipped::{MemoryKeyStore, MessageKeyStore, SkippedKey};
pub use store::{Store, NUM_PREKEYS};
