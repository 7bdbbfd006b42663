//! X3DH initial key agreement.
//!
//! Reference: <https://signal.org/docs/specifications/x3dh/>
//!
//! OMEMO mandates a one-time prekey in every bundle, so the fourth DH is
//! always present. The key material is prefixed with 32 bytes of 0xFF as
//! the domain separator before the final HKDF.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::{dh, Key};

const INFO: &[u8] = b"WhisperText";

/// Which half of the handshake is being computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Derive the shared session secret.
///
/// `ik`, `sk` and `ek` are our private keys: for the initiator, `sk` and
/// `ek` are both the ephemeral base key; for the responder, `sk` is the
/// signed prekey and `ek` the consumed one-time prekey. `peer_ik`,
/// `peer_sk` and `peer_ok` are the remote public keys: for the responder,
/// `peer_sk` and `peer_ok` are both the initiator's base key.
pub fn shared_secret(
    role: Role,
    ik: &Key,
    sk: &Key,
    ek: &Key,
    peer_ik: &Key,
    peer_sk: &Key,
    peer_ok: &Key,
) -> Result<Key, CryptoError> {
    let mut material = [0u8; 160];
    material[..32].fill(0xff);
    // The first two DH slots swap identity and signed-prekey roles between
    // the two sides so both arrive at the same bytes.
    let (first, second) = match role {
        Role::Initiator => (dh(ik, peer_sk), dh(sk, peer_ik)),
        Role::Responder => (dh(sk, peer_ik), dh(ik, peer_sk)),
    };
    material[32..64].copy_from_slice(&first);
    material[64..96].copy_from_slice(&second);
    material[96..128].copy_from_slice(&dh(sk, peer_sk));
    material[128..160].copy_from_slice(&dh(ek, peer_ok));

    let hk = Hkdf::<Sha256>::new(Some(&[0u8; 32]), &material);
    let mut secret = [0u8; 32];
    hk.expand(INFO, &mut secret).map_err(|_| CryptoError::Crypto)?;
    material.zeroize();
    Ok(secret)
}
