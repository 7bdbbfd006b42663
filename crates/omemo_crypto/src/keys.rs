//! X25519 key material and XEdDSA signatures.
//!
//! Every key in the protocol is a Curve25519 key; there is no separate
//! Ed25519 identity. Prekey signatures use the XEdDSA construction: the
//! clamped Montgomery private scalar doubles as the Ed25519 scalar, the
//! signer derives the Edwards public key on the fly and stores its sign bit
//! in the top bit of the last signature byte, and the verifier rebuilds the
//! Edwards key from the Montgomery public key via the birational map.
//!
//! Reference: <https://signal.org/docs/specifications/xeddsa/>

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::{clamp_integer, Scalar};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

pub type Key = [u8; KEY_LEN];
pub type Signature = [u8; SIGNATURE_LEN];

/// Domain separator for the signing nonce, per the XEdDSA spec's `hash1`.
const NONCE_PREFIX: [u8; 32] = [
    0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff,
];

/// X25519 key pair. The private half is stored clamped and is wiped on drop.
#[derive(Clone)]
pub struct KeyPair {
    prv: Key,
    pub public: Key,
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.prv.zeroize();
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        KeyPair { prv: [0u8; KEY_LEN], public: [0u8; KEY_LEN] }
    }
}

impl KeyPair {
    pub fn generate() -> Result<KeyPair, CryptoError> {
        let mut prv = [0u8; KEY_LEN];
        OsRng.try_fill_bytes(&mut prv).map_err(|_| CryptoError::Crypto)?;
        let prv = clamp_integer(prv);
        let public = x25519_dalek::x25519(prv, x25519_dalek::X25519_BASEPOINT_BYTES);
        Ok(KeyPair { prv, public })
    }

    /// Rebuild a pair from persisted parts. The public half must match the
    /// one derived from the private half.
    pub fn from_stored(prv: Key, public: Key) -> Result<KeyPair, CryptoError> {
        let derived = x25519_dalek::x25519(prv, x25519_dalek::X25519_BASEPOINT_BYTES);
        if derived != public {
            return Err(CryptoError::Corrupt("public key does not match private key"));
        }
        Ok(KeyPair { prv, public })
    }

    pub(crate) fn from_parts_unchecked(prv: Key, public: Key) -> KeyPair {
        KeyPair { prv, public }
    }

    pub(crate) fn private(&self) -> &Key {
        &self.prv
    }

    pub fn dh(&self, public: &Key) -> Key {
        dh(&self.prv, public)
    }
}

/// X25519 scalar multiplication.
pub fn dh(prv: &Key, public: &Key) -> Key {
    x25519_dalek::x25519(*prv, *public)
}

/// Constant-time equality for secret material.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Sign `msg` with a Montgomery private key.
pub fn sign(prv: &Key, msg: &[u8]) -> Result<Signature, CryptoError> {
    let mut z = [0u8; 64];
    OsRng.try_fill_bytes(&mut z).map_err(|_| CryptoError::Crypto)?;
    let sig = sign_with_nonce(prv, msg, &z);
    z.zeroize();
    Ok(sig)
}

/// The deterministic core of [`sign`], split out so known-answer vectors
/// can drive the 64 nonce bytes.
pub(crate) fn sign_with_nonce(prv: &Key, msg: &[u8], z: &[u8; 64]) -> Signature {
    let a = Scalar::from_bytes_mod_order(clamp_integer(*prv));
    let ed_public = EdwardsPoint::mul_base(&a).compress();
    let sign_bit = ed_public.as_bytes()[31] & 0x80;

    let mut h = Sha512::new();
    h.update(NONCE_PREFIX);
    h.update(prv);
    h.update(msg);
    h.update(z);
    let k = Scalar::from_hash(h);
    let big_r = EdwardsPoint::mul_base(&k).compress();

    let mut h = Sha512::new();
    h.update(big_r.as_bytes());
    h.update(ed_public.as_bytes());
    h.update(msg);
    let challenge = Scalar::from_hash(h);

    let s = challenge * a + k;

    let mut sig = [0u8; SIGNATURE_LEN];
    sig[..32].copy_from_slice(big_r.as_bytes());
    sig[32..].copy_from_slice(&s.to_bytes());
    sig[63] &= 0x7f;
    sig[63] |= sign_bit;
    sig
}

/// Verify an XEdDSA signature against a Montgomery public key.
pub fn verify(public: &Key, msg: &[u8], sig: &Signature) -> bool {
    let sign_bit = (sig[63] & 0x80) >> 7;
    let Some(a_point) = MontgomeryPoint(*public).to_edwards(sign_bit) else {
        return false;
    };
    let ed_public = a_point.compress();

    let mut s_bytes: [u8; 32] = sig[32..].try_into().expect("fixed split");
    s_bytes[31] &= 0x7f;
    let Some(s) = Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) else {
        return false;
    };

    let mut h = Sha512::new();
    h.update(&sig[..32]);
    h.update(ed_public.as_bytes());
    h.update(msg);
    let challenge = Scalar::from_hash(h);

    let r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&-challenge, &a_point, &s);
    bool::from(r_check.compress().as_bytes().ct_eq(&sig[..32]))
}
