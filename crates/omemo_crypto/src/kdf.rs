//! The three KDF call-sites of the protocol.
//!
//! Nothing else in the engine derives key material; every chain advance and
//! message-key schedule goes through one of these functions.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::keys::Key;

const ROOT_INFO: &[u8] = b"WhisperRatchet";
const MESSAGE_INFO: &[u8] = b"WhisperMessageKeys";

type HmacSha256 = Hmac<Sha256>;

/// KDF_RK: mix a fresh DH output into the root key. `rk` is replaced in
/// place; the new chain key is returned.
pub fn rk_step(rk: &mut Key, dh_output: &Key) -> Result<Key, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(rk.as_ref()), dh_output);
    let mut okm = [0u8; 64];
    hk.expand(ROOT_INFO, &mut okm).map_err(|_| CryptoError::Crypto)?;
    rk.copy_from_slice(&okm[..32]);
    let mut ck = [0u8; 32];
    ck.copy_from_slice(&okm[32..]);
    okm.zeroize();
    Ok(ck)
}

/// KDF_CK: advance a chain key. Returns `(next_chain_key, message_key)`.
pub fn chain_step(ck: &Key) -> Result<(Key, Key), CryptoError> {
    let mk = hmac_label(ck, 0x01)?;
    let next = hmac_label(ck, 0x02)?;
    Ok((next, mk))
}

fn hmac_label(key: &Key, label: u8) -> Result<Key, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::Crypto)?;
    mac.update(&[label]);
    Ok(mac.finalize().into_bytes().into())
}

/// Per-message key schedule: CBC cipher key, MAC key and IV.
#[derive(ZeroizeOnDrop)]
pub struct MessageKeys {
    pub cipher: Key,
    pub mac: Key,
    pub iv: [u8; 16],
}

pub fn derive_message_keys(mk: &Key) -> Result<MessageKeys, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(&[0u8; 32]), mk);
    let mut okm = [0u8; 80];
    hk.expand(MESSAGE_INFO, &mut okm).map_err(|_| CryptoError::Crypto)?;
    let mut keys = MessageKeys { cipher: [0u8; 32], mac: [0u8; 32], iv: [0u8; 16] };
    keys.cipher.copy_from_slice(&okm[..32]);
    keys.mac.copy_from_slice(&okm[32..64]);
    keys.iv.copy_from_slice(&okm[64..]);
    okm.zeroize();
    Ok(keys)
}
