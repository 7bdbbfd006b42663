//! Sealing of the 32-byte key payload.
//!
//! AES-256-CBC over exactly three blocks (the payload plus one constant
//! `0x10` pad block), authenticated by the first 8 bytes of an
//! HMAC-SHA-256 over the identity-bound associated data and the message
//! bytes. The pad never varies, so its check on decrypt doubles as a
//! plaintext integrity check and must run in constant time.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use omemo_proto::frame::{self, MAC_LEN, PADDED_PAYLOAD_LEN};

use crate::error::CryptoError;
use crate::kdf::MessageKeys;
use crate::keys::Key;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const PAYLOAD_LEN: usize = 32;
pub const AD_LEN: usize = 66;

/// `Encode(IK_sender) ‖ Encode(IK_receiver)`. The sender passes its own
/// identity first and the receiver passes the sender's first, so both ends
/// MAC the same 66 bytes.
pub fn associated_data(sender_ik: &Key, receiver_ik: &Key) -> [u8; AD_LEN] {
    let mut ad = [0u8; AD_LEN];
    ad[..33].copy_from_slice(&frame::serialize_key(sender_ik));
    ad[33..].copy_from_slice(&frame::serialize_key(receiver_ik));
    ad
}

/// First 8 bytes of `HMAC(mac_key, ad ‖ body)`.
pub fn message_mac(
    mac_key: &Key,
    ad: &[u8; AD_LEN],
    body: &[u8],
) -> Result<[u8; MAC_LEN], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(mac_key).map_err(|_| CryptoError::Crypto)?;
    mac.update(ad);
    mac.update(body);
    let full = mac.finalize().into_bytes();
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&full[..MAC_LEN]);
    Ok(out)
}

/// CBC-encrypt `payload ‖ 0x10×16`.
pub fn seal(
    keys: &MessageKeys,
    payload: &[u8; PAYLOAD_LEN],
) -> Result<[u8; PADDED_PAYLOAD_LEN], CryptoError> {
    let mut buf = [0u8; PADDED_PAYLOAD_LEN];
    buf[..PAYLOAD_LEN].copy_from_slice(payload);
    buf[PAYLOAD_LEN..].fill(0x10);
    Aes256CbcEnc::new((&keys.cipher).into(), (&keys.iv).into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, PADDED_PAYLOAD_LEN)
        .map_err(|_| CryptoError::Crypto)?;
    Ok(buf)
}

/// CBC-decrypt and verify the fixed pad block.
pub fn open(keys: &MessageKeys, ciphertext: &[u8]) -> Result<[u8; PAYLOAD_LEN], CryptoError> {
    if ciphertext.len() != PADDED_PAYLOAD_LEN {
        return Err(CryptoError::Corrupt("sealed payload must be 48 bytes"));
    }
    let mut buf = [0u8; PADDED_PAYLOAD_LEN];
    buf.copy_from_slice(ciphertext);
    Aes256CbcDec::new((&keys.cipher).into(), (&keys.iv).into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::Crypto)?;

    let pad_ok = bool::from(buf[PAYLOAD_LEN..].ct_eq(&[0x10u8; 16]));
    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&buf[..PAYLOAD_LEN]);
    buf.zeroize();
    if !pad_ok {
        payload.zeroize();
        return Err(CryptoError::Corrupt("bad payload padding"));
    }
    Ok(payload)
}
