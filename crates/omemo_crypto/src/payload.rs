//! Message body encryption for the `<payload>` element.
//!
//! Each message is encrypted once under a fresh 16-byte AES-128-GCM key
//! with a 12-byte IV and empty AAD. The 32-byte concatenation
//! `key ‖ tag` is what the session envelope seals per recipient.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;

pub const KEY_PAYLOAD_LEN: usize = 32;
pub const IV_LEN: usize = 12;

/// Encrypt a message body. Returns the ciphertext (same length as the
/// plaintext), the 32-byte key payload to fan out to each recipient, and
/// the IV for the `<iv>` element.
pub fn encrypt_message(
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; KEY_PAYLOAD_LEN], [u8; IV_LEN]), CryptoError> {
    let mut key_payload = [0u8; KEY_PAYLOAD_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.try_fill_bytes(&mut key_payload[..16]).map_err(|_| CryptoError::Crypto)?;
    OsRng.try_fill_bytes(&mut iv).map_err(|_| CryptoError::Crypto)?;

    let cipher = Aes128Gcm::new_from_slice(&key_payload[..16]).map_err(|_| CryptoError::Crypto)?;
    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buf)
        .map_err(|_| CryptoError::Crypto)?;
    key_payload[16..].copy_from_slice(&tag);
    Ok((buf, key_payload, iv))
}

/// Decrypt a message body with a key payload recovered from a key
/// envelope. Payloads longer than 32 bytes are tolerated (some clients pad
/// them) but only the standard 16-byte tag is authenticated.
pub fn decrypt_message(
    key_payload: &[u8],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if key_payload.len() < KEY_PAYLOAD_LEN {
        return Err(CryptoError::Param("key payload shorter than 32 bytes"));
    }
    let cipher = Aes128Gcm::new_from_slice(&key_payload[..16]).map_err(|_| CryptoError::Crypto)?;
    let mut buf = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            b"",
            &mut buf,
            Tag::from_slice(&key_payload[16..32]),
        )
        .map_err(|_| CryptoError::Crypto)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let (ciphertext, key, iv) = encrypt_message(b"Hello there!").unwrap();
        assert_eq!(ciphertext.len(), 12);
        let plaintext = decrypt_message(&key, &iv, &ciphertext).unwrap();
        assert_eq!(plaintext, b"Hello there!");
    }

    #[test]
    fn empty_message() {
        let (ciphertext, key, iv) = encrypt_message(b"").unwrap();
        assert!(ciphertext.is_empty());
        assert_eq!(decrypt_message(&key, &iv, &ciphertext).unwrap(), b"");
    }

    #[test]
    fn rejects_tampered_tag_and_ciphertext() {
        let (mut ciphertext, mut key, iv) = encrypt_message(b"attack at dawn").unwrap();

        let mut bad_key = key;
        bad_key[20] ^= 0x01; // inside the tag half
        assert_eq!(
            decrypt_message(&bad_key, &iv, &ciphertext).unwrap_err(),
            CryptoError::Crypto
        );

        ciphertext[3] ^= 0x01;
        assert_eq!(
            decrypt_message(&key, &iv, &ciphertext).unwrap_err(),
            CryptoError::Crypto
        );
        ciphertext[3] ^= 0x01;

        key[2] ^= 0x01; // inside the key half
        assert_eq!(
            decrypt_message(&key, &iv, &ciphertext).unwrap_err(),
            CryptoError::Crypto
        );
    }

    #[test]
    fn oversized_key_payload_is_tolerated() {
        let (ciphertext, key, iv) = encrypt_message(b"padded clients").unwrap();
        let mut long_key = key.to_vec();
        long_key.extend_from_slice(&[0u8; 4]);
        assert_eq!(
            decrypt_message(&long_key, &iv, &ciphertext).unwrap(),
            b"padded clients"
        );

        assert!(decrypt_message(&key[..31], &iv, &ciphertext).is_err());
    }
}
