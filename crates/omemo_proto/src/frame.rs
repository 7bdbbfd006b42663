//! WhisperMessage / PreKeyWhisperMessage framing.
//!
//! Both frames open with the version byte `0x33` (protocol version 3 in
//! each nibble) followed by the Protobuf subset fields. A WhisperMessage is
//! trailed by an 8-byte truncated HMAC that is not part of the Protobuf
//! encoding. A PreKeyWhisperMessage wraps a complete WhisperMessage in its
//! field 4.

use crate::codec::{self, Field, WIRE_LEN};
use crate::error::ProtoError;

/// `(3 << 4) | 3` — the frame version byte for OMEMO's protocol version 3.
pub const VERSION: u8 = 0x33;

/// Wire type byte prefixed to every public key.
pub const KEY_TYPE: u8 = 0x05;

pub const KEY_LEN: usize = 32;
pub const SERIALIZED_KEY_LEN: usize = 33;
pub const MAC_LEN: usize = 8;

/// The sealed key payload is always padded to three AES blocks.
pub const PADDED_PAYLOAD_LEN: usize = 48;

/// WhisperMessage header: version byte, serialized ratchet key, two varint
/// counters and the ciphertext tag + length byte.
pub const HEADER_MAX: usize = 1 + (2 + SERIALIZED_KEY_LEN) + 2 * 6 + 2;

/// Complete WhisperMessage including the trailing MAC.
pub const WHISPER_MAX: usize = HEADER_MAX + PADDED_PAYLOAD_LEN + MAC_LEN;

/// PreKeyWhisperMessage header without the wrapped message: version byte,
/// registration id (tag + up to two varint bytes), two prekey ids, two
/// serialized keys and the inner-message tag + length byte.
pub const PREKEY_HEADER_MAX: usize = 1 + 3 + 2 * 6 + 2 * (2 + SERIALIZED_KEY_LEN) + 2;

/// Upper bound for any key message produced by a session.
pub const KEY_MESSAGE_MAX: usize = PREKEY_HEADER_MAX + WHISPER_MAX;

/// `0x05 ‖ pub` — the only public key encoding that ever leaves this crate.
pub fn serialize_key(pub_key: &[u8; KEY_LEN]) -> [u8; SERIALIZED_KEY_LEN] {
    let mut out = [0u8; SERIALIZED_KEY_LEN];
    out[0] = KEY_TYPE;
    out[1..].copy_from_slice(pub_key);
    out
}

/// Strict inverse of [`serialize_key`] for caller-supplied bundle keys.
pub fn key_from_serialized(bytes: &[u8]) -> Result<[u8; KEY_LEN], ProtoError> {
    if bytes.len() != SERIALIZED_KEY_LEN {
        return Err(ProtoError::TooShort);
    }
    if bytes[0] != KEY_TYPE {
        return Err(ProtoError::BadVersion(bytes[0]));
    }
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&bytes[1..]);
    Ok(out)
}

fn key_from_field(data: &[u8]) -> [u8; KEY_LEN] {
    // Length is pinned to 33 by the descriptor; the type byte is skipped.
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&data[1..]);
    out
}

pub fn put_key(out: &mut Vec<u8>, id: u32, pub_key: &[u8; KEY_LEN]) {
    codec::put_tag(out, id, WIRE_LEN);
    codec::put_varint(out, SERIALIZED_KEY_LEN as u32);
    out.extend_from_slice(&serialize_key(pub_key));
}

/// Parsed WhisperMessage.
#[derive(Debug)]
pub struct WhisperFrame<'a> {
    /// Sender's current ratchet public key (field 1, type byte stripped).
    pub dh: [u8; KEY_LEN],
    /// Message number in the sender's current chain (field 2).
    pub n: u32,
    /// Length of the sender's previous chain (field 3).
    pub pn: u32,
    /// Sealed key payload (field 4), 32..=48 bytes on the wire.
    pub ciphertext: &'a [u8],
    /// Truncated HMAC trailing the Protobuf bytes.
    pub mac: [u8; MAC_LEN],
    /// Everything the MAC covers: the full frame minus the MAC itself.
    pub body: &'a [u8],
}

/// Format the WhisperMessage header. The 48-byte ciphertext and the MAC are
/// appended by the caller right after this.
pub fn put_whisper_header(out: &mut Vec<u8>, n: u32, pn: u32, dh_pub: &[u8; KEY_LEN]) {
    out.push(VERSION);
    put_key(out, 1, dh_pub);
    codec::put_uint32(out, 2, n);
    codec::put_uint32(out, 3, pn);
    codec::put_tag(out, 4, WIRE_LEN);
    codec::put_varint(out, PADDED_PAYLOAD_LEN as u32);
}

pub fn parse_whisper(msg: &[u8]) -> Result<WhisperFrame<'_>, ProtoError> {
    if msg.len() < 1 + MAC_LEN {
        return Err(ProtoError::TooShort);
    }
    if msg[0] != VERSION {
        return Err(ProtoError::BadVersion(msg[0]));
    }
    let body = &msg[..msg.len() - MAC_LEN];
    let mut fields = [Field::unused(); 5];
    fields[1] = Field::bytes_pinned(SERIALIZED_KEY_LEN as u32);
    fields[2] = Field::uint32();
    fields[3] = Field::uint32();
    fields[4] = Field::bytes();
    codec::parse_fields(&body[1..], &mut fields)?;

    let ct_len = fields[4].value;
    if !(32..=PADDED_PAYLOAD_LEN as u32).contains(&ct_len) {
        return Err(ProtoError::CiphertextLen(ct_len));
    }

    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&msg[msg.len() - MAC_LEN..]);
    Ok(WhisperFrame {
        dh: key_from_field(fields[1].data.expect("pinned len field")),
        n: fields[2].value,
        pn: fields[3].value,
        ciphertext: fields[4].data.expect("required field"),
        mac,
        body,
    })
}

/// Parsed PreKeyWhisperMessage.
#[derive(Debug)]
pub struct PreKeyFrame<'a> {
    pub registration_id: u32,
    pub prekey_id: u32,
    pub signed_prekey_id: u32,
    /// Initiator's ephemeral base key (field 2).
    pub base_key: [u8; KEY_LEN],
    /// Initiator's identity key (field 3).
    pub identity_key: [u8; KEY_LEN],
    /// The wrapped WhisperMessage (field 4).
    pub message: &'a [u8],
}

/// Format the PreKeyWhisperMessage header; the wrapped WhisperMessage of
/// `inner_len` bytes is appended by the caller.
pub fn put_prekey_header(
    out: &mut Vec<u8>,
    registration_id: u32,
    prekey_id: u32,
    signed_prekey_id: u32,
    identity_key: &[u8; KEY_LEN],
    base_key: &[u8; KEY_LEN],
    inner_len: usize,
) {
    debug_assert!(inner_len <= WHISPER_MAX);
    out.push(VERSION);
    codec::put_uint32(out, 5, registration_id);
    codec::put_uint32(out, 1, prekey_id);
    codec::put_uint32(out, 6, signed_prekey_id);
    put_key(out, 3, identity_key);
    put_key(out, 2, base_key);
    codec::put_tag(out, 4, WIRE_LEN);
    codec::put_varint(out, inner_len as u32);
}

pub fn parse_prekey(msg: &[u8]) -> Result<PreKeyFrame<'_>, ProtoError> {
    if msg.is_empty() {
        return Err(ProtoError::TooShort);
    }
    if msg[0] != VERSION {
        return Err(ProtoError::BadVersion(msg[0]));
    }
    let mut fields = [Field::unused(); 7];
    fields[5] = Field::uint32();
    fields[1] = Field::uint32();
    fields[6] = Field::uint32();
    fields[2] = Field::bytes_pinned(SERIALIZED_KEY_LEN as u32);
    fields[3] = Field::bytes_pinned(SERIALIZED_KEY_LEN as u32);
    fields[4] = Field::bytes();
    codec::parse_fields(&msg[1..], &mut fields)?;

    Ok(PreKeyFrame {
        registration_id: fields[5].value,
        prekey_id: fields[1].value,
        signed_prekey_id: fields[6].value,
        base_key: key_from_field(fields[2].data.expect("pinned len field")),
        identity_key: key_from_field(fields[3].data.expect("pinned len field")),
        message: fields[4].data.expect("required field"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_key_roundtrip() {
        let pub_key = [0xab; KEY_LEN];
        let ser = serialize_key(&pub_key);
        assert_eq!(ser[0], KEY_TYPE);
        assert_eq!(key_from_serialized(&ser).unwrap(), pub_key);
        assert!(key_from_serialized(&ser[1..]).is_err());

        let mut wrong_type = ser;
        wrong_type[0] = 0x04;
        assert!(key_from_serialized(&wrong_type).is_err());
    }

    #[test]
    fn whisper_header_hits_max_size() {
        let mut out = Vec::new();
        put_whisper_header(&mut out, u32::MAX, u32::MAX, &[0u8; KEY_LEN]);
        assert_eq!(out.len(), HEADER_MAX);
    }

    #[test]
    fn prekey_header_hits_max_size() {
        let mut out = Vec::new();
        put_prekey_header(
            &mut out,
            16380,
            u32::MAX,
            u32::MAX,
            &[0u8; KEY_LEN],
            &[0u8; KEY_LEN],
            WHISPER_MAX,
        );
        assert_eq!(out.len(), PREKEY_HEADER_MAX);
    }

    #[test]
    fn whisper_roundtrip() {
        let dh = [0x42; KEY_LEN];
        let mut out = Vec::new();
        put_whisper_header(&mut out, 7, 3, &dh);
        out.extend_from_slice(&[0xcd; PADDED_PAYLOAD_LEN]);
        out.extend_from_slice(&[0x99; MAC_LEN]);

        let frame = parse_whisper(&out).unwrap();
        assert_eq!(frame.dh, dh);
        assert_eq!(frame.n, 7);
        assert_eq!(frame.pn, 3);
        assert_eq!(frame.ciphertext, &[0xcd; PADDED_PAYLOAD_LEN][..]);
        assert_eq!(frame.mac, [0x99; MAC_LEN]);
        assert_eq!(frame.body, &out[..out.len() - MAC_LEN]);
    }

    #[test]
    fn whisper_rejects_bad_version_and_short_input() {
        assert!(matches!(parse_whisper(&[VERSION; 5]), Err(ProtoError::TooShort)));

        let mut msg = vec![0x34u8];
        msg.extend_from_slice(&[0u8; 60]);
        assert!(matches!(parse_whisper(&msg), Err(ProtoError::BadVersion(0x34))));
    }

    #[test]
    fn prekey_roundtrip() {
        let ik = [0x11; KEY_LEN];
        let ek = [0x22; KEY_LEN];
        let inner = vec![0xeeu8; 60];
        let mut out = Vec::new();
        put_prekey_header(&mut out, 0xcc, 42, 1, &ik, &ek, inner.len());
        out.extend_from_slice(&inner);

        let frame = parse_prekey(&out).unwrap();
        assert_eq!(frame.registration_id, 0xcc);
        assert_eq!(frame.prekey_id, 42);
        assert_eq!(frame.signed_prekey_id, 1);
        assert_eq!(frame.identity_key, ik);
        assert_eq!(frame.base_key, ek);
        assert_eq!(frame.message, &inner[..]);
    }

    #[test]
    fn prekey_parses_reference_capture() {
        // PreKeyWhisperMessage captured from the reference implementation's
        // interop tests.
        let msg = hex::decode(
            "08041221054fb4dacf2d54cea8bd3be51dc90e1f5af444886facaf84b83d0f3031eff9617\
             91a210516260835a3c627dbbc17e3a0c32d6fbee27bed265977ae3eff1cc56f31deea2122\
             62330a21054751b36ba17d6a3a158c87660063c1cdede4a99be91e301066b3d9adb82e9f0\
             8100418002230060bd96226d3b5ef5bc642316e41e3a7f16ecfcc2f718d66655ab84e08fb\
             a1818e238e2917e025c997329395f885e98bfe98138e7f64edf528adc2debf0430cd8baf9\
             c05",
        )
        .unwrap();
        // The capture is the Protobuf body only (no version byte).
        let mut fields = [Field::unused(); 7];
        fields[5] = Field::uint32();
        fields[1] = Field::uint32();
        fields[6] = Field::uint32();
        fields[2] = Field::bytes_pinned(SERIALIZED_KEY_LEN as u32);
        fields[3] = Field::bytes_pinned(SERIALIZED_KEY_LEN as u32);
        fields[4] = Field::bytes();
        crate::codec::parse_fields(&msg, &mut fields).unwrap();
        assert_eq!(fields[1].value, 4);
        assert_eq!(fields[2].value, SERIALIZED_KEY_LEN as u32);
        let inner = fields[4].data.unwrap();
        assert_eq!(inner[0], VERSION);
        let whisper = parse_whisper(inner).unwrap();
        assert_eq!(whisper.n, 4);
        assert_eq!(whisper.pn, 0);
        assert_eq!(whisper.ciphertext.len(), PADDED_PAYLOAD_LEN);
    }
}
