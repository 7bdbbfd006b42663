//! Store and session persistence.
//!
//! The persistence format is the same Protobuf subset used on the wire.
//! Private keys and chain keys are raw 32-byte fields; public keys use the
//! 33-byte serialized form. The size functions are byte-exact so callers
//! can allocate a single buffer up front.
//!
//! Deserialization re-derives every stored key pair's public half and
//! rejects blobs where it does not match (vacant slots, marked by id 0 or
//! an uninitialized phase, are exempt).

use omemo_proto::codec::{self, Field, WIRE_LEN};
use omemo_proto::frame;

use crate::error::CryptoError;
use crate::keys::{Key, KeyPair, Signature};
use crate::ratchet::State;
use crate::session::{Session, SessionPhase};
use crate::skipped::{MemoryKeyStore, SkippedKey};
use crate::store::{PreKey, SignedPreKey, Store, NUM_PREKEYS};

/// tag + length byte + raw 32-byte key
const PRV_FIELD: usize = 2 + 32;
/// tag + length byte + serialized 33-byte key
const PUB_FIELD: usize = 2 + 33;
/// tag + length byte + 64-byte signature
const SIG_FIELD: usize = 2 + 64;

fn uint32_field_size(v: u32) -> usize {
    1 + codec::varint_size(v)
}

fn prekey_entry_size(id: u32) -> usize {
    uint32_field_size(id) + PRV_FIELD + PUB_FIELD
}

fn skipped_entry_size(nr: u32) -> usize {
    uint32_field_size(nr) + 2 * PRV_FIELD
}

// ── Store ────────────────────────────────────────────────────────────────────

pub fn serialized_store_size(store: &Store) -> usize {
    let prev_id = store.prev_spk.as_ref().map_or(0, |spk| spk.id);
    let mut sum = uint32_field_size(store.initialized as u32)
        + PRV_FIELD
        + PUB_FIELD
        + uint32_field_size(store.cur_spk.id)
        + PRV_FIELD
        + PUB_FIELD
        + SIG_FIELD
        + uint32_field_size(prev_id)
        + PRV_FIELD
        + PUB_FIELD
        + SIG_FIELD
        + uint32_field_size(store.pk_counter)
        + uint32_field_size(store.registration_id);
    for slot in &store.prekeys {
        let id = slot.as_ref().map_or(0, |pk| pk.id);
        // tag + single length byte (entries stay well under 128 bytes)
        sum += 2 + prekey_entry_size(id);
    }
    sum
}

pub fn serialize_store(store: &Store) -> Vec<u8> {
    let mut out = Vec::with_capacity(serialized_store_size(store));
    codec::put_uint32(&mut out, 1, store.initialized as u32);
    codec::put_bytes(&mut out, 2, store.identity.private());
    frame::put_key(&mut out, 3, &store.identity.public);

    codec::put_uint32(&mut out, 4, store.cur_spk.id);
    codec::put_bytes(&mut out, 5, store.cur_spk.kp.private());
    frame::put_key(&mut out, 6, &store.cur_spk.kp.public);
    codec::put_bytes(&mut out, 7, &store.cur_spk.sig);

    let vacant;
    let prev = match &store.prev_spk {
        Some(spk) => spk,
        None => {
            vacant = SignedPreKey { id: 0, kp: KeyPair::default(), sig: [0u8; 64] };
            &vacant
        }
    };
    codec::put_uint32(&mut out, 8, prev.id);
    codec::put_bytes(&mut out, 9, prev.kp.private());
    frame::put_key(&mut out, 10, &prev.kp.public);
    codec::put_bytes(&mut out, 11, &prev.sig);

    codec::put_uint32(&mut out, 12, store.pk_counter);

    for slot in &store.prekeys {
        let mut entry = Vec::with_capacity(prekey_entry_size(0) + 4);
        match slot {
            Some(pk) => {
                codec::put_uint32(&mut entry, 1, pk.id);
                codec::put_bytes(&mut entry, 2, pk.kp.private());
                frame::put_key(&mut entry, 3, &pk.kp.public);
            }
            None => {
                codec::put_uint32(&mut entry, 1, 0);
                codec::put_bytes(&mut entry, 2, &[0u8; 32]);
                frame::put_key(&mut entry, 3, &[0u8; 32]);
            }
        }
        codec::put_bytes(&mut out, 13, &entry);
    }

    codec::put_uint32(&mut out, 14, store.registration_id);
    debug_assert_eq!(out.len(), serialized_store_size(store));
    out
}

pub fn deserialize_store(bytes: &[u8]) -> Result<Store, CryptoError> {
    let mut fields = [Field::unused(); 15];
    fields[1] = Field::uint32();
    fields[2] = Field::bytes_pinned(32);
    fields[3] = Field::bytes_pinned(33);
    fields[4] = Field::uint32();
    fields[5] = Field::bytes_pinned(32);
    fields[6] = Field::bytes_pinned(33);
    fields[7] = Field::bytes_pinned(64);
    fields[8] = Field::uint32();
    fields[9] = Field::bytes_pinned(32);
    fields[10] = Field::bytes_pinned(33);
    fields[11] = Field::bytes_pinned(64);
    fields[12] = Field::uint32();
    fields[13] = Field::repeated_bytes();
    // field 14 (registration id) is optional: blobs written before it was
    // recorded fall back to the protocol placeholder.
    codec::parse_fields(bytes, &mut fields)?;

    let initialized = fields[1].value != 0;
    let identity = stored_keypair(&fields[2], &fields[3], initialized)?;
    let cur_spk = SignedPreKey {
        id: fields[4].value,
        kp: stored_keypair(&fields[5], &fields[6], initialized)?,
        sig: signature(&fields[7]),
    };
    let prev_spk = if fields[8].value == 0 {
        None
    } else {
        Some(SignedPreKey {
            id: fields[8].value,
            kp: stored_keypair(&fields[9], &fields[10], initialized)?,
            sig: signature(&fields[11]),
        })
    };

    let mut prekeys: [Option<PreKey>; NUM_PREKEYS] = std::array::from_fn(|_| None);
    let mut rest = bytes;
    for slot in prekeys.iter_mut() {
        let Some((entry, after)) = codec::next_repeated(rest, 13, WIRE_LEN)? else {
            break;
        };
        rest = after;
        let mut inner = [Field::unused(); 4];
        inner[1] = Field::uint32();
        inner[2] = Field::bytes_pinned(32);
        inner[3] = Field::bytes_pinned(33);
        codec::parse_fields(entry.data.expect("length-delimited entry"), &mut inner)?;
        if inner[1].value != 0 {
            *slot = Some(PreKey {
                id: inner[1].value,
                kp: stored_keypair(&inner[2], &inner[3], initialized)?,
            });
        }
    }

    let registration_id = if fields[14].value == 0 { 0xcc } else { fields[14].value };

    Ok(Store {
        initialized,
        identity,
        cur_spk,
        prev_spk,
        prekeys,
        pk_counter: fields[12].value,
        registration_id,
    })
}

// ── Session ──────────────────────────────────────────────────────────────────

/// Exact size of [`serialize_session`]'s output. Pass the co-located cache
/// when its skipped keys should be persisted with the session.
pub fn serialized_session_size(session: &Session, cache: Option<&MemoryKeyStore>) -> usize {
    let mut sum = 4 * PUB_FIELD
        + 4 * PRV_FIELD
        + uint32_field_size(session.state.ns)
        + uint32_field_size(session.state.nr)
        + uint32_field_size(session.state.pn)
        + uint32_field_size(session.used_pk_id)
        + uint32_field_size(session.used_spk_id)
        + uint32_field_size(session.phase.to_u32());
    if let Some(cache) = cache {
        for key in cache.entries() {
            sum += 2 + skipped_entry_size(key.nr);
        }
    }
    sum
}

pub fn serialize_session(session: &Session, cache: Option<&MemoryKeyStore>) -> Vec<u8> {
    let mut out = Vec::with_capacity(serialized_session_size(session, cache));
    frame::put_key(&mut out, 1, &session.remote_identity);
    codec::put_bytes(&mut out, 2, session.state.dhs.private());
    frame::put_key(&mut out, 3, &session.state.dhs.public);
    frame::put_key(&mut out, 4, &session.state.dhr);
    codec::put_bytes(&mut out, 5, &session.state.rk);
    codec::put_bytes(&mut out, 6, &session.state.cks);
    codec::put_bytes(&mut out, 7, &session.state.ckr);
    codec::put_uint32(&mut out, 8, session.state.ns);
    codec::put_uint32(&mut out, 9, session.state.nr);
    codec::put_uint32(&mut out, 10, session.state.pn);
    frame::put_key(&mut out, 11, &session.used_ek);
    codec::put_uint32(&mut out, 12, session.used_pk_id);
    codec::put_uint32(&mut out, 13, session.used_spk_id);
    codec::put_uint32(&mut out, 14, session.phase.to_u32());
    if let Some(cache) = cache {
        for key in cache.entries() {
            let mut entry = Vec::with_capacity(skipped_entry_size(key.nr));
            codec::put_uint32(&mut entry, 1, key.nr);
            codec::put_bytes(&mut entry, 2, &key.dh);
            codec::put_bytes(&mut entry, 3, &key.mk);
            codec::put_bytes(&mut out, 15, &entry);
        }
    }
    debug_assert_eq!(out.len(), serialized_session_size(session, cache));
    out
}

/// Rebuild a session. Skipped keys embedded in the blob are loaded into
/// `cache` up to its capacity.
pub fn deserialize_session(
    bytes: &[u8],
    mut cache: Option<&mut MemoryKeyStore>,
) -> Result<Session, CryptoError> {
    let mut fields = [Field::unused(); 16];
    fields[1] = Field::bytes_pinned(33);
    fields[2] = Field::bytes_pinned(32);
    fields[3] = Field::bytes_pinned(33);
    fields[4] = Field::bytes_pinned(33);
    fields[5] = Field::bytes_pinned(32);
    fields[6] = Field::bytes_pinned(32);
    fields[7] = Field::bytes_pinned(32);
    fields[8] = Field::uint32();
    fields[9] = Field::uint32();
    fields[10] = Field::uint32();
    fields[11] = Field::bytes_pinned(33);
    fields[12] = Field::uint32();
    fields[13] = Field::uint32();
    fields[14] = Field::uint32();
    fields[15] = Field::repeated_bytes();
    codec::parse_fields(bytes, &mut fields)?;

    let phase = SessionPhase::from_u32(fields[14].value)
        .ok_or(CryptoError::Corrupt("unknown session phase"))?;
    let dhs = stored_keypair(&fields[2], &fields[3], phase != SessionPhase::Uninit)?;
    let state = State {
        dhs,
        dhr: public_key(&fields[4]),
        rk: raw_key(&fields[5]),
        cks: raw_key(&fields[6]),
        ckr: raw_key(&fields[7]),
        ns: fields[8].value,
        nr: fields[9].value,
        pn: fields[10].value,
    };
    let session = Session {
        phase,
        remote_identity: public_key(&fields[1]),
        state,
        used_ek: public_key(&fields[11]),
        used_pk_id: fields[12].value,
        used_spk_id: fields[13].value,
    };

    if let Some(cache) = cache.as_deref_mut() {
        let mut rest = bytes;
        while cache.len() < cache.capacity() {
            let Some((entry, after)) = codec::next_repeated(rest, 15, WIRE_LEN)? else {
                break;
            };
            rest = after;
            let mut inner = [Field::unused(); 4];
            inner[1] = Field::uint32();
            inner[2] = Field::bytes_pinned(32);
            inner[3] = Field::bytes_pinned(32);
            codec::parse_fields(entry.data.expect("length-delimited entry"), &mut inner)?;
            cache.insert_raw(SkippedKey {
                nr: inner[1].value,
                dh: raw_key(&inner[2]),
                mk: raw_key(&inner[3]),
            });
        }
    }

    Ok(session)
}

// ── Field accessors ──────────────────────────────────────────────────────────

fn raw_key(field: &Field<'_>) -> Key {
    field.data.expect("pinned 32-byte field").try_into().expect("pinned length")
}

fn public_key(field: &Field<'_>) -> Key {
    let data = field.data.expect("pinned 33-byte field");
    data[1..].try_into().expect("pinned length")
}

fn signature(field: &Field<'_>) -> Signature {
    field.data.expect("pinned 64-byte field").try_into().expect("pinned length")
}

fn stored_keypair(
    prv: &Field<'_>,
    public: &Field<'_>,
    check: bool,
) -> Result<KeyPair, CryptoError> {
    let prv = raw_key(prv);
    let public = public_key(public);
    if check {
        KeyPair::from_stored(prv, public)
    } else {
        Ok(KeyPair::from_parts_unchecked(prv, public))
    }
}
