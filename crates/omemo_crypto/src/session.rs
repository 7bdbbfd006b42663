//! OMEMO sessions: X3DH bootstrap plus the Double Ratchet driving the
//! per-recipient key envelope.
//!
//! A session encrypts and decrypts 32-byte key payloads (the AES key ‖ GCM
//! tag pair produced by `payload::encrypt_message`), not message bodies.
//! While a session is `Initiating`, every outgoing message carries the
//! PreKeyWhisperMessage header so the responder can bootstrap no matter
//! which copy arrives first; the first successful inbound decrypt flips the
//! session to `Ready`.
//!
//! All mutations run on a working copy of the session that is committed
//! only after MAC verification and padding checks succeed. A failed call
//! leaves both the session and the caller's skipped-key store untouched.

use tracing::debug;

use omemo_proto::frame::{self, WhisperFrame, KEY_MESSAGE_MAX, PADDED_PAYLOAD_LEN};

use crate::envelope;
use crate::error::CryptoError;
use crate::kdf;
use crate::keys::{self, Key, KeyPair, Signature};
use crate::ratchet::{State, MAX_SKIP};
use crate::skipped::{MessageKeyStore, SkippedKey};
use crate::store::Store;
use crate::x3dh::{self, Role};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninit,
    /// We initiated and have not yet decrypted a reply.
    Initiating,
    Ready,
}

impl SessionPhase {
    pub(crate) fn to_u32(self) -> u32 {
        match self {
            SessionPhase::Uninit => 0,
            SessionPhase::Initiating => 1,
            SessionPhase::Ready => 2,
        }
    }

    pub(crate) fn from_u32(v: u32) -> Option<SessionPhase> {
        match v {
            0 => Some(SessionPhase::Uninit),
            1 => Some(SessionPhase::Initiating),
            2 => Some(SessionPhase::Ready),
            _ => None,
        }
    }
}

/// A peer device's published bundle.
pub struct Bundle {
    /// XEdDSA signature over the serialized signed prekey.
    pub spk_sig: Signature,
    pub spk: Key,
    pub ik: Key,
    /// The one-time prekey picked from the bundle.
    pub pk: Key,
    pub spk_id: u32,
    pub pk_id: u32,
}

/// Wire bytes for one `<key>` element.
#[derive(Debug)]
pub struct KeyMessage {
    pub bytes: Vec<u8>,
    pub is_prekey: bool,
}

#[derive(Clone, Default)]
pub struct Session {
    pub(crate) phase: SessionPhase,
    pub(crate) remote_identity: Key,
    pub state: State,
    /// Ephemeral base key sent in our PreKey headers while `Initiating`;
    /// on the responder side, the prekey id consumed by the first inbound
    /// message is recorded in `used_pk_id` so the caller can delete it.
    pub(crate) used_ek: Key,
    pub(crate) used_pk_id: u32,
    pub(crate) used_spk_id: u32,
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::Uninit
    }
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn remote_identity(&self) -> &Key {
        &self.remote_identity
    }

    /// Prekey id consumed by this session (responder) or named in our
    /// PreKey headers (initiator). 0 when no prekey was involved yet.
    pub fn used_prekey_id(&self) -> u32 {
        self.used_pk_id
    }

    /// Start a session as the initiator from a fetched bundle.
    pub fn initiate_from_bundle(&mut self, store: &Store, bundle: &Bundle) -> Result<(), CryptoError> {
        if !store.is_initialized() {
            return Err(CryptoError::State);
        }
        let serialized_spk = frame::serialize_key(&bundle.spk);
        if !keys::verify(&bundle.ik, &serialized_spk, &bundle.spk_sig) {
            return Err(CryptoError::Signature);
        }

        let eph = KeyPair::generate()?;
        let sk = x3dh::shared_secret(
            Role::Initiator,
            store.identity.private(),
            eph.private(),
            eph.private(),
            &bundle.ik,
            &bundle.spk,
            &bundle.pk,
        )?;

        self.remote_identity = bundle.ik;
        self.used_ek = eph.public;
        self.used_pk_id = bundle.pk_id;
        self.used_spk_id = bundle.spk_id;
        self.state = State::init_alice(&sk, &bundle.spk, eph)?;
        self.phase = SessionPhase::Initiating;
        debug!(spk_id = bundle.spk_id, pk_id = bundle.pk_id, "session initiated from bundle");
        Ok(())
    }

    /// Seal a 32-byte key payload for the peer.
    pub fn encrypt_key(&mut self, store: &Store, payload: &[u8; envelope::PAYLOAD_LEN]) -> Result<KeyMessage, CryptoError> {
        if !store.is_initialized() {
            return Err(CryptoError::State);
        }
        if !matches!(self.phase, SessionPhase::Initiating | SessionPhase::Ready) {
            return Err(CryptoError::State);
        }

        let (next_cks, mk) = kdf::chain_step(&self.state.cks)?;
        let message_keys = kdf::derive_message_keys(&mk)?;

        let mut body = Vec::with_capacity(KEY_MESSAGE_MAX);
        frame::put_whisper_header(&mut body, self.state.ns, self.state.pn, &self.state.dhs.public);
        body.extend_from_slice(&envelope::seal(&message_keys, payload)?);
        let ad = envelope::associated_data(&store.identity.public, &self.remote_identity);
        let mac = envelope::message_mac(&message_keys.mac, &ad, &body)?;
        body.extend_from_slice(&mac);

        self.state.cks = next_cks;
        self.state.ns = self.state.ns.wrapping_add(1);

        if self.phase == SessionPhase::Initiating {
            let mut bytes = Vec::with_capacity(KEY_MESSAGE_MAX);
            frame::put_prekey_header(
                &mut bytes,
                store.registration_id(),
                self.used_pk_id,
                self.used_spk_id,
                &store.identity.public,
                &self.used_ek,
                body.len(),
            );
            bytes.extend_from_slice(&body);
            Ok(KeyMessage { bytes, is_prekey: true })
        } else {
            Ok(KeyMessage { bytes: body, is_prekey: false })
        }
    }

    /// Open a key envelope, advancing the ratchet as needed.
    ///
    /// `is_prekey` reflects the `prekey` attribute of the `<key>` element.
    /// Skipped message keys flow through `cache`; gaps larger than
    /// [`MAX_SKIP`] are rejected before anything is stored.
    pub fn decrypt_key(
        &mut self,
        store: &Store,
        cache: &mut dyn MessageKeyStore,
        is_prekey: bool,
        msg: &[u8],
    ) -> Result<[u8; envelope::PAYLOAD_LEN], CryptoError> {
        if !store.is_initialized() {
            return Err(CryptoError::State);
        }
        if msg.is_empty() {
            return Err(CryptoError::Param("empty message"));
        }

        let mut work = self.clone();

        let inner: &[u8] = if is_prekey {
            let pre = frame::parse_prekey(msg)?;
            // nr is still 0 only before the very first decrypt; later
            // copies of the PreKey header are skipped, the wrapped message
            // is processed as usual.
            if work.state.nr == 0 {
                let pk = store
                    .find_prekey(pre.prekey_id)
                    .ok_or(CryptoError::Corrupt("unknown prekey id"))?;
                let spk = store
                    .find_signed_prekey(pre.signed_prekey_id)
                    .ok_or(CryptoError::Corrupt("unknown signed prekey id"))?;
                let sk = x3dh::shared_secret(
                    Role::Responder,
                    store.identity.private(),
                    spk.kp.private(),
                    pk.kp.private(),
                    &pre.identity_key,
                    &pre.base_key,
                    &pre.base_key,
                )?;
                work.remote_identity = pre.identity_key;
                work.state = State::init_bob(&sk, spk.kp.clone());
                work.used_pk_id = pre.prekey_id;
                work.used_spk_id = pre.signed_prekey_id;
                debug!(prekey_id = pre.prekey_id, "responder session established");
            }
            pre.message
        } else {
            if self.phase == SessionPhase::Uninit {
                return Err(CryptoError::State);
            }
            msg
        };

        let whisper = frame::parse_whisper(inner)?;

        // Fast path: the key was skipped earlier and parked in the cache.
        if let Some(mk) = cache.load(&whisper.dh, whisper.n)? {
            return match work.open_payload(store, &mk, &whisper) {
                Ok(payload) => {
                    work.phase = SessionPhase::Ready;
                    *self = work;
                    Ok(payload)
                }
                Err(err) => {
                    // Re-park the consumed key so the failed call leaves
                    // the cache as it found it.
                    let restore = SkippedKey { nr: whisper.n, dh: whisper.dh, mk };
                    let _ = cache.store(&restore, 1);
                    Err(err)
                }
            };
        }

        let should_step = work.state.dhr != whisper.dh;
        if !should_step && whisper.n < work.state.nr {
            return Err(CryptoError::KeyGone);
        }

        let skip_count = if should_step {
            u64::from(whisper.pn.saturating_sub(work.state.nr)) + u64::from(whisper.n)
        } else {
            u64::from(whisper.n.saturating_sub(work.state.nr))
        };
        if skip_count > u64::from(MAX_SKIP) {
            return Err(CryptoError::MaxSkip(skip_count));
        }

        let mut staged: Vec<SkippedKey> = Vec::new();
        if should_step {
            work.skip_chain(whisper.pn, &mut staged)?;
            work.state.dh_ratchet(&whisper.dh)?;
        }
        work.skip_chain(whisper.n, &mut staged)?;

        let (next_ckr, mk) = kdf::chain_step(&work.state.ckr)?;
        work.state.ckr = next_ckr;
        work.state.nr = whisper.n.wrapping_add(1);

        let payload = work.open_payload(store, &mk, &whisper)?;

        // Only a fully verified message may grow the caller's cache; if
        // the store rejects part of the batch, take the inserted keys back
        // out and fail the whole call.
        let total = staged.len() as u64;
        for (i, key) in staged.iter().enumerate() {
            if let Err(err) = cache.store(key, total) {
                for stored in &staged[..i] {
                    let _ = cache.load(&stored.dh, stored.nr);
                }
                return Err(err);
            }
        }

        work.phase = SessionPhase::Ready;
        *self = work;
        Ok(payload)
    }

    /// Derive message keys from `mk`, check the MAC and open the payload.
    /// Read-only: commits nothing.
    fn open_payload(
        &self,
        store: &Store,
        mk: &Key,
        whisper: &WhisperFrame<'_>,
    ) -> Result<[u8; envelope::PAYLOAD_LEN], CryptoError> {
        if whisper.ciphertext.len() != PADDED_PAYLOAD_LEN {
            return Err(CryptoError::Corrupt("short sealed payload"));
        }
        let message_keys = kdf::derive_message_keys(mk)?;
        let ad = envelope::associated_data(&self.remote_identity, &store.identity.public);
        let mac = envelope::message_mac(&message_keys.mac, &ad, whisper.body)?;
        if !keys::ct_eq(&mac, &whisper.mac) {
            return Err(CryptoError::Corrupt("message authentication failed"));
        }
        envelope::open(&message_keys, whisper.ciphertext)
    }

    /// Advance the receiving chain up to (not including) `until`, staging
    /// one skipped key per step.
    fn skip_chain(&mut self, until: u32, staged: &mut Vec<SkippedKey>) -> Result<(), CryptoError> {
        while self.state.nr < until {
            let (next, mk) = kdf::chain_step(&self.state.ckr)?;
            staged.push(SkippedKey { nr: self.state.nr, dh: self.state.dhr, mk });
            self.state.ckr = next;
            self.state.nr += 1;
        }
        Ok(())
    }
}
