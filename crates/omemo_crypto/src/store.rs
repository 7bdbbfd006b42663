//! Long-term device key material.
//!
//! A `Store` is what one OMEMO device persists across restarts: the
//! identity key pair, the current (and one previous) signed prekey and a
//! pool of 100 one-time prekeys. Prekey ids are drawn from a monotonic
//! counter that wraps past `u32::MAX` and never yields 0 — id 0 always
//! means "vacant".
//!
//! A store may back any number of sessions as long as the caller serializes
//! mutations (`refill_prekeys`, `rotate_signed_prekey`, `remove_prekey`).

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use omemo_proto::frame;

use crate::error::CryptoError;
use crate::keys::{self, KeyPair, Signature};

pub const NUM_PREKEYS: usize = 100;

/// One-time prekey, consumed by the first inbound message of a session.
#[derive(Clone)]
pub struct PreKey {
    pub id: u32,
    pub kp: KeyPair,
}

/// Medium-lived prekey whose public half is signed by the identity key.
#[derive(Clone)]
pub struct SignedPreKey {
    pub id: u32,
    pub kp: KeyPair,
    pub sig: Signature,
}

pub struct Store {
    pub(crate) initialized: bool,
    pub identity: KeyPair,
    pub cur_spk: SignedPreKey,
    pub prev_spk: Option<SignedPreKey>,
    pub(crate) prekeys: [Option<PreKey>; NUM_PREKEYS],
    pub(crate) pk_counter: u32,
    pub(crate) registration_id: u32,
}

impl Store {
    /// Generate a complete fresh device store.
    pub fn setup() -> Result<Store, CryptoError> {
        let identity = KeyPair::generate()?;
        let cur_spk = gen_signed_prekey(1, &identity)?;
        let mut store = Store {
            initialized: false,
            identity,
            cur_spk,
            prev_spk: None,
            prekeys: std::array::from_fn(|_| None),
            pk_counter: 0,
            registration_id: generate_registration_id()?,
        };
        store.refill_prekeys()?;
        store.initialized = true;
        debug!(registration_id = store.registration_id, "device store set up");
        Ok(store)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// Fill every vacant prekey slot with a freshly generated key.
    pub fn refill_prekeys(&mut self) -> Result<(), CryptoError> {
        for slot in self.prekeys.iter_mut() {
            if slot.is_none() {
                let id = increment_wrap_skip_zero(self.pk_counter);
                *slot = Some(PreKey { id, kp: KeyPair::generate()? });
                self.pk_counter = id;
            }
        }
        Ok(())
    }

    /// Retire the current signed prekey, keeping it for one grace period.
    /// Callers should rotate roughly weekly.
    pub fn rotate_signed_prekey(&mut self) -> Result<(), CryptoError> {
        let next = gen_signed_prekey(increment_wrap_skip_zero(self.cur_spk.id), &self.identity)?;
        self.prev_spk = Some(std::mem::replace(&mut self.cur_spk, next));
        Ok(())
    }

    pub fn find_prekey(&self, id: u32) -> Option<&PreKey> {
        if id == 0 {
            return None;
        }
        self.prekeys.iter().flatten().find(|pk| pk.id == id)
    }

    /// Current signed prekey first, then the retained previous one.
    pub fn find_signed_prekey(&self, id: u32) -> Option<&SignedPreKey> {
        if id == 0 {
            return None;
        }
        if self.cur_spk.id == id {
            return Some(&self.cur_spk);
        }
        self.prev_spk.as_ref().filter(|spk| spk.id == id)
    }

    /// Delete a consumed one-time prekey. Call [`Store::refill_prekeys`]
    /// afterwards and republish the bundle.
    pub fn remove_prekey(&mut self, id: u32) {
        if id == 0 {
            return;
        }
        for slot in self.prekeys.iter_mut() {
            if slot.as_ref().is_some_and(|pk| pk.id == id) {
                *slot = None;
            }
        }
    }

    /// Occupied prekey slots, for bundle publication.
    pub fn prekeys(&self) -> impl Iterator<Item = &PreKey> {
        self.prekeys.iter().flatten()
    }
}

fn gen_signed_prekey(id: u32, identity: &KeyPair) -> Result<SignedPreKey, CryptoError> {
    let kp = KeyPair::generate()?;
    let serialized = frame::serialize_key(&kp.public);
    let sig = keys::sign(identity.private(), &serialized)?;
    Ok(SignedPreKey { id, kp, sig })
}

/// Registration ids live in 1..=16380.
fn generate_registration_id() -> Result<u32, CryptoError> {
    let mut buf = [0u8; 4];
    OsRng.try_fill_bytes(&mut buf).map_err(|_| CryptoError::Crypto)?;
    Ok(u32::from_le_bytes(buf) % 16380 + 1)
}

pub(crate) fn increment_wrap_skip_zero(n: u32) -> u32 {
    let n = n.wrapping_add(1);
    if n == 0 {
        1
    } else {
        n
    }
}
