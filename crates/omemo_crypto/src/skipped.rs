//! Skipped message keys for out-of-order delivery.
//!
//! The session core never owns this storage: callers pass a
//! [`MessageKeyStore`] into `decrypt_key`, which lets clients keep skipped
//! keys wherever their sessions live. The bounded [`MemoryKeyStore`] here
//! is enough for most of them and can be co-serialized with its session.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::keys::{self, Key};

/// A message key parked for a message that has not arrived yet.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SkippedKey {
    pub nr: u32,
    /// Remote ratchet key of the chain the key belongs to.
    pub dh: Key,
    pub mk: Key,
}

/// Caller-owned storage for skipped message keys.
///
/// `load` is consuming: a hit removes the entry, which is what makes
/// replayed ciphertexts fail. If decryption fails after a successful load
/// the session re-inserts the key through `store`, so an erroring call
/// always leaves the cache as it found it.
pub trait MessageKeyStore {
    /// Look up and remove the key for `(dh, nr)`.
    fn load(&mut self, dh: &Key, nr: u32) -> Result<Option<Key>, CryptoError>;

    /// Persist one skipped key. `total` is the number of keys the current
    /// decrypt stores altogether; implementations enforcing a cap should
    /// reject the first call of a batch that cannot fit.
    fn store(&mut self, key: &SkippedKey, total: u64) -> Result<(), CryptoError>;
}

/// Bounded in-memory implementation, oldest entries first.
pub struct MemoryKeyStore {
    entries: Vec<SkippedKey>,
    cap: usize,
}

impl MemoryKeyStore {
    pub fn new(cap: usize) -> MemoryKeyStore {
        MemoryKeyStore { entries: Vec::new(), cap }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub(crate) fn entries(&self) -> &[SkippedKey] {
        &self.entries
    }

    pub(crate) fn insert_raw(&mut self, key: SkippedKey) {
        if self.entries.len() < self.cap {
            self.entries.push(key);
        }
    }
}

impl MessageKeyStore for MemoryKeyStore {
    fn load(&mut self, dh: &Key, nr: u32) -> Result<Option<Key>, CryptoError> {
        let found = self
            .entries
            .iter()
            .position(|k| k.nr == nr && keys::ct_eq(&k.dh, dh));
        match found {
            Some(i) => {
                let entry = self.entries.remove(i);
                Ok(Some(entry.mk))
            }
            None => Ok(None),
        }
    }

    fn store(&mut self, key: &SkippedKey, total: u64) -> Result<(), CryptoError> {
        if total > self.cap as u64 || self.entries.len() >= self.cap {
            return Err(CryptoError::SkipBufferFull);
        }
        self.entries.push(key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(nr: u32) -> SkippedKey {
        SkippedKey { nr, dh: [0xd0; 32], mk: [nr as u8; 32] }
    }

    #[test]
    fn load_is_consuming() {
        let mut cache = MemoryKeyStore::new(4);
        cache.store(&skipped(3), 1).unwrap();
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.load(&[0xd0; 32], 3).unwrap(), Some([3u8; 32]));
        assert!(cache.is_empty());
        assert_eq!(cache.load(&[0xd0; 32], 3).unwrap(), None);
    }

    #[test]
    fn miss_on_other_chain() {
        let mut cache = MemoryKeyStore::new(4);
        cache.store(&skipped(3), 1).unwrap();
        assert_eq!(cache.load(&[0xd1; 32], 3).unwrap(), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn rejects_batches_beyond_capacity() {
        let mut cache = MemoryKeyStore::new(2);
        assert_eq!(cache.store(&skipped(0), 3), Err(CryptoError::SkipBufferFull));
        assert!(cache.is_empty());

        cache.store(&skipped(0), 2).unwrap();
        cache.store(&skipped(1), 2).unwrap();
        assert_eq!(cache.store(&skipped(2), 1), Err(CryptoError::SkipBufferFull));
        assert_eq!(cache.len(), 2);
    }
}
