//! Double Ratchet state.
//!
//! Reference: <https://signal.org/docs/specifications/doubleratchet/>
//!
//! State separation:
//!   rk  — root key, updated on every DH ratchet turn
//!   cks — sending chain key, advanced per outgoing message
//!   ckr — receiving chain key, advanced per incoming message
//! Message keys are derived from the chain keys, used once and never kept.

use tracing::trace;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf;
use crate::keys::{Key, KeyPair};

/// Hard bound on message keys skipped by a single decrypt, counting the
/// tail of the previous chain plus the gap in the new one.
pub const MAX_SKIP: u32 = 1000;

/// Ratchet state. All-zero fields mean "not established yet": the
/// responder has no chains until the initiator's first message arrives.
#[derive(Clone, Default)]
pub struct State {
    /// Our current ratchet key pair.
    pub dhs: KeyPair,
    /// Peer's current ratchet public key (zero = none seen yet).
    pub dhr: Key,
    pub rk: Key,
    pub cks: Key,
    pub ckr: Key,
    /// Messages sent in the current chain.
    pub ns: u32,
    /// Messages received in the current chain.
    pub nr: u32,
    /// Length of the previous sending chain.
    pub pn: u32,
}

impl Drop for State {
    fn drop(&mut self) {
        self.rk.zeroize();
        self.cks.zeroize();
        self.ckr.zeroize();
    }
}

impl State {
    /// Initiator bootstrap. The X3DH ephemeral becomes our first ratchet
    /// key, the peer's signed prekey their first ratchet public, and the
    /// sending chain comes from an immediate root step.
    pub(crate) fn init_alice(sk: &Key, their_spk: &Key, eph: KeyPair) -> Result<State, CryptoError> {
        let mut state = State {
            dhs: eph,
            dhr: *their_spk,
            rk: *sk,
            cks: [0u8; 32],
            ckr: [0u8; 32],
            ns: 0,
            nr: 0,
            pn: 0,
        };
        let mut dh_out = state.dhs.dh(&state.dhr);
        state.cks = kdf::rk_step(&mut state.rk, &dh_out)?;
        dh_out.zeroize();
        Ok(state)
    }

    /// Responder bootstrap. The signed prekey doubles as our first ratchet
    /// key; no chain exists until the first message triggers a DH turn.
    pub(crate) fn init_bob(sk: &Key, spk: KeyPair) -> State {
        State {
            dhs: spk,
            dhr: [0u8; 32],
            rk: *sk,
            cks: [0u8; 32],
            ckr: [0u8; 32],
            ns: 0,
            nr: 0,
            pn: 0,
        }
    }

    /// One full DH ratchet turn driven by a new remote ratchet key.
    pub(crate) fn dh_ratchet(&mut self, header_dh: &Key) -> Result<(), CryptoError> {
        self.pn = self.ns;
        self.ns = 0;
        self.nr = 0;
        self.dhr = *header_dh;
        let mut dh_out = self.dhs.dh(&self.dhr);
        self.ckr = kdf::rk_step(&mut self.rk, &dh_out)?;
        self.dhs = KeyPair::generate()?;
        dh_out = self.dhs.dh(&self.dhr);
        self.cks = kdf::rk_step(&mut self.rk, &dh_out)?;
        dh_out.zeroize();
        trace!(pn = self.pn, "dh ratchet turned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alice_and_bob_first_chains_line_up() {
        // After X3DH both sides hold `sk`; Alice immediately derives her
        // sending chain against Bob's signed prekey, and Bob derives the
        // matching receiving chain on his first ratchet turn.
        let sk = [0x42u8; 32];
        let bob_spk = KeyPair::generate().unwrap();
        let bob_spk_pub = bob_spk.public;

        let alice = State::init_alice(&sk, &bob_spk_pub, KeyPair::generate().unwrap()).unwrap();
        let mut bob = State::init_bob(&sk, bob_spk);

        bob.dh_ratchet(&alice.dhs.public).unwrap();
        assert_eq!(alice.cks, bob.ckr);
        assert_eq!(bob.nr, 0);
        assert_eq!(bob.dhr, alice.dhs.public);
        assert_ne!(bob.cks, bob.ckr);
    }

    #[test]
    fn ratchet_turn_resets_counters() {
        let sk = [7u8; 32];
        let bob_spk = KeyPair::generate().unwrap();
        let mut state = State::init_alice(&sk, &bob_spk.public, KeyPair::generate().unwrap()).unwrap();
        state.ns = 5;
        state.nr = 3;

        let old_dhs = state.dhs.public;
        let peer = KeyPair::generate().unwrap();
        state.dh_ratchet(&peer.public).unwrap();

        assert_eq!(state.pn, 5);
        assert_eq!(state.ns, 0);
        assert_eq!(state.nr, 0);
        assert_eq!(state.dhr, peer.public);
        assert_ne!(state.dhs.public, old_dhs);
    }
}
