//! Security overlay (§4.3): Nonce replay protection and the
//! Authentication-option hash-based MAC.

use std::net::Ipv6Addr;

use crate::error::Nd6Error;
use crate::external::Hasher;
use crate::wire::{Eui64, Nd6Option};

/// A sender strictly increments its own counter before attaching a Nonce
/// option; wraps are not expected at ND volume but saturate rather than
/// silently roll over to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NonceCounter([u8; 6]);

impl NonceCounter {
    pub fn zero() -> Self {
        Self([0; 6])
    }

    pub fn value(&self) -> u64 {
        let mut v = [0u8; 8];
        v[2..].copy_from_slice(&self.0);
        u64::from_be_bytes(v)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    pub fn increment(&mut self) {
        let next = self.value().saturating_add(1).min(0xFFFF_FFFF_FFFF);
        self.0 = next.to_be_bytes()[2..].try_into().unwrap();
    }
}

/// A receiver accepts an incoming Nonce only if it compares strictly
/// greater (lexicographic byte compare, which equals numeric compare for a
/// fixed-width big-endian counter) than the stored value.
pub fn nonce_is_fresh(stored: &[u8; 6], incoming: &[u8; 6]) -> bool {
    incoming > stored
}

/// Verifies and, on success, advances the stored replay counter. Equal or
/// smaller ⇒ `ReplayRejected`; the stored value is left untouched.
pub fn check_and_advance_nonce(stored: &mut [u8; 6], incoming: &[u8; 6]) -> Result<(), Nd6Error> {
    if nonce_is_fresh(stored, incoming) {
        *stored = *incoming;
        Ok(())
    } else {
        Err(Nd6Error::ReplayRejected)
    }
}

/// The router's currently-advertised PIO/6CO/ABRO, each in full wire form
/// (type + length + padding), concatenated to form the LBR-info block the
/// Authentication option binds to.
#[derive(Debug, Clone, Default)]
pub struct LbrInfo {
    pub pio: Vec<u8>,
    pub sixco: Vec<u8>,
    pub abro: Vec<u8>,
}

impl LbrInfo {
    pub fn from_options(pio: Option<&Nd6Option>, sixco: Option<&Nd6Option>, abro: Option<&Nd6Option>) -> Self {
        use crate::wire::encode_option;
        Self {
            pio: pio.map(encode_option).unwrap_or_default(),
            sixco: sixco.map(encode_option).unwrap_or_default(),
            abro: abro.map(encode_option).unwrap_or_default(),
        }
    }

    fn concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pio.len() + self.sixco.len() + self.abro.len());
        out.extend_from_slice(&self.pio);
        out.extend_from_slice(&self.sixco);
        out.extend_from_slice(&self.abro);
        out
    }
}

/// Builds `M`: src addr(16) ‖ eui64(8) ‖ aro-lifetime(2) ‖ LBR-info ‖
/// nonce(6) ‖ key(32), exactly as specified for the Authentication option.
pub fn build_auth_message(
    src: &Ipv6Addr,
    eui64: &Eui64,
    aro_lifetime: u16,
    lbr: &LbrInfo,
    nonce: &[u8; 6],
    key: &[u8; 32],
) -> Vec<u8> {
    let mut m = Vec::with_capacity(16 + 8 + 2 + lbr.pio.len() + lbr.sixco.len() + lbr.abro.len() + 6 + 32);
    m.extend_from_slice(&src.octets());
    m.extend_from_slice(&eui64.0);
    m.extend_from_slice(&aro_lifetime.to_be_bytes());
    m.extend_from_slice(&lbr.concat());
    m.extend_from_slice(nonce);
    m.extend_from_slice(key);
    m
}

pub fn compute_auth_tag(hasher: &dyn Hasher, message: &[u8]) -> [u8; 32] {
    hasher.hash(message)
}

/// Recomputes `M` from the caller-supplied inputs and compares byte-wise in
/// constant time; mismatch ⇒ `AuthFailed`.
pub fn verify_auth_tag(hasher: &dyn Hasher, message: &[u8], tag: &[u8; 32]) -> Result<(), Nd6Error> {
    let computed = hasher.hash(message);
    ring::constant_time::verify_slices_are_equal(&computed, tag).map_err(|_| Nd6Error::AuthFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::Sha256Hasher;

    #[test]
    fn nonce_counter_increments_strictly() {
        let mut c = NonceCounter::zero();
        assert_eq!(c.value(), 0);
        c.increment();
        assert_eq!(c.value(), 1);
    }

    #[test]
    fn strictly_greater_nonce_is_accepted_and_equal_is_replay() {
        let mut stored = [0, 0, 0, 0, 0, 1];
        assert!(check_and_advance_nonce(&mut stored, &[0, 0, 0, 0, 0, 2]).is_ok());
        assert_eq!(stored, [0, 0, 0, 0, 0, 2]);
        // Replay of the same (now stored) counter is rejected.
        assert_eq!(check_and_advance_nonce(&mut stored, &[0, 0, 0, 0, 0, 2]), Err(Nd6Error::ReplayRejected));
        assert_eq!(stored, [0, 0, 0, 0, 0, 2]); // unchanged on rejection
    }

    #[test]
    fn smaller_nonce_is_replay_rejected() {
        let mut stored = [0, 0, 0, 0, 0, 5];
        assert_eq!(check_and_advance_nonce(&mut stored, &[0, 0, 0, 0, 0, 3]), Err(Nd6Error::ReplayRejected));
    }

    #[test]
    fn auth_tag_round_trips_with_matching_inputs() {
        let hasher = Sha256Hasher;
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let eui = Eui64([2, 0, 0, 0, 0, 0, 0, 1]);
        let lbr = LbrInfo { pio: vec![1, 2, 3], sixco: vec![4, 5], abro: vec![6] };
        let key = [9u8; 32];
        let nonce = [0, 0, 0, 0, 0, 1];
        let m = build_auth_message(&src, &eui, 300, &lbr, &nonce, &key);
        let tag = compute_auth_tag(&hasher, &m);
        assert!(verify_auth_tag(&hasher, &m, &tag).is_ok());
    }

    #[test]
    fn flipping_any_byte_in_m_breaks_verification() {
        let hasher = Sha256Hasher;
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let eui = Eui64([2, 0, 0, 0, 0, 0, 0, 1]);
        let lbr = LbrInfo { pio: vec![1, 2, 3], sixco: vec![4, 5], abro: vec![6] };
        let key = [9u8; 32];
        let nonce = [0, 0, 0, 0, 0, 1];
        let m = build_auth_message(&src, &eui, 300, &lbr, &nonce, &key);
        let tag = compute_auth_tag(&hasher, &m);

        let bad_src: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let m2 = build_auth_message(&bad_src, &eui, 300, &lbr, &nonce, &key);
        assert_eq!(verify_auth_tag(&hasher, &m2, &tag), Err(Nd6Error::AuthFailed));

        let mut bad_lbr = lbr.clone();
        bad_lbr.pio[0] ^= 0xff;
        let m3 = build_auth_message(&src, &eui, 300, &bad_lbr, &nonce, &key);
        assert_eq!(verify_auth_tag(&hasher, &m3, &tag), Err(Nd6Error::AuthFailed));
    }
}
