//! Keyed-hash primitive.
//!
//! A thin wrapper over RFC 2104 HMAC-SHA256 plus the "readable hash" derivation
//! that maps digest bytes onto a printable alphabet. The engine never touches
//! digest internals directly; it only ever calls [`readable_hash`].

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256(key, message), returning the raw 32-byte digest.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Map an HMAC-SHA256 digest of `token` onto `len` bytes drawn from the
/// inclusive alphabet range `[begin, end]`.
///
/// `len` is clamped to the digest size (32) by callers before invocation;
/// this function trusts its `len` argument and will panic if asked for more
/// bytes than the digest holds.
pub fn readable_hash(secret: &[u8], token: &[u8], begin: u8, end: u8, len: usize) -> Vec<u8> {
    let digest = hmac_sha256(secret, token);
    let span = u16::from(end - begin) + 1;
    digest[..len]
        .iter()
        .map(|b| ((u16::from(*b) % span) as u8) + begin)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_sha256(b"secret", b"alice");
        let b = hmac_sha256(b"secret", b"alice");
        assert_eq!(a, b);
    }

    #[test]
    fn hmac_is_secret_sensitive() {
        let a = hmac_sha256(b"secret-one", b"alice");
        let b = hmac_sha256(b"secret-two", b"alice");
        assert_ne!(a, b);
    }

    #[test]
    fn hmac_is_message_sensitive() {
        let a = hmac_sha256(b"secret", b"alice");
        let b = hmac_sha256(b"secret", b"bob");
        assert_ne!(a, b);
    }

    #[test]
    fn readable_hash_alphabet_closure_text() {
        let out = readable_hash(b"s", b"alice", b'a', b'z', 32);
        assert_eq!(out.len(), 32);
        assert!(out.iter().all(|b| (b'a'..=b'z').contains(b)));
    }

    #[test]
    fn readable_hash_alphabet_closure_int() {
        let out = readable_hash(b"s", b"30", b'1', b'9', 16);
        assert!(out.iter().all(|b| (b'1'..=b'9').contains(b)));
        // '0' must never appear so a numeric interpretation never loses a
        // leading digit.
        assert!(!out.contains(&b'0'));
    }

    #[test]
    fn readable_hash_length_matches_request() {
        for len in [1usize, 8, 16, 32] {
            assert_eq!(readable_hash(b"s", b"tok", b'a', b'z', len).len(), len);
        }
    }

    #[test]
    fn readable_hash_position_independent() {
        // The hash of a token must not depend on anything beyond (secret, token).
        let a = readable_hash(b"s", b"alice", b'a', b'z', 8);
        let b = readable_hash(b"s", b"alice", b'a', b'z', 8);
        assert_eq!(a, b);
    }

    #[test]
    fn readable_hash_scenario_alice() {
        // TextHash, length 8, secret "s", token "alice".
        let digest = hmac_sha256(b"s", b"alice");
        let expected: Vec<u8> = digest[..8].iter().map(|b| (b % 26) + b'a').collect();
        assert_eq!(readable_hash(b"s", b"alice", b'a', b'z', 8), expected);
    }
}
