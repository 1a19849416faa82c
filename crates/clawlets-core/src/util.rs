//! Token, digest, and encoding primitives.
//!
//! Tokens carry 256 bits of OS CSPRNG randomness and are base64url-encoded
//! without padding. Digest comparison of stored token hashes goes through
//! [`constant_time_eq`] so verification never short-circuits on a prefix
//! mismatch.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Generate an opaque token: 32 random bytes, base64url without padding.
#[must_use]
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// base64url (no padding) SHA-256 digest — used for sealed-input key ids
/// derived from SPKI bytes.
#[must_use]
pub fn sha256_b64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(data))
}

/// Length-aware constant-time string comparison. Unequal lengths return
/// `false` immediately; equal-length inputs compare branchlessly.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Encode bytes as base64url without padding.
#[must_use]
pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode a base64url (no padding) string.
pub fn b64url_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_tokens_are_unique_and_unpadded() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert!(!a.contains('='));
        // 32 bytes → 43 base64url chars without padding.
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn sha256_hex_is_lowercase() {
        let digest = sha256_hex(b"clawlets");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, digest.to_lowercase());
    }

    #[test]
    fn constant_time_eq_handles_lengths() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn b64url_roundtrip() {
        let bytes = b"\x00\xff\x10binary";
        let encoded = b64url_encode(bytes);
        assert_eq!(b64url_decode(&encoded).unwrap(), bytes);
    }
}
