//! Routing fingerprints.
//!
//! A fingerprint is the first 16 uppercase hex characters of SHA-256 over
//! the public-key blob.  64 bits is plenty to tell a user's handful of
//! keys apart; callers are responsible for globally-unique keys.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 16;

/// Derive the routing fingerprint for a public-key blob.
pub fn fingerprint(key_blob: &[u8]) -> String {
    let digest = Sha256::digest(key_blob);
    let mut out = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // SHA-256("abc") = ba7816bf8f01cfea414140de5dae2223...
        assert_eq!(fingerprint(b"abc"), "BA7816BF8F01CFEA");
    }

    #[test]
    fn sixteen_uppercase_hex_chars() {
        let fp = fingerprint(&[0u8; 128]);
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fp.to_uppercase());
    }

    #[test]
    fn distinct_blobs_distinct_fingerprints() {
        assert_ne!(fingerprint(b"key-one"), fingerprint(b"key-two"));
    }

    #[test]
    fn empty_blob_still_fingerprints() {
        assert_eq!(fingerprint(b"").len(), 16);
    }
}
