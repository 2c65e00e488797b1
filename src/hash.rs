// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! BLAKE3 content hashing, and the hex encoding used for hashes everywhere
//! on disk and in the database (so they sort and compare as plain text).

/// Length of a hash in its hex-encoded form.
pub const HASH_HEX_LEN: usize = 64;

/// Hashes a payload and returns its lowercase hex digest.
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Validates that a string is a well-formed hash: 64 lowercase hex characters.
#[must_use]
pub fn is_valid_hash(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_deterministic() {
        assert_eq!(hash_payload(b"hello"), hash_payload(b"hello"));
        assert_ne!(hash_payload(b"hello"), hash_payload(b"world"));
    }

    #[test]
    fn validates_hex_shape() {
        assert!(is_valid_hash(&hash_payload(b"hello")));
        assert!(!is_valid_hash("too-short"));
        assert!(!is_valid_hash(&"A".repeat(64)));
        assert!(!is_valid_hash(&"g".repeat(64)));
    }
}
