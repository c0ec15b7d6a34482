//! SHA3-256 hashing and deterministic identifier derivation.
//!
//! All hashing in Coterie uses SHA3-256. Message ids are computed over
//! `payload || canonical meta`; content hashes cover the service
//! payload alone so the integrity check can recompute them without
//! re-canonicalizing metadata.

use coterie_types::MessageId;
use sha3::{Digest, Sha3_256};

/// SHA3-256 digest of `data` as a plain 32-byte array.
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Computes the content hash of a service payload.
///
/// Stored in the item's meta at publish/receive time and recomputed by
/// the periodic integrity check.
pub fn content_hash(payload: &[u8]) -> [u8; 32] {
    sha3_256(payload)
}

/// Computes a message id from the payload and the canonical meta bytes
/// as they stood at signing time.
///
/// Formula: `MessageId = SHA3-256(payload || canonical_meta)`.
///
/// This function is pure and deterministic; two peers holding the same
/// signed buffer derive the same id.
pub fn message_id(payload: &[u8], canonical_meta: &[u8]) -> MessageId {
    let mut hasher = Sha3_256::new();
    hasher.update(payload);
    hasher.update(canonical_meta);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    MessageId::new(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// NIST SHA3-256 test vector: empty input.
    #[test]
    fn sha3_256_empty_input() {
        let hash = sha3_256(b"");
        let expected = [
            0xa7, 0xff, 0xc6, 0xf8, 0xbf, 0x1e, 0xd7, 0x66, 0x51, 0xc1, 0x47, 0x56, 0xa0, 0x61,
            0xd6, 0x62, 0xf5, 0x80, 0xff, 0x4d, 0xe4, 0x3b, 0x49, 0xfa, 0x82, 0xd8, 0x0a, 0x4b,
            0x80, 0xf8, 0x43, 0x4a,
        ];
        assert_eq!(hash, expected);
    }

    /// NIST SHA3-256 test vector: "abc".
    #[test]
    fn sha3_256_abc() {
        let hash = sha3_256(b"abc");
        let expected = [
            0x3a, 0x98, 0x5d, 0xa7, 0x4f, 0xe2, 0x25, 0xb2, 0x04, 0x5c, 0x17, 0x2d, 0x6b, 0xd3,
            0x90, 0xbd, 0x85, 0x5f, 0x08, 0x6e, 0x3e, 0x9d, 0x52, 0x5b, 0x46, 0xbf, 0xe2, 0x45,
            0x11, 0x43, 0x15, 0x32,
        ];
        assert_eq!(hash, expected);
    }

    #[test]
    fn message_id_is_deterministic() {
        let id1 = message_id(b"payload", b"meta");
        let id2 = message_id(b"payload", b"meta");
        assert_eq!(id1, id2);
    }

    #[test]
    fn message_id_depends_on_both_parts() {
        let base = message_id(b"payload", b"meta");
        assert_ne!(base, message_id(b"payload2", b"meta"));
        assert_ne!(base, message_id(b"payload", b"meta2"));
    }

    #[test]
    fn content_hash_matches_plain_digest() {
        assert_eq!(content_hash(b"abc"), sha3_256(b"abc"));
    }
}
