//! Cryptographic primitives for the Coterie exchange.
//!
//! Ed25519 signing and verification plus SHA3-256 hashing. Group and
//! message identifiers are both derived here so the derivation rules
//! live in exactly one place.

pub mod hash;
pub mod signing;

pub use hash::{content_hash, message_id, sha3_256};
pub use signing::{verify, Keypair, PublicKey, Signature};
