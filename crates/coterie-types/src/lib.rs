//! Core shared types for the Coterie group exchange.
//!
//! This crate defines all fundamental types used across the workspace.
//! No other crate should define shared types — everything lives here.

pub mod config;
pub mod flags;
pub mod policy;

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// GroupId
// ---------------------------------------------------------------------------

/// Identifier of a group, derived from the group's admin public key.
///
/// A group id is the 16-byte key id of the admin key pair minted when
/// the group was created. A group received from a peer therefore proves
/// its own identity: the admin signature must verify under the key
/// whose id equals the group id.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct GroupId([u8; 16]);

impl GroupId {
    /// The fixed byte length of a group id.
    pub const LEN: usize = 16;

    /// Creates a new `GroupId` from raw bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns true if every byte is zero (the null group).
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl From<[u8; 16]> for GroupId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl From<KeyId> for GroupId {
    fn from(id: KeyId) -> Self {
        Self(*id.as_bytes())
    }
}

impl AsRef<[u8]> for GroupId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for GroupId {
    type Err = CoterieError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CoterieError::InvalidId {
            reason: "invalid hex encoding for group id".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(CoterieError::InvalidId {
                reason: format!("expected 16 bytes for group id, got {}", bytes.len()),
            });
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Identifier of a message: SHA3-256 of `payload || canonical meta` at
/// signing time.
///
/// Deterministic across peers — two nodes holding the same message
/// bytes compute the same id.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct MessageId([u8; 32]);

impl MessageId {
    /// The fixed byte length of a message id.
    pub const LEN: usize = 32;

    /// Creates a new `MessageId` from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns true if every byte is zero (no message).
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<[u8; 32]> for MessageId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for MessageId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for MessageId {
    type Err = CoterieError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CoterieError::InvalidId {
            reason: "invalid hex encoding for message id".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(CoterieError::InvalidId {
                reason: format!("expected 32 bytes for message id, got {}", bytes.len()),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// KeyId
// ---------------------------------------------------------------------------

/// Identifier of a signing key: the first 16 bytes of SHA3-256 over the
/// raw Ed25519 public key.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct KeyId([u8; 16]);

impl KeyId {
    /// The fixed byte length of a key id.
    pub const LEN: usize = 16;

    /// Creates a new `KeyId` from raw bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for KeyId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl From<GroupId> for KeyId {
    fn from(id: GroupId) -> Self {
        Self(*id.as_bytes())
    }
}

impl AsRef<[u8]> for KeyId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// IdentityId
// ---------------------------------------------------------------------------

/// Identifier of an externally managed signing identity (author).
///
/// Identities are owned by the identity service, not by the exchange;
/// the exchange only references them for author signatures.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct IdentityId([u8; 16]);

impl IdentityId {
    /// The fixed byte length of an identity id.
    pub const LEN: usize = 16;

    /// Creates a new `IdentityId` from raw bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for IdentityId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for IdentityId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for IdentityId {
    type Err = CoterieError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CoterieError::InvalidId {
            reason: "invalid hex encoding for identity id".into(),
        })?;
        if bytes.len() != Self::LEN {
            return Err(CoterieError::InvalidId {
                reason: format!("expected 16 bytes for identity id, got {}", bytes.len()),
            });
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Identifier of a network peer, assigned by the transport layer.
///
/// The exchange treats peer ids as opaque: they tag incoming raw items
/// with their origin (used for your-eyes-only originator tracking and
/// for directed author-key requests).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// The fixed byte length of a peer id.
    pub const LEN: usize = 32;

    /// Creates a new `PeerId` from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for PeerId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// CircleId
// ---------------------------------------------------------------------------

/// Identifier of a visibility circle restricting who may see a group.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CircleId([u8; 16]);

impl CircleId {
    /// The fixed byte length of a circle id.
    pub const LEN: usize = 16;

    /// Creates a new `CircleId` from raw bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for CircleId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for CircleId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CircleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// Opaque handle for an asynchronous request across the engine boundary.
///
/// Tokens are minted strictly increasing (wrapping is acceptable over
/// the engine's lifetime) and reach a terminal status in bounded time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Token(u32);

impl Token {
    /// Creates a token from its raw value.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw token value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// UTC timestamp in whole seconds since the Unix epoch.
///
/// The exchange does arithmetic on timestamps (publication tests,
/// pending-sign timeouts, cleanup ages), so the representation is a
/// plain second count; [`Timestamp::now`] reads the wall clock via
/// `chrono`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Returns the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    /// Creates a timestamp from whole seconds since the epoch.
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Returns the timestamp as seconds since the epoch.
    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// Returns this timestamp shifted forward by `secs` seconds.
    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Returns the number of seconds from `earlier` to `self`
    /// (negative if `self` precedes `earlier`).
    pub fn secs_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp(self.0, 0) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}s", self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// CoterieError
// ---------------------------------------------------------------------------

/// Central error type for the Coterie workspace.
///
/// All crates convert their internal errors into variants of this enum.
/// Note that sign/validate outcomes inside the exchange engine are NOT
/// errors — they are explicit state-machine results; `CoterieError` is
/// reserved for genuine failures (storage, codec, crypto, config).
#[derive(Debug, Error)]
pub enum CoterieError {
    /// An identifier is malformed (wrong length, bad hex).
    #[error("invalid id: {reason}")]
    InvalidId {
        /// Human-readable description of the problem.
        reason: String,
    },

    /// A cryptographic operation failed (signing, verification, bad key).
    #[error("crypto error: {reason}")]
    Crypto {
        /// Human-readable description of the cryptographic failure.
        reason: String,
    },

    /// Serialization or deserialization of a protocol record failed.
    #[error("protocol error: {reason}")]
    Protocol {
        /// Human-readable description of the codec failure.
        reason: String,
    },

    /// A storage operation failed.
    #[error("storage error: {reason}")]
    Storage {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// A key set violates a structural invariant (e.g. more than one
    /// full publish-private key).
    #[error("key set error: {reason}")]
    KeySet {
        /// Human-readable description of the key-set violation.
        reason: String,
    },

    /// A configuration value is invalid.
    #[error("config error: {reason}")]
    Config {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

/// Convenience result type using [`CoterieError`].
pub type Result<T> = std::result::Result<T, CoterieError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
