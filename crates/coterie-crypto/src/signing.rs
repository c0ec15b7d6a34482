//! Ed25519 keys and signatures as the exchange uses them.
//!
//! Three thin types wrap `ed25519-dalek`: [`PublicKey`] (verification
//! and key-id derivation), [`Signature`] (a fixed 64-byte blob that
//! travels inside signature sets), and [`Keypair`] (signing). The
//! key-id derivation lives on [`PublicKey`] because group ids are
//! defined in terms of it: a group IS the id of its admin key.

use coterie_types::{CoterieError, KeyId, Result};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::hash::sha3_256;

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// The public half of an Ed25519 key pair (32 bytes).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Byte length of an encoded Ed25519 public key.
    pub const LEN: usize = 32;

    /// Wraps raw public-key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Wraps a public-key byte slice, checking its length.
    ///
    /// # Errors
    ///
    /// Returns [`CoterieError::Crypto`] unless the slice is exactly
    /// 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        match <[u8; Self::LEN]>::try_from(bytes) {
            Ok(arr) => Ok(Self(arr)),
            Err(_) => Err(CoterieError::Crypto {
                reason: format!("public key must be 32 bytes, got {}", bytes.len()),
            }),
        }
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derives the 16-byte key id: the leading half of SHA3-256 over
    /// the raw public key bytes.
    ///
    /// The admin key id of a group doubles as the group id, so this
    /// derivation is wire-stable.
    pub fn key_id(&self) -> KeyId {
        let digest = sha3_256(&self.0);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        KeyId::new(id)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// An Ed25519 signature blob (64 bytes), as carried in a signature
/// set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Byte length of an encoded Ed25519 signature.
    pub const LEN: usize = 64;

    /// Wraps raw signature bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Wraps a signature byte slice, checking its length.
    ///
    /// # Errors
    ///
    /// Returns [`CoterieError::Crypto`] unless the slice is exactly
    /// 64 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        match <[u8; Self::LEN]>::try_from(bytes) {
            Ok(arr) => Ok(Self(arr)),
            Err(_) => Err(CoterieError::Crypto {
                reason: format!("signature must be 64 bytes, got {}", bytes.len()),
            }),
        }
    }

    /// The raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

// Serde support is hand-rolled: serde has no derives for 64-byte
// arrays, and the wire shape must be a plain CBOR byte string, not a
// 64-element sequence. Deserialization still tolerates the sequence
// form for formats that split byte strings up.

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

struct RawSig;

impl<'de> serde::de::Visitor<'de> for RawSig {
    type Value = [u8; Signature::LEN];

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "an Ed25519 signature of {} bytes", Signature::LEN)
    }

    fn visit_bytes<E: serde::de::Error>(
        self,
        v: &[u8],
    ) -> std::result::Result<Self::Value, E> {
        Self::Value::try_from(v).map_err(|_| E::invalid_length(v.len(), &self))
    }

    fn visit_seq<A: serde::de::SeqAccess<'de>>(
        self,
        mut seq: A,
    ) -> std::result::Result<Self::Value, A::Error> {
        let mut out = [0u8; Signature::LEN];
        let mut filled = 0;
        while let Some(byte) = seq.next_element::<u8>()? {
            if filled == Signature::LEN {
                return Err(serde::de::Error::invalid_length(filled + 1, &self));
            }
            out[filled] = byte;
            filled += 1;
        }
        if filled < Signature::LEN {
            return Err(serde::de::Error::invalid_length(filled, &self));
        }
        Ok(out)
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_bytes(RawSig).map(Signature)
    }
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

/// A signing key pair: secret scalar plus its cached public half.
///
/// The public half is derived once at construction since every use
/// site wants both (signing attaches the key id, storage records the
/// public bytes). The secret is wiped on drop by `ed25519-dalek`.
pub struct Keypair {
    secret: SigningKey,
    public: PublicKey,
}

impl Keypair {
    fn from_signing_key(secret: SigningKey) -> Self {
        let public = PublicKey(secret.verifying_key().to_bytes());
        Self { secret, public }
    }

    /// Mints a key pair from OS entropy. Used for fresh group admin
    /// and publish keys.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Rebuilds the key pair a 32-byte seed describes. The same seed
    /// always yields the same pair.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    /// Rebuilds a key pair from a seed slice (as stored in a full key
    /// record), checking its length.
    ///
    /// # Errors
    ///
    /// Returns [`CoterieError::Crypto`] unless the slice is exactly
    /// 32 bytes.
    pub fn from_seed_slice(seed: &[u8]) -> Result<Self> {
        if seed.len() != 32 {
            return Err(CoterieError::Crypto {
                reason: format!("key seed must be 32 bytes, got {}", seed.len()),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(seed);
        let keypair = Self::from_seed(&arr);
        // Wipe the stack copy of the seed.
        arr.zeroize();
        Ok(keypair)
    }

    /// The public half.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// The 16-byte id of the public half.
    pub fn key_id(&self) -> KeyId {
        self.public.key_id()
    }

    /// Signs `content` (for the exchange, always a
    /// `payload || signing document` concatenation).
    pub fn sign(&self, content: &[u8]) -> Signature {
        Signature(self.secret.sign(content).to_bytes())
    }

    /// The 32-byte seed, for persisting full key records.
    ///
    /// # Security
    ///
    /// This is the private key. The caller owns the copy and must not
    /// let it outlive its use.
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

// No Clone and no Debug on Keypair: a key pair that cannot be copied
// or printed cannot leak through logs or stray clones.

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Checks `signature` over `content` under `public_key`, using strict
/// verification (malleable encodings rejected).
///
/// # Errors
///
/// Returns [`CoterieError::Crypto`] when the key bytes do not decode
/// to a valid curve point, or when the signature does not cover the
/// content.
pub fn verify(public_key: &PublicKey, content: &[u8], signature: &Signature) -> Result<()> {
    let key = VerifyingKey::from_bytes(public_key.as_bytes()).map_err(|_| CoterieError::Crypto {
        reason: format!("key {} is not a valid Ed25519 point", public_key.key_id()),
    })?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    if key.verify_strict(content, &sig).is_err() {
        return Err(CoterieError::Crypto {
            reason: format!("signature does not verify under key {}", public_key.key_id()),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// A payload‖document concatenation like the ones the exchange
    /// signs.
    fn signed_buffer() -> Vec<u8> {
        let mut buf = b"group payload bytes".to_vec();
        buf.extend_from_slice(b"{canonical-meta}");
        buf
    }

    #[test]
    fn fresh_keypair_signs_verifiable_content() {
        let admin = Keypair::generate();
        let buf = signed_buffer();
        let sig = admin.sign(&buf);
        assert!(verify(&admin.public_key(), &buf, &sig).is_ok());
    }

    #[test]
    fn seed_reconstruction_preserves_identity() {
        let seed = [0x5C; 32];
        let first = Keypair::from_seed(&seed);
        let second = Keypair::from_seed_slice(&seed).expect("seed slice");

        // Same seed, same identity, same signatures.
        assert_eq!(first.key_id(), second.key_id());
        let buf = signed_buffer();
        assert_eq!(first.sign(&buf).as_bytes(), second.sign(&buf).as_bytes());

        // A different seed is a different identity.
        let other = Keypair::from_seed(&[0x5D; 32]);
        assert_ne!(first.key_id(), other.key_id());
    }

    #[test]
    fn verification_rejects_tampered_buffer() {
        let admin = Keypair::generate();
        let buf = signed_buffer();
        let sig = admin.sign(&buf);

        let mut tampered = buf;
        tampered[0] ^= 0x01;
        assert!(verify(&admin.public_key(), &tampered, &sig).is_err());
    }

    #[test]
    fn verification_pins_the_signing_key() {
        let admin = Keypair::generate();
        let imposter = Keypair::generate();
        let buf = signed_buffer();
        let sig = admin.sign(&buf);

        let err = verify(&imposter.public_key(), &buf, &sig)
            .expect_err("foreign key must not verify");
        // The error names the key that failed, for the engine log.
        assert!(err.to_string().contains(&imposter.key_id().to_string()));
    }

    #[test]
    fn key_id_is_deterministic() {
        let seed = [0xAA; 32];
        let kp = Keypair::from_seed(&seed);
        assert_eq!(kp.key_id(), kp.public_key().key_id());
        assert_eq!(kp.key_id(), Keypair::from_seed(&seed).key_id());
    }

    #[test]
    fn distinct_keys_have_distinct_ids() {
        let a = Keypair::from_seed(&[0x01; 32]);
        let b = Keypair::from_seed(&[0x02; 32]);
        assert_ne!(a.key_id(), b.key_id());
    }

    #[test]
    fn public_key_slice_roundtrip() -> coterie_types::Result<()> {
        let kp = Keypair::generate();
        let pk = PublicKey::from_slice(kp.public_key().as_bytes())?;
        assert_eq!(pk, kp.public_key());
        Ok(())
    }

    #[test]
    fn short_slices_rejected() {
        assert!(PublicKey::from_slice(&[0u8; 31]).is_err());
        assert!(Signature::from_slice(&[0u8; 63]).is_err());
        assert!(Keypair::from_seed_slice(&[0u8; 16]).is_err());
        assert!(Signature::from_slice(&[0u8; 64]).is_ok());
    }
}
