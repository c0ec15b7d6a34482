//! Group key sets and signature sets.
//!
//! Every group is bound to two Ed25519 key pairs: the **admin** pair
//! gating group updates and the **publish** pair gating posting. The
//! locally persisted meta of a group authored here keeps the full
//! (private) records; the over-the-wire meta carries public halves
//! only. The [`KeySet`] type models both shapes with the same map.

use std::collections::BTreeMap;

use coterie_crypto::{Keypair, PublicKey, Signature};
use coterie_types::{CoterieError, KeyId, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// KeyDistribution / KeyMaterial
// ---------------------------------------------------------------------------

/// Distribution role of a key record within a group key set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum KeyDistribution {
    /// Admin key; its id doubles as the group id.
    Admin,
    /// Public half of the publish pair, shipped to every peer.
    PublishPublic,
    /// Private half of the publish pair, held by publishers only.
    PublishPrivate,
}

/// Material carried by a key record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum KeyMaterial {
    /// 32-byte Ed25519 public key.
    PublicOnly,
    /// 32-byte Ed25519 seed (the private key; the public half is
    /// derivable).
    Full,
}

// ---------------------------------------------------------------------------
// KeyRecord
// ---------------------------------------------------------------------------

/// One key in a group key set.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Key id derived from the public half.
    pub key_id: KeyId,
    /// Distribution role.
    pub distribution: KeyDistribution,
    /// Whether `bytes` is a public key or a private seed.
    pub material: KeyMaterial,
    /// Raw key material: public key bytes for [`KeyMaterial::PublicOnly`],
    /// seed bytes for [`KeyMaterial::Full`].
    pub bytes: Vec<u8>,
}

impl KeyRecord {
    /// Returns the public key of this record, deriving it from the
    /// seed for full records.
    pub fn public_key(&self) -> Result<PublicKey> {
        match self.material {
            KeyMaterial::PublicOnly => PublicKey::from_slice(&self.bytes),
            KeyMaterial::Full => Ok(Keypair::from_seed_slice(&self.bytes)?.public_key()),
        }
    }

    /// Reconstructs the signing keypair of a full record.
    ///
    /// # Errors
    ///
    /// Returns [`CoterieError::KeySet`] for public-only records.
    pub fn keypair(&self) -> Result<Keypair> {
        match self.material {
            KeyMaterial::Full => Keypair::from_seed_slice(&self.bytes),
            KeyMaterial::PublicOnly => Err(CoterieError::KeySet {
                reason: format!("key {} holds no private material", self.key_id),
            }),
        }
    }

    /// Returns the public-only counterpart of this record.
    ///
    /// A full publish-private record converts to a publish-public
    /// record, so the wire shape of a key set never reveals which
    /// distribution the local node holds privately.
    pub fn to_public(&self) -> Result<KeyRecord> {
        let public = self.public_key()?;
        let distribution = match self.distribution {
            KeyDistribution::PublishPrivate => KeyDistribution::PublishPublic,
            other => other,
        };
        Ok(KeyRecord {
            key_id: self.key_id,
            distribution,
            material: KeyMaterial::PublicOnly,
            bytes: public.as_bytes().to_vec(),
        })
    }

    /// Returns true if this record carries private material.
    pub fn is_full(&self) -> bool {
        self.material == KeyMaterial::Full
    }
}

// ---------------------------------------------------------------------------
// KeySet
// ---------------------------------------------------------------------------

/// The key set of a group: key id → key record.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeySet {
    /// All key records, ordered by key id.
    pub keys: BTreeMap<KeyId, KeyRecord>,
}

impl KeySet {
    /// Creates an empty key set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, keyed by its own id.
    pub fn insert(&mut self, record: KeyRecord) {
        self.keys.insert(record.key_id, record);
    }

    /// Returns the full admin key record, if present.
    pub fn admin_full(&self) -> Option<&KeyRecord> {
        self.keys
            .values()
            .find(|k| k.distribution == KeyDistribution::Admin && k.is_full())
    }

    /// Returns the admin record regardless of material, if present.
    pub fn admin(&self) -> Option<&KeyRecord> {
        self.keys
            .values()
            .find(|k| k.distribution == KeyDistribution::Admin)
    }

    /// Returns the public half of the publish pair, if present.
    ///
    /// Full publish-private records qualify too (their public half is
    /// derivable), so a locally persisted set verifies its own
    /// publish signatures.
    pub fn publish_public(&self) -> Option<&KeyRecord> {
        self.keys
            .values()
            .find(|k| k.distribution == KeyDistribution::PublishPublic)
            .or_else(|| {
                self.keys
                    .values()
                    .find(|k| k.distribution == KeyDistribution::PublishPrivate)
            })
    }

    /// Returns the full publish-private record, if present.
    pub fn publish_private(&self) -> Option<&KeyRecord> {
        self.keys
            .values()
            .find(|k| k.distribution == KeyDistribution::PublishPrivate && k.is_full())
    }

    /// Returns true if both the admin and publish private keys are
    /// present in full. Required before a group update can be signed.
    pub fn has_private_admin_and_publish(&self) -> bool {
        self.admin_full().is_some() && self.publish_private().is_some()
    }

    /// Returns the public-half projection of this set: the shape that
    /// goes onto the wire and into signing documents.
    pub fn public_half(&self) -> Result<KeySet> {
        let mut out = KeySet::new();
        for record in self.keys.values() {
            out.insert(record.to_public()?);
        }
        Ok(out)
    }

    /// Structural sanity check, applied when a key set is loaded or
    /// received.
    ///
    /// A set carrying more than one full publish-private key is
    /// ambiguous (the signing side picks "the" private publish key),
    /// so such sets are rejected outright.
    pub fn validate(&self) -> Result<()> {
        let full_publish = self
            .keys
            .values()
            .filter(|k| k.distribution == KeyDistribution::PublishPrivate && k.is_full())
            .count();
        if full_publish > 1 {
            return Err(CoterieError::KeySet {
                reason: format!("{full_publish} full publish-private keys; at most 1 allowed"),
            });
        }
        for record in self.keys.values() {
            let derived = record.public_key()?.key_id();
            if derived != record.key_id {
                return Err(CoterieError::KeySet {
                    reason: format!(
                        "key id {} does not match its material (derived {derived})",
                        record.key_id
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Generates the key pairs of a fresh group.
///
/// Returns `(full, public)` sets: the full set (admin + publish seeds)
/// stays in the locally persisted meta; the public set ships on the
/// wire. The admin key id of the full set is the new group's id.
pub fn generate_group_keys(with_publish: bool) -> (KeySet, KeySet) {
    let mut full = KeySet::new();
    let mut public = KeySet::new();

    let admin = Keypair::generate();
    full.insert(KeyRecord {
        key_id: admin.key_id(),
        distribution: KeyDistribution::Admin,
        material: KeyMaterial::Full,
        bytes: admin.seed_bytes().to_vec(),
    });
    public.insert(KeyRecord {
        key_id: admin.key_id(),
        distribution: KeyDistribution::Admin,
        material: KeyMaterial::PublicOnly,
        bytes: admin.public_key().as_bytes().to_vec(),
    });

    if with_publish {
        let publish = Keypair::generate();
        full.insert(KeyRecord {
            key_id: publish.key_id(),
            distribution: KeyDistribution::PublishPrivate,
            material: KeyMaterial::Full,
            bytes: publish.seed_bytes().to_vec(),
        });
        public.insert(KeyRecord {
            key_id: publish.key_id(),
            distribution: KeyDistribution::PublishPublic,
            material: KeyMaterial::PublicOnly,
            bytes: publish.public_key().as_bytes().to_vec(),
        });
    }

    (full, public)
}

// ---------------------------------------------------------------------------
// SignatureRole / SignatureSet
// ---------------------------------------------------------------------------

/// Role of a signature attached to a group or message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum SignatureRole {
    /// Admin signature over a group, made with the group's admin key.
    Admin,
    /// Author (identity) signature, made with an identity-service key.
    Identity,
    /// Publish signature over a message, made with the group's
    /// publish key.
    Publish,
}

/// The signature set of a group or message: role → signature.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignatureSet {
    /// Signatures keyed by role.
    pub signatures: BTreeMap<SignatureRole, Signature>,
}

impl SignatureSet {
    /// Creates an empty signature set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the signature for `role`.
    pub fn insert(&mut self, role: SignatureRole, sig: Signature) {
        self.signatures.insert(role, sig);
    }

    /// Returns the signature for `role`, if present.
    pub fn get(&self, role: SignatureRole) -> Option<&Signature> {
        self.signatures.get(&role)
    }

    /// Returns true if no signatures are attached.
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
