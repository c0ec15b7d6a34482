//! Signature authority: computes and verifies the signature sets of
//! groups and messages under the engine's authentication policy.
//!
//! Each sub-signature (admin, publish, identity) produces an outcome;
//! the aggregate is `Fail` if any sub failed, else `TryLater` if any
//! sub must wait for an external key, else `Success`. A publish
//! signature that the policy does not require counts as `Success`.
//!
//! All signing and verification happens over `payload || signing
//! document` — see `coterie_protocol::canonical`.

use std::sync::Arc;

use coterie_crypto::verify;
use coterie_protocol::{GroupMeta, MessageMeta, SignatureRole, SignatureSet};
use coterie_types::policy::{grp_authen, msg_authen, AuthenPolicy, PolicySlot};
use coterie_types::{IdentityId, KeyId, PeerId};

use crate::identity::IdentityService;

// ---------------------------------------------------------------------------
// SignOutcome
// ---------------------------------------------------------------------------

/// Outcome of a signing or validation pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignOutcome {
    /// All required signatures were produced / verified.
    Success,
    /// A signature is definitively wrong or unproducible.
    Fail,
    /// An external key is missing; it has been requested, retry later.
    TryLater,
}

impl SignOutcome {
    /// Aggregates two sub-outcomes: `Fail` dominates, then `TryLater`.
    pub fn combine(self, other: SignOutcome) -> SignOutcome {
        match (self, other) {
            (SignOutcome::Fail, _) | (_, SignOutcome::Fail) => SignOutcome::Fail,
            (SignOutcome::TryLater, _) | (_, SignOutcome::TryLater) => SignOutcome::TryLater,
            _ => SignOutcome::Success,
        }
    }
}

// ---------------------------------------------------------------------------
// SignatureAuthority
// ---------------------------------------------------------------------------

/// Resolves signature requirements and executes them against the key
/// material at hand.
pub(crate) struct SignatureAuthority {
    policy: AuthenPolicy,
    identity: Option<Arc<dyn IdentityService>>,
}

impl SignatureAuthority {
    pub fn new(policy: AuthenPolicy, identity: Option<Arc<dyn IdentityService>>) -> Self {
        Self { policy, identity }
    }

    /// Policy flags applicable to a message: `(author_flag,
    /// publish_flag)`, child variants for replies.
    fn message_flags(meta: &MessageMeta) -> (u8, u8) {
        if meta.is_child() {
            (
                msg_authen::CHILD_AUTHOR_SIGN,
                msg_authen::CHILD_PUBLISH_SIGN,
            )
        } else {
            (msg_authen::ROOT_AUTHOR_SIGN, msg_authen::ROOT_PUBLISH_SIGN)
        }
    }

    // -- signing ------------------------------------------------------------

    /// Produces the identity signature when one is needed.
    fn sign_identity(
        &self,
        signed: &[u8],
        author: Option<IdentityId>,
        required_by_policy: bool,
        sigs: &mut SignatureSet,
    ) -> SignOutcome {
        if author.is_none() && !required_by_policy {
            return SignOutcome::Success;
        }

        let Some(identity) = &self.identity else {
            tracing::warn!("identity signing required but no identity service registered");
            return SignOutcome::Fail;
        };
        let Some(author) = author else {
            tracing::warn!("policy requires an author signature but no author is set");
            return SignOutcome::Fail;
        };

        if !identity.has_private_key(&author) {
            tracing::debug!(%author, "author key not cached, requesting");
            identity.request_private_key(&author);
            return SignOutcome::TryLater;
        }

        match identity.private_key(&author) {
            Some(keypair) => {
                sigs.insert(SignatureRole::Identity, keypair.sign(signed));
                SignOutcome::Success
            }
            None => {
                tracing::warn!(%author, "identity service lost the author key mid-sign");
                SignOutcome::Fail
            }
        }
    }

    /// Produces the identity signature of a group, per the options
    /// policy slot.
    pub fn create_group_signatures(
        &self,
        signed: &[u8],
        author: Option<IdentityId>,
        sigs: &mut SignatureSet,
    ) -> SignOutcome {
        let required = self.policy.requires(PolicySlot::Options, grp_authen::AUTHOR_SIGN);
        self.sign_identity(signed, author, required, sigs)
    }

    /// Produces the publish and identity signatures of a message, per
    /// the policy slot of the group's privacy class.
    pub fn create_message_signatures(
        &self,
        signed: &[u8],
        meta: &MessageMeta,
        group: &GroupMeta,
        sigs: &mut SignatureSet,
    ) -> SignOutcome {
        let slot = PolicySlot::from(group.privacy_class());
        let (author_flag, publish_flag) = Self::message_flags(meta);

        let publish_outcome = if self.policy.requires(slot, publish_flag) {
            match group.keys.publish_private() {
                Some(record) => match record.keypair() {
                    Ok(keypair) => {
                        sigs.insert(SignatureRole::Publish, keypair.sign(signed));
                        SignOutcome::Success
                    }
                    Err(e) => {
                        tracing::warn!(group = %group.group_id, %e, "publish key unusable");
                        SignOutcome::Fail
                    }
                },
                None => {
                    tracing::warn!(
                        group = %group.group_id,
                        "no private publish key for message signing"
                    );
                    SignOutcome::Fail
                }
            }
        } else {
            SignOutcome::Success
        };

        let identity_outcome = self.sign_identity(
            signed,
            meta.author,
            self.policy.requires(slot, author_flag),
            sigs,
        );

        publish_outcome.combine(identity_outcome)
    }

    // -- verification -------------------------------------------------------

    /// Verifies the identity signature when one is required.
    ///
    /// `TryLater` is produced only here: a missing author public key
    /// is requested from the delivering peer and retried.
    fn verify_identity(
        &self,
        signed: &[u8],
        author: Option<IdentityId>,
        required_by_policy: bool,
        sigs: &SignatureSet,
        sender: PeerId,
    ) -> SignOutcome {
        if author.is_none() && !required_by_policy {
            return SignOutcome::Success;
        }

        let Some(identity) = &self.identity else {
            tracing::debug!("identity validation required but service disabled");
            return SignOutcome::Fail;
        };
        let Some(author) = author else {
            tracing::debug!("policy requires an author signature but item carries no author");
            return SignOutcome::Fail;
        };

        if !identity.has_key(&author) {
            identity.request_key(&author, &[sender]);
            return SignOutcome::TryLater;
        }

        let Some(public) = identity.key(&author) else {
            tracing::warn!(%author, "cannot retrieve cached author key");
            return SignOutcome::Fail;
        };
        let Some(sig) = sigs.get(SignatureRole::Identity) else {
            tracing::debug!(%author, "required identity signature missing");
            return SignOutcome::Fail;
        };

        match verify(&public, signed, sig) {
            Ok(()) => SignOutcome::Success,
            Err(_) => SignOutcome::Fail,
        }
    }

    /// Validates a received group: admin signature under the key set
    /// the group itself carries, plus the identity signature when
    /// required.
    pub fn validate_group(&self, signed: &[u8], meta: &GroupMeta, sender: PeerId) -> SignOutcome {
        let admin_outcome = 'admin: {
            let Some(sig) = meta.signatures.get(SignatureRole::Admin) else {
                tracing::debug!(group = %meta.group_id, "group carries no admin signature");
                break 'admin SignOutcome::Fail;
            };
            let Some(admin) = meta.keys.admin() else {
                tracing::debug!(group = %meta.group_id, "group carries no admin key");
                break 'admin SignOutcome::Fail;
            };
            // The admin key id IS the group id; a mismatch is a forgery.
            if admin.key_id != KeyId::from(meta.group_id) {
                tracing::debug!(group = %meta.group_id, "admin key id does not match group id");
                break 'admin SignOutcome::Fail;
            }
            match admin.public_key() {
                Ok(public) => match verify(&public, signed, sig) {
                    Ok(()) => SignOutcome::Success,
                    Err(_) => SignOutcome::Fail,
                },
                Err(_) => SignOutcome::Fail,
            }
        };

        let required = self.policy.requires(PolicySlot::Options, grp_authen::AUTHOR_SIGN);
        admin_outcome.combine(self.verify_identity(
            signed,
            meta.author,
            required,
            &meta.signatures,
            sender,
        ))
    }

    /// Validates a received message against its group's flags and
    /// keys: message-id integrity, publish signature, identity
    /// signature.
    pub fn validate_message(
        &self,
        signed: &[u8],
        payload: &[u8],
        doc: &[u8],
        meta: &MessageMeta,
        group: &GroupMeta,
        sender: PeerId,
    ) -> SignOutcome {
        // The id is the hash of the signed buffer; a mismatch means
        // the meta was tampered with after signing.
        if coterie_crypto::message_id(payload, doc) != meta.msg_id {
            tracing::debug!(msg = %meta.msg_id, "message id does not match signed content");
            return SignOutcome::Fail;
        }

        let slot = PolicySlot::from(group.privacy_class());
        let (author_flag, publish_flag) = Self::message_flags(meta);

        let publish_outcome = if self.policy.requires(slot, publish_flag) {
            let Some(record) = group.keys.publish_public() else {
                tracing::debug!(group = %group.group_id, "no publish key in group key set");
                return SignOutcome::Fail;
            };
            let Some(sig) = meta.signatures.get(SignatureRole::Publish) else {
                tracing::debug!(msg = %meta.msg_id, "required publish signature missing");
                return SignOutcome::Fail;
            };
            match record.public_key() {
                Ok(public) => match verify(&public, signed, sig) {
                    Ok(()) => SignOutcome::Success,
                    Err(_) => SignOutcome::Fail,
                },
                Err(_) => SignOutcome::Fail,
            }
        } else {
            SignOutcome::Success
        };

        let identity_outcome = self.verify_identity(
            signed,
            meta.author,
            self.policy.requires(slot, author_flag),
            &meta.signatures,
            sender,
        );

        publish_outcome.combine(identity_outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use coterie_crypto::Keypair;
    use coterie_protocol::{generate_group_keys, group_signing_doc, message_signing_doc};
    use coterie_types::flags::group_flags;
    use coterie_types::{GroupId, Timestamp};

    fn authority(policy: AuthenPolicy) -> SignatureAuthority {
        SignatureAuthority::new(policy, None)
    }

    fn signed_group() -> (Vec<u8>, GroupMeta) {
        let (full, public) = generate_group_keys(true);
        let admin = full.admin_full().expect("admin key");
        let admin_kp = admin.keypair().expect("admin keypair");

        let mut meta = GroupMeta {
            group_id: GroupId::from(admin.key_id),
            publish_ts: Timestamp::from_secs(1_000),
            keys: public,
            ..GroupMeta::default()
        };

        let payload = b"group payload".to_vec();
        let doc = group_signing_doc(&meta).expect("doc");
        let mut signed = payload;
        signed.extend_from_slice(&doc);
        meta.signatures
            .insert(SignatureRole::Admin, admin_kp.sign(&signed));
        (signed, meta)
    }

    #[test]
    fn combine_prefers_fail_over_try_later() {
        assert_eq!(
            SignOutcome::TryLater.combine(SignOutcome::Fail),
            SignOutcome::Fail
        );
        assert_eq!(
            SignOutcome::Success.combine(SignOutcome::TryLater),
            SignOutcome::TryLater
        );
        assert_eq!(
            SignOutcome::Success.combine(SignOutcome::Success),
            SignOutcome::Success
        );
    }

    #[test]
    fn group_with_valid_admin_sig_validates() {
        let (signed, meta) = signed_group();
        let auth = authority(AuthenPolicy::default());
        assert_eq!(
            auth.validate_group(&signed, &meta, PeerId::new([0; 32])),
            SignOutcome::Success
        );
    }

    #[test]
    fn group_without_admin_sig_fails() {
        let (signed, mut meta) = signed_group();
        meta.signatures = SignatureSet::new();
        let auth = authority(AuthenPolicy::default());
        assert_eq!(
            auth.validate_group(&signed, &meta, PeerId::new([0; 32])),
            SignOutcome::Fail
        );
    }

    #[test]
    fn group_with_foreign_admin_key_fails() {
        let (signed, mut meta) = signed_group();
        // Re-sign with an unrelated key whose id does not match the
        // group id.
        let imposter = Keypair::generate();
        meta.signatures
            .insert(SignatureRole::Admin, imposter.sign(&signed));
        let auth = authority(AuthenPolicy::default());
        assert_eq!(
            auth.validate_group(&signed, &meta, PeerId::new([0; 32])),
            SignOutcome::Fail
        );
    }

    #[test]
    fn identity_sign_without_service_fails() {
        let auth = authority(AuthenPolicy::default());
        let mut sigs = SignatureSet::new();
        let outcome = auth.sign_identity(
            b"doc",
            Some(coterie_types::IdentityId::new([1; 16])),
            false,
            &mut sigs,
        );
        assert_eq!(outcome, SignOutcome::Fail);
    }

    #[test]
    fn unrequired_identity_sign_succeeds_vacuously() {
        let auth = authority(AuthenPolicy::default());
        let mut sigs = SignatureSet::new();
        assert_eq!(
            auth.sign_identity(b"doc", None, false, &mut sigs),
            SignOutcome::Success
        );
        assert!(sigs.is_empty());
    }

    #[test]
    fn message_publish_sign_and_validate_roundtrip() {
        let policy = AuthenPolicy::default()
            .with_slot(PolicySlot::Public, msg_authen::ROOT_PUBLISH_SIGN);
        let auth = authority(policy);

        let (full, _) = generate_group_keys(true);
        let admin_id = full.admin_full().expect("admin").key_id;
        let group = GroupMeta {
            group_id: GroupId::from(admin_id),
            group_flags: group_flags::PRIVACY_PUBLIC,
            keys: full,
            ..GroupMeta::default()
        };

        let mut meta = MessageMeta {
            group_id: group.group_id,
            publish_ts: Timestamp::from_secs(5),
            ..MessageMeta::default()
        };

        let payload = b"hello".to_vec();
        let doc = message_signing_doc(&meta).expect("doc");
        let mut signed = payload.clone();
        signed.extend_from_slice(&doc);

        let mut sigs = SignatureSet::new();
        assert_eq!(
            auth.create_message_signatures(&signed, &meta, &group, &mut sigs),
            SignOutcome::Success
        );
        meta.signatures = sigs;
        meta.msg_id = coterie_crypto::message_id(&payload, &doc);

        assert_eq!(
            auth.validate_message(&signed, &payload, &doc, &meta, &group, PeerId::new([0; 32])),
            SignOutcome::Success
        );
    }

    #[test]
    fn message_with_tampered_id_fails_validation() {
        let auth = authority(AuthenPolicy::default());
        let (full, _) = generate_group_keys(true);
        let group = GroupMeta {
            keys: full,
            ..GroupMeta::default()
        };
        let meta = MessageMeta {
            msg_id: coterie_types::MessageId::new([9; 32]),
            ..MessageMeta::default()
        };

        let payload = b"payload".to_vec();
        let doc = message_signing_doc(&meta).expect("doc");
        let mut signed = payload.clone();
        signed.extend_from_slice(&doc);

        assert_eq!(
            auth.validate_message(&signed, &payload, &doc, &meta, &group, PeerId::new([0; 32])),
            SignOutcome::Fail
        );
    }

    #[test]
    fn missing_publish_key_fails_signing() {
        let policy = AuthenPolicy::default()
            .with_slot(PolicySlot::Public, msg_authen::ROOT_PUBLISH_SIGN);
        let auth = authority(policy);

        // Public halves only: no private publish key to sign with.
        let (_, public_only) = generate_group_keys(true);
        let group = GroupMeta {
            keys: public_only,
            ..GroupMeta::default()
        };
        let meta = MessageMeta::default();

        let mut sigs = SignatureSet::new();
        assert_eq!(
            auth.create_message_signatures(b"signed", &meta, &group, &mut sigs),
            SignOutcome::Fail
        );
    }
}
