//! Group and message metadata records.
//!
//! Each record mixes wire fields (signed, shipped to peers) with local
//! fields (status, subscription, timestamps of arrival). The wire
//! projection is handled by [`crate::wire`]; the canonical signing
//! projection by [`crate::canonical`]. This module only defines the
//! records and their invariant helpers.

use coterie_types::flags::{CircleType, PrivacyClass};
use coterie_types::{CircleId, GroupId, IdentityId, MessageId, PeerId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::keys::{KeySet, SignatureSet};

// ---------------------------------------------------------------------------
// GroupMeta
// ---------------------------------------------------------------------------

/// Metadata of a group.
///
/// Wire fields: `group_id`, `author`, `group_flags`, `publish_ts`,
/// `parent_group`, `circle_type`, `circle_id`, `store_period_secs`,
/// `keys` (public halves), `signatures`.
///
/// Local fields, never shipped: `subscribe_flags`, `group_status`,
/// `recv_ts`, `content_hash`, `originator`, `service_string`,
/// `reputation_cutoff` — and the private halves inside `keys` when the
/// group was authored locally.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMeta {
    /// Group id; equals the admin key id.
    pub group_id: GroupId,
    /// Author identity, if the group is signed by an identity.
    pub author: Option<IdentityId>,
    /// Option flags including the privacy class bits.
    pub group_flags: u32,
    /// Publication timestamp set by the author.
    pub publish_ts: Timestamp,
    /// Parent group for hierarchies, if any.
    pub parent_group: Option<GroupId>,
    /// Visibility scope type.
    pub circle_type: CircleType,
    /// Circle id when `circle_type` references an external circle.
    pub circle_id: Option<CircleId>,
    /// Per-group override of the message storage period, in seconds.
    pub store_period_secs: Option<i64>,
    /// The group's key set: full locally for authored groups, public
    /// halves otherwise.
    pub keys: KeySet,
    /// Attached signatures.
    pub signatures: SignatureSet,

    /// Local subscription bits.
    pub subscribe_flags: u32,
    /// Local status bits.
    pub group_status: u32,
    /// When this node stored the group.
    pub recv_ts: Timestamp,
    /// SHA3-256 of the service payload.
    pub content_hash: [u8; 32],
    /// Peer that introduced a your-eyes-only group.
    pub originator: Option<PeerId>,
    /// Free-form service annotation.
    pub service_string: String,
    /// Reputation cutoff applied by the consuming service.
    pub reputation_cutoff: i32,
}

impl GroupMeta {
    /// Privacy class projected from the option flags.
    pub fn privacy_class(&self) -> PrivacyClass {
        PrivacyClass::from_group_flags(self.group_flags)
    }

    /// Effective message storage period: the group override when set,
    /// otherwise `default_secs`.
    pub fn store_period(&self, default_secs: i64) -> i64 {
        self.store_period_secs.unwrap_or(default_secs)
    }
}

// ---------------------------------------------------------------------------
// MessageMeta
// ---------------------------------------------------------------------------

/// Metadata of a message.
///
/// Wire fields: `group_id`, `msg_id`, `parent_msg_id`, `orig_msg_id`,
/// `author`, `publish_ts`, `signatures`. Local fields: `msg_status`,
/// `recv_ts`, `content_hash`, `service_string`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Group the message belongs to.
    pub group_id: GroupId,
    /// Message id: hash of `payload || canonical meta` at signing time.
    /// Null until the publication pipeline assigns it.
    pub msg_id: MessageId,
    /// Parent message for replies.
    pub parent_msg_id: Option<MessageId>,
    /// Id of the first version of this message. `None` or the own id
    /// both mean "this is the original".
    pub orig_msg_id: Option<MessageId>,
    /// Author identity, if author-signed.
    pub author: Option<IdentityId>,
    /// Publication timestamp stamped by the publication pipeline.
    pub publish_ts: Timestamp,
    /// Attached signatures.
    pub signatures: SignatureSet,

    /// Local status bits.
    pub msg_status: u32,
    /// When this node stored the message.
    pub recv_ts: Timestamp,
    /// SHA3-256 of the service payload.
    pub content_hash: [u8; 32],
    /// Free-form service annotation.
    pub service_string: String,
}

impl MessageMeta {
    /// Returns true for replies (messages with a parent).
    pub fn is_child(&self) -> bool {
        self.parent_msg_id.is_some()
    }

    /// The original-message reference as signed: `None` when this
    /// message is its own original.
    ///
    /// The publication pipeline back-fills `orig_msg_id` with the own
    /// id after signing, so the signed form must normalize the
    /// self-reference away for signatures to stay verifiable.
    pub fn signed_orig(&self) -> Option<MessageId> {
        self.orig_msg_id.filter(|orig| *orig != self.msg_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
