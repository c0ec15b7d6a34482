//! Over-the-wire envelopes for groups and messages.
//!
//! A raw item pairs the opaque service payload with a serialized meta
//! blob and the id of the peer that delivered it. The meta blob is the
//! CBOR encoding of the *wire projection* of the meta record: wire
//! fields plus signatures, public key halves only, no local state.
//!
//! The signatures inside the blob do not cover the blob itself — they
//! cover `payload || signing document` (see [`crate::canonical`]).
//! Receivers decode the blob, rebuild the canonical document, and
//! verify against that.

use coterie_types::flags::CircleType;
use coterie_types::{
    CircleId, CoterieError, GroupId, IdentityId, MessageId, PeerId, Result, Timestamp,
};
use serde::{Deserialize, Serialize};

use crate::keys::{KeySet, SignatureSet};
use crate::meta::{GroupMeta, MessageMeta};

// ---------------------------------------------------------------------------
// RawGroup / RawMessage
// ---------------------------------------------------------------------------

/// A group as delivered by the network layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawGroup {
    /// Group id, duplicated outside the meta blob so receivers can
    /// deduplicate before decoding.
    pub group_id: GroupId,
    /// Opaque service payload.
    pub payload: Vec<u8>,
    /// CBOR-encoded wire meta (see [`encode_group_meta`]).
    pub meta: Vec<u8>,
    /// Peer that delivered this group.
    pub sender: PeerId,
}

/// A message as delivered by the network layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Group the message claims to belong to.
    pub group_id: GroupId,
    /// Message id, duplicated outside the meta blob for deduplication.
    pub msg_id: MessageId,
    /// Opaque service payload.
    pub payload: Vec<u8>,
    /// CBOR-encoded wire meta (see [`encode_message_meta`]).
    pub meta: Vec<u8>,
    /// Peer that delivered this message.
    pub sender: PeerId,
}

// ---------------------------------------------------------------------------
// Wire projections
// ---------------------------------------------------------------------------

/// Wire shape of a group meta. Private struct — the public API is the
/// encode/decode pair below.
#[derive(Serialize, Deserialize)]
struct GroupWireMeta {
    group_id: GroupId,
    author: Option<IdentityId>,
    group_flags: u32,
    publish_ts: Timestamp,
    parent_group: Option<GroupId>,
    circle_type: CircleType,
    circle_id: Option<CircleId>,
    store_period_secs: Option<i64>,
    keys: KeySet,
    signatures: SignatureSet,
}

/// Wire shape of a message meta.
#[derive(Serialize, Deserialize)]
struct MessageWireMeta {
    group_id: GroupId,
    msg_id: MessageId,
    parent_msg_id: Option<MessageId>,
    orig_msg_id: Option<MessageId>,
    author: Option<IdentityId>,
    publish_ts: Timestamp,
    signatures: SignatureSet,
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| CoterieError::Protocol {
        reason: format!("wire encoding failed: {e}"),
    })?;
    Ok(buf)
}

fn from_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CoterieError::Protocol {
        reason: format!("wire decoding failed: {e}"),
    })
}

/// Encodes the wire meta blob of a group.
///
/// Projects the key set to public halves; local fields are dropped.
///
/// # Errors
///
/// Returns [`CoterieError::Protocol`] on encoding failure.
pub fn encode_group_meta(meta: &GroupMeta) -> Result<Vec<u8>> {
    let wire = GroupWireMeta {
        group_id: meta.group_id,
        author: meta.author,
        group_flags: meta.group_flags,
        publish_ts: meta.publish_ts,
        parent_group: meta.parent_group,
        circle_type: meta.circle_type,
        circle_id: meta.circle_id,
        store_period_secs: meta.store_period_secs,
        keys: meta.keys.public_half()?,
        signatures: meta.signatures.clone(),
    };
    to_cbor(&wire)
}

/// Decodes a group wire meta blob into a [`GroupMeta`] with local
/// fields defaulted.
///
/// The embedded key set is structurally validated on the way in; a
/// malformed set (duplicate publish-private keys, id/material
/// mismatches) rejects the whole blob.
///
/// # Errors
///
/// Returns [`CoterieError::Protocol`] on decode failure or
/// [`CoterieError::KeySet`] for an invalid key set.
pub fn decode_group_meta(bytes: &[u8]) -> Result<GroupMeta> {
    let wire: GroupWireMeta = from_cbor(bytes)?;
    wire.keys.validate()?;
    Ok(GroupMeta {
        group_id: wire.group_id,
        author: wire.author,
        group_flags: wire.group_flags,
        publish_ts: wire.publish_ts,
        parent_group: wire.parent_group,
        circle_type: wire.circle_type,
        circle_id: wire.circle_id,
        store_period_secs: wire.store_period_secs,
        keys: wire.keys,
        signatures: wire.signatures,
        ..GroupMeta::default()
    })
}

/// Encodes the wire meta blob of a message.
///
/// # Errors
///
/// Returns [`CoterieError::Protocol`] on encoding failure.
pub fn encode_message_meta(meta: &MessageMeta) -> Result<Vec<u8>> {
    let wire = MessageWireMeta {
        group_id: meta.group_id,
        msg_id: meta.msg_id,
        parent_msg_id: meta.parent_msg_id,
        orig_msg_id: meta.orig_msg_id,
        author: meta.author,
        publish_ts: meta.publish_ts,
        signatures: meta.signatures.clone(),
    };
    to_cbor(&wire)
}

/// Decodes a message wire meta blob into a [`MessageMeta`] with local
/// fields defaulted.
///
/// # Errors
///
/// Returns [`CoterieError::Protocol`] on decode failure.
pub fn decode_message_meta(bytes: &[u8]) -> Result<MessageMeta> {
    let wire: MessageWireMeta = from_cbor(bytes)?;
    Ok(MessageMeta {
        group_id: wire.group_id,
        msg_id: wire.msg_id,
        parent_msg_id: wire.parent_msg_id,
        orig_msg_id: wire.orig_msg_id,
        author: wire.author,
        publish_ts: wire.publish_ts,
        signatures: wire.signatures,
        ..MessageMeta::default()
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
