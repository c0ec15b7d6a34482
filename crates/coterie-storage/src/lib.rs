//! Data store contract and backends for the Coterie exchange.
//!
//! The exchange engine talks to persistence exclusively through the
//! [`DataStore`] trait — per-call atomicity, internally thread-safe.
//! Two backends are provided: [`MemoryStore`] for tests and embedded
//! use, and [`SledStore`] for on-disk persistence.

pub mod change;
pub mod memory;
pub mod sled_store;

use std::collections::BTreeMap;

use coterie_protocol::{GroupMeta, MessageMeta};
use coterie_types::{GroupId, MessageId, Result};
use serde::{Deserialize, Serialize};

pub use change::{GroupMetaChange, MessageMetaChange};
pub use memory::MemoryStore;
pub use sled_store::SledStore;

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// A group as persisted: payload plus full meta (private keys
/// included for locally authored groups).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredGroup {
    /// Opaque service payload.
    pub payload: Vec<u8>,
    /// Full group meta, local fields included.
    pub meta: GroupMeta,
}

/// A message as persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Opaque service payload.
    pub payload: Vec<u8>,
    /// Full message meta, local fields included.
    pub meta: MessageMeta,
}

/// A batch message request: group id → message ids. An empty id list
/// selects every message of the group.
pub type MessageReq = BTreeMap<GroupId, Vec<MessageId>>;

// ---------------------------------------------------------------------------
// DataStore
// ---------------------------------------------------------------------------

/// Persistence contract consumed by the exchange engine.
///
/// Implementations must be internally thread-safe; atomicity is
/// per-call. Batch calls are the "long" operations the engine performs
/// with its own lock released.
pub trait DataStore: Send + Sync {
    /// Fetches metas for the given groups; an empty slice fetches all.
    fn retrieve_group_meta(&self, ids: &[GroupId]) -> Result<BTreeMap<GroupId, GroupMeta>>;

    /// Fetches message metas per the request map.
    fn retrieve_message_meta(&self, req: &MessageReq) -> Result<BTreeMap<GroupId, Vec<MessageMeta>>>;

    /// Lists all stored group ids.
    fn retrieve_group_ids(&self) -> Result<Vec<GroupId>>;

    /// Lists the message ids stored for a group.
    fn retrieve_message_ids(&self, group_id: &GroupId) -> Result<Vec<MessageId>>;

    /// Fetches full group records; an empty slice fetches all.
    fn retrieve_group_data(&self, ids: &[GroupId]) -> Result<Vec<StoredGroup>>;

    /// Fetches full message records per the request map.
    fn retrieve_message_data(&self, req: &MessageReq)
        -> Result<BTreeMap<GroupId, Vec<StoredMessage>>>;

    /// Inserts new groups.
    fn store_groups(&self, groups: Vec<StoredGroup>) -> Result<()>;

    /// Inserts new messages.
    fn store_messages(&self, msgs: Vec<StoredMessage>) -> Result<()>;

    /// Replaces existing groups (accepted updates).
    fn update_groups(&self, groups: Vec<StoredGroup>) -> Result<()>;

    /// Applies a group meta change. The mask arithmetic has already
    /// been resolved by the caller; the bag holds plain values.
    fn update_group_meta(&self, change: &GroupMetaChange) -> Result<()>;

    /// Applies a message meta change.
    fn update_message_meta(&self, change: &MessageMetaChange) -> Result<()>;

    /// Removes groups and all their messages.
    fn remove_groups(&self, ids: &[GroupId]) -> Result<()>;

    /// Removes the messages named in the request map.
    fn remove_messages(&self, req: &MessageReq) -> Result<()>;

    /// Returns true if a payload of `len` bytes fits the per-item
    /// storage limit.
    fn valid_size(&self, len: usize) -> bool;
}
