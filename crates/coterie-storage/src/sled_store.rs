//! Sled-backed store.
//!
//! Two trees: `groups` keyed by the 16-byte group id, and `messages`
//! keyed by `group_id || msg_id` so one prefix scan yields a group's
//! messages. Values are CBOR-encoded stored records. Atomicity is
//! per-call, which is all the exchange requires.

use std::collections::BTreeMap;
use std::path::Path;

use coterie_protocol::{GroupMeta, MessageMeta};
use coterie_types::{CoterieError, GroupId, MessageId, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::change::{apply_group_values, apply_message_values, GroupMetaChange, MessageMetaChange};
use crate::{DataStore, MessageReq, StoredGroup, StoredMessage};

/// Default per-item payload size limit (1 MiB).
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024;

const GROUPS_TREE: &str = "groups";
const MESSAGES_TREE: &str = "messages";

/// On-disk [`DataStore`] backed by sled.
pub struct SledStore {
    groups: sled::Tree,
    messages: sled::Tree,
    max_item_size: usize,
}

fn storage_err(e: impl std::fmt::Display) -> CoterieError {
    CoterieError::Storage {
        reason: e.to_string(),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(storage_err)?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(storage_err)
}

fn message_key(group_id: &GroupId, msg_id: &MessageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(GroupId::LEN + MessageId::LEN);
    key.extend_from_slice(group_id.as_ref());
    key.extend_from_slice(msg_id.as_ref());
    key
}

impl SledStore {
    /// Opens (or creates) the store at `path` with the default size
    /// limit.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_max_item_size(path, DEFAULT_MAX_ITEM_SIZE)
    }

    /// Opens (or creates) the store with a custom per-item size limit.
    pub fn open_with_max_item_size(path: &Path, max_item_size: usize) -> Result<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        let groups = db.open_tree(GROUPS_TREE).map_err(storage_err)?;
        let messages = db.open_tree(MESSAGES_TREE).map_err(storage_err)?;
        tracing::debug!(path = %path.display(), "sled store opened");
        Ok(Self {
            groups,
            messages,
            max_item_size,
        })
    }

    fn load_group(&self, id: &GroupId) -> Result<Option<StoredGroup>> {
        match self.groups.get(id.as_ref()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn group_messages(&self, group_id: &GroupId) -> Result<Vec<StoredMessage>> {
        let mut out = Vec::new();
        for entry in self.messages.scan_prefix(group_id.as_ref()) {
            let (_, value) = entry.map_err(storage_err)?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }
}

impl DataStore for SledStore {
    fn retrieve_group_meta(&self, ids: &[GroupId]) -> Result<BTreeMap<GroupId, GroupMeta>> {
        let mut out = BTreeMap::new();
        if ids.is_empty() {
            for entry in self.groups.iter() {
                let (_, value) = entry.map_err(storage_err)?;
                let group: StoredGroup = decode(&value)?;
                out.insert(group.meta.group_id, group.meta);
            }
        } else {
            for id in ids {
                if let Some(group) = self.load_group(id)? {
                    out.insert(*id, group.meta);
                }
            }
        }
        Ok(out)
    }

    fn retrieve_message_meta(
        &self,
        req: &MessageReq,
    ) -> Result<BTreeMap<GroupId, Vec<MessageMeta>>> {
        let data = self.retrieve_message_data(req)?;
        Ok(data
            .into_iter()
            .map(|(gid, msgs)| (gid, msgs.into_iter().map(|m| m.meta).collect()))
            .collect())
    }

    fn retrieve_group_ids(&self) -> Result<Vec<GroupId>> {
        let mut out = Vec::new();
        for entry in self.groups.iter() {
            let (key, _) = entry.map_err(storage_err)?;
            if key.len() == GroupId::LEN {
                let mut arr = [0u8; GroupId::LEN];
                arr.copy_from_slice(&key);
                out.push(GroupId::new(arr));
            }
        }
        Ok(out)
    }

    fn retrieve_message_ids(&self, group_id: &GroupId) -> Result<Vec<MessageId>> {
        let mut out = Vec::new();
        for entry in self.messages.scan_prefix(group_id.as_ref()) {
            let (key, _) = entry.map_err(storage_err)?;
            if key.len() == GroupId::LEN + MessageId::LEN {
                let mut arr = [0u8; MessageId::LEN];
                arr.copy_from_slice(&key[GroupId::LEN..]);
                out.push(MessageId::new(arr));
            }
        }
        Ok(out)
    }

    fn retrieve_group_data(&self, ids: &[GroupId]) -> Result<Vec<StoredGroup>> {
        if ids.is_empty() {
            let mut out = Vec::new();
            for entry in self.groups.iter() {
                let (_, value) = entry.map_err(storage_err)?;
                out.push(decode(&value)?);
            }
            return Ok(out);
        }
        let mut out = Vec::new();
        for id in ids {
            if let Some(group) = self.load_group(id)? {
                out.push(group);
            }
        }
        Ok(out)
    }

    fn retrieve_message_data(
        &self,
        req: &MessageReq,
    ) -> Result<BTreeMap<GroupId, Vec<StoredMessage>>> {
        let mut out = BTreeMap::new();
        for (group_id, msg_ids) in req {
            let msgs = if msg_ids.is_empty() {
                self.group_messages(group_id)?
            } else {
                let mut selected = Vec::new();
                for msg_id in msg_ids {
                    let key = message_key(group_id, msg_id);
                    if let Some(bytes) = self.messages.get(&key).map_err(storage_err)? {
                        selected.push(decode(&bytes)?);
                    }
                }
                selected
            };
            out.insert(*group_id, msgs);
        }
        Ok(out)
    }

    fn store_groups(&self, groups: Vec<StoredGroup>) -> Result<()> {
        for group in groups {
            let bytes = encode(&group)?;
            self.groups
                .insert(group.meta.group_id.as_ref(), bytes)
                .map_err(storage_err)?;
        }
        self.groups.flush().map_err(storage_err)?;
        Ok(())
    }

    fn store_messages(&self, msgs: Vec<StoredMessage>) -> Result<()> {
        for msg in msgs {
            let key = message_key(&msg.meta.group_id, &msg.meta.msg_id);
            let bytes = encode(&msg)?;
            self.messages.insert(key, bytes).map_err(storage_err)?;
        }
        self.messages.flush().map_err(storage_err)?;
        Ok(())
    }

    fn update_groups(&self, groups: Vec<StoredGroup>) -> Result<()> {
        for group in &groups {
            if self
                .groups
                .get(group.meta.group_id.as_ref())
                .map_err(storage_err)?
                .is_none()
            {
                return Err(CoterieError::Storage {
                    reason: format!("cannot update unknown group {}", group.meta.group_id),
                });
            }
        }
        self.store_groups(groups)
    }

    fn update_group_meta(&self, change: &GroupMetaChange) -> Result<()> {
        let mut group = self
            .load_group(&change.group_id)?
            .ok_or_else(|| CoterieError::Storage {
                reason: format!("no group {} for meta change", change.group_id),
            })?;
        apply_group_values(&mut group.meta, &change.values)?;
        self.store_groups(vec![group])
    }

    fn update_message_meta(&self, change: &MessageMetaChange) -> Result<()> {
        let (group_id, msg_id) = change.msg_id;
        let key = message_key(&group_id, &msg_id);
        let bytes = self
            .messages
            .get(&key)
            .map_err(storage_err)?
            .ok_or_else(|| CoterieError::Storage {
                reason: format!("no message {msg_id} in group {group_id} for meta change"),
            })?;
        let mut msg: StoredMessage = decode(&bytes)?;
        apply_message_values(&mut msg.meta, &change.values)?;
        self.store_messages(vec![msg])
    }

    fn remove_groups(&self, ids: &[GroupId]) -> Result<()> {
        for id in ids {
            self.groups.remove(id.as_ref()).map_err(storage_err)?;
            let keys: Vec<_> = self
                .messages
                .scan_prefix(id.as_ref())
                .keys()
                .collect::<std::result::Result<_, _>>()
                .map_err(storage_err)?;
            for key in keys {
                self.messages.remove(key).map_err(storage_err)?;
            }
        }
        self.groups.flush().map_err(storage_err)?;
        self.messages.flush().map_err(storage_err)?;
        Ok(())
    }

    fn remove_messages(&self, req: &MessageReq) -> Result<()> {
        for (group_id, msg_ids) in req {
            for msg_id in msg_ids {
                self.messages
                    .remove(message_key(group_id, msg_id))
                    .map_err(storage_err)?;
            }
        }
        self.messages.flush().map_err(storage_err)?;
        Ok(())
    }

    fn valid_size(&self, len: usize) -> bool {
        len <= self.max_item_size
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, SledStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SledStore::open(dir.path()).expect("open sled store");
        (dir, store)
    }

    fn group(id: u8) -> StoredGroup {
        StoredGroup {
            payload: vec![id],
            meta: GroupMeta {
                group_id: GroupId::new([id; 16]),
                ..GroupMeta::default()
            },
        }
    }

    fn message(group: u8, id: u8) -> StoredMessage {
        StoredMessage {
            payload: vec![id],
            meta: MessageMeta {
                group_id: GroupId::new([group; 16]),
                msg_id: MessageId::new([id; 32]),
                ..MessageMeta::default()
            },
        }
    }

    #[test]
    fn groups_roundtrip() -> Result<()> {
        let (_dir, store) = open_temp();
        store.store_groups(vec![group(1), group(2)])?;

        let ids = store.retrieve_group_ids()?;
        assert_eq!(ids.len(), 2);

        let data = store.retrieve_group_data(&[GroupId::new([1; 16])])?;
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].payload, vec![1]);
        Ok(())
    }

    #[test]
    fn messages_scoped_by_group_prefix() -> Result<()> {
        let (_dir, store) = open_temp();
        store.store_messages(vec![message(1, 10), message(1, 11), message(2, 20)])?;

        let gid = GroupId::new([1; 16]);
        let ids = store.retrieve_message_ids(&gid)?;
        assert_eq!(ids.len(), 2);

        let mut req = MessageReq::new();
        req.insert(gid, vec![MessageId::new([10; 32])]);
        let data = store.retrieve_message_data(&req)?;
        assert_eq!(data[&gid].len(), 1);
        Ok(())
    }

    #[test]
    fn remove_groups_removes_their_messages() -> Result<()> {
        let (_dir, store) = open_temp();
        store.store_groups(vec![group(1)])?;
        store.store_messages(vec![message(1, 10)])?;

        store.remove_groups(&[GroupId::new([1; 16])])?;
        assert!(store.retrieve_group_ids()?.is_empty());
        assert!(store
            .retrieve_message_ids(&GroupId::new([1; 16]))?
            .is_empty());
        Ok(())
    }

    #[test]
    fn meta_change_persists() -> Result<()> {
        let (_dir, store) = open_temp();
        store.store_groups(vec![group(3)])?;

        let mut values = coterie_protocol::ContentValues::new();
        values.put_int(coterie_protocol::meta_keys::GRP_META_STATUS, 0x7);
        store.update_group_meta(&GroupMetaChange {
            group_id: GroupId::new([3; 16]),
            values,
        })?;

        let metas = store.retrieve_group_meta(&[GroupId::new([3; 16])])?;
        assert_eq!(metas[&GroupId::new([3; 16])].group_status, 0x7);
        Ok(())
    }

    #[test]
    fn update_unknown_group_rejected() {
        let (_dir, store) = open_temp();
        assert!(store.update_groups(vec![group(9)]).is_err());
    }
}
