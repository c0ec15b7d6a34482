//! In-memory store backend.
//!
//! Backs the exchange in tests and in embedders that persist
//! elsewhere. All mutations are protected by `std::sync::Mutex`; no
//! `unsafe`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use coterie_types::{CoterieError, GroupId, MessageId, Result};

use crate::change::{apply_group_values, apply_message_values, GroupMetaChange, MessageMetaChange};
use crate::{DataStore, MessageReq, StoredGroup, StoredMessage};

use coterie_protocol::{GroupMeta, MessageMeta};

/// Default per-item payload size limit (1 MiB), matching the sled
/// backend.
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024;

struct Inner {
    groups: BTreeMap<GroupId, StoredGroup>,
    messages: BTreeMap<GroupId, BTreeMap<MessageId, StoredMessage>>,
}

/// Thread-safe in-memory [`DataStore`] implementation.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    max_item_size: usize,
}

impl MemoryStore {
    /// Creates an empty store with the default size limit.
    pub fn new() -> Self {
        Self::with_max_item_size(DEFAULT_MAX_ITEM_SIZE)
    }

    /// Creates an empty store with a custom per-item size limit.
    pub fn with_max_item_size(max_item_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                groups: BTreeMap::new(),
                messages: BTreeMap::new(),
            }),
            max_item_size,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| CoterieError::Storage {
            reason: "memory store lock poisoned".into(),
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for MemoryStore {
    fn retrieve_group_meta(&self, ids: &[GroupId]) -> Result<BTreeMap<GroupId, GroupMeta>> {
        let inner = self.lock()?;
        let mut out = BTreeMap::new();
        if ids.is_empty() {
            for (id, group) in &inner.groups {
                out.insert(*id, group.meta.clone());
            }
        } else {
            for id in ids {
                if let Some(group) = inner.groups.get(id) {
                    out.insert(*id, group.meta.clone());
                }
            }
        }
        Ok(out)
    }

    fn retrieve_message_meta(
        &self,
        req: &MessageReq,
    ) -> Result<BTreeMap<GroupId, Vec<MessageMeta>>> {
        let inner = self.lock()?;
        let mut out = BTreeMap::new();
        for (group_id, msg_ids) in req {
            let Some(msgs) = inner.messages.get(group_id) else {
                continue;
            };
            let metas: Vec<MessageMeta> = if msg_ids.is_empty() {
                msgs.values().map(|m| m.meta.clone()).collect()
            } else {
                msg_ids
                    .iter()
                    .filter_map(|id| msgs.get(id).map(|m| m.meta.clone()))
                    .collect()
            };
            out.insert(*group_id, metas);
        }
        Ok(out)
    }

    fn retrieve_group_ids(&self) -> Result<Vec<GroupId>> {
        Ok(self.lock()?.groups.keys().copied().collect())
    }

    fn retrieve_message_ids(&self, group_id: &GroupId) -> Result<Vec<MessageId>> {
        let inner = self.lock()?;
        Ok(inner
            .messages
            .get(group_id)
            .map(|msgs| msgs.keys().copied().collect())
            .unwrap_or_default())
    }

    fn retrieve_group_data(&self, ids: &[GroupId]) -> Result<Vec<StoredGroup>> {
        let inner = self.lock()?;
        if ids.is_empty() {
            return Ok(inner.groups.values().cloned().collect());
        }
        Ok(ids
            .iter()
            .filter_map(|id| inner.groups.get(id).cloned())
            .collect())
    }

    fn retrieve_message_data(
        &self,
        req: &MessageReq,
    ) -> Result<BTreeMap<GroupId, Vec<StoredMessage>>> {
        let inner = self.lock()?;
        let mut out = BTreeMap::new();
        for (group_id, msg_ids) in req {
            let Some(msgs) = inner.messages.get(group_id) else {
                continue;
            };
            let data: Vec<StoredMessage> = if msg_ids.is_empty() {
                msgs.values().cloned().collect()
            } else {
                msg_ids
                    .iter()
                    .filter_map(|id| msgs.get(id).cloned())
                    .collect()
            };
            out.insert(*group_id, data);
        }
        Ok(out)
    }

    fn store_groups(&self, groups: Vec<StoredGroup>) -> Result<()> {
        let mut inner = self.lock()?;
        for group in groups {
            inner.groups.insert(group.meta.group_id, group);
        }
        Ok(())
    }

    fn store_messages(&self, msgs: Vec<StoredMessage>) -> Result<()> {
        let mut inner = self.lock()?;
        for msg in msgs {
            inner
                .messages
                .entry(msg.meta.group_id)
                .or_default()
                .insert(msg.meta.msg_id, msg);
        }
        Ok(())
    }

    fn update_groups(&self, groups: Vec<StoredGroup>) -> Result<()> {
        let mut inner = self.lock()?;
        for group in groups {
            if !inner.groups.contains_key(&group.meta.group_id) {
                return Err(CoterieError::Storage {
                    reason: format!("cannot update unknown group {}", group.meta.group_id),
                });
            }
            inner.groups.insert(group.meta.group_id, group);
        }
        Ok(())
    }

    fn update_group_meta(&self, change: &GroupMetaChange) -> Result<()> {
        let mut inner = self.lock()?;
        let group = inner
            .groups
            .get_mut(&change.group_id)
            .ok_or_else(|| CoterieError::Storage {
                reason: format!("no group {} for meta change", change.group_id),
            })?;
        apply_group_values(&mut group.meta, &change.values)
    }

    fn update_message_meta(&self, change: &MessageMetaChange) -> Result<()> {
        let mut inner = self.lock()?;
        let (group_id, msg_id) = change.msg_id;
        let msg = inner
            .messages
            .get_mut(&group_id)
            .and_then(|msgs| msgs.get_mut(&msg_id))
            .ok_or_else(|| CoterieError::Storage {
                reason: format!("no message {msg_id} in group {group_id} for meta change"),
            })?;
        apply_message_values(&mut msg.meta, &change.values)
    }

    fn remove_groups(&self, ids: &[GroupId]) -> Result<()> {
        let mut inner = self.lock()?;
        for id in ids {
            inner.groups.remove(id);
            inner.messages.remove(id);
        }
        Ok(())
    }

    fn remove_messages(&self, req: &MessageReq) -> Result<()> {
        let mut inner = self.lock()?;
        for (group_id, msg_ids) in req {
            if let Some(msgs) = inner.messages.get_mut(group_id) {
                for id in msg_ids {
                    msgs.remove(id);
                }
            }
        }
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
    use coterie_protocol::meta_keys;

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
    fn store_and_retrieve_groups() -> Result<()> {
        let store = MemoryStore::new();
        store.store_groups(vec![group(1), group(2)])?;

        assert_eq!(store.retrieve_group_ids()?.len(), 2);
        let metas = store.retrieve_group_meta(&[GroupId::new([1; 16])])?;
        assert_eq!(metas.len(), 1);
        assert_eq!(store.retrieve_group_meta(&[])?.len(), 2);
        Ok(())
    }

    #[test]
    fn store_and_retrieve_messages() -> Result<()> {
        let store = MemoryStore::new();
        store.store_messages(vec![message(1, 10), message(1, 11), message(2, 12)])?;

        let gid = GroupId::new([1; 16]);
        assert_eq!(store.retrieve_message_ids(&gid)?.len(), 2);

        let mut req = MessageReq::new();
        req.insert(gid, vec![]);
        let metas = store.retrieve_message_meta(&req)?;
        assert_eq!(metas[&gid].len(), 2);
        Ok(())
    }

    #[test]
    fn update_rejects_unknown_group() {
        let store = MemoryStore::new();
        assert!(store.update_groups(vec![group(1)]).is_err());
    }

    #[test]
    fn group_meta_change_applied() -> Result<()> {
        let store = MemoryStore::new();
        store.store_groups(vec![group(1)])?;

        let mut values = coterie_protocol::ContentValues::new();
        values.put_int(meta_keys::GRP_META_STATUS, 0x42);
        store.update_group_meta(&GroupMetaChange {
            group_id: GroupId::new([1; 16]),
            values,
        })?;

        let metas = store.retrieve_group_meta(&[GroupId::new([1; 16])])?;
        assert_eq!(metas[&GroupId::new([1; 16])].group_status, 0x42);
        Ok(())
    }

    #[test]
    fn remove_groups_drops_messages_too() -> Result<()> {
        let store = MemoryStore::new();
        store.store_groups(vec![group(1)])?;
        store.store_messages(vec![message(1, 10)])?;

        store.remove_groups(&[GroupId::new([1; 16])])?;
        assert!(store.retrieve_group_ids()?.is_empty());
        assert!(store.retrieve_message_ids(&GroupId::new([1; 16]))?.is_empty());
        Ok(())
    }

    #[test]
    fn remove_selected_messages() -> Result<()> {
        let store = MemoryStore::new();
        store.store_messages(vec![message(1, 10), message(1, 11)])?;

        let gid = GroupId::new([1; 16]);
        let mut req = MessageReq::new();
        req.insert(gid, vec![MessageId::new([10; 32])]);
        store.remove_messages(&req)?;

        assert_eq!(store.retrieve_message_ids(&gid)?, vec![MessageId::new([11; 32])]);
        Ok(())
    }

    #[test]
    fn size_limit_enforced() {
        let store = MemoryStore::with_max_item_size(8);
        assert!(store.valid_size(8));
        assert!(!store.valid_size(9));
    }
}
