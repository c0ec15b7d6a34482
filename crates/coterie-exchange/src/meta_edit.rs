//! Meta-mutation processor.
//!
//! Applies queued `token → change` maps with a masked
//! read-modify-write: for a masked key the stored word is fetched,
//! `new = (cur & !mask) | (value & mask)` computed, and the store is
//! written only when `new != cur` — applying the same (value, mask)
//! twice is idempotent. Runs first in every tick so reads that follow
//! observe the mutation.

use coterie_protocol::meta_keys;
use coterie_storage::{GroupMetaChange, MessageMetaChange, MessageReq};
use coterie_types::{CoterieError, Result};

use crate::engine::Exchange;
use crate::notify::{ChangeReason, MessageChangeMap, Notification};

/// Applies the mask to a current value: keep the unmasked bits of
/// `cur`, take the masked bits of `value`.
fn masked(cur: i64, value: i64, mask: i64) -> i64 {
    (cur & !mask) | (value & mask)
}

impl Exchange {
    /// Resolves the masked keys of a group change in place. Returns
    /// true if any stored field would actually change.
    fn resolve_group_change(&self, change: &mut GroupMetaChange) -> Result<bool> {
        let mut changed = false;
        let mut needs_current = Vec::new();
        for key in [meta_keys::GRP_META_STATUS, meta_keys::GRP_META_SUBSCRIBE] {
            if change.values.get_int(key).is_some() {
                needs_current.push(key);
            }
        }

        if !needs_current.is_empty() {
            let mut metas = self.store.retrieve_group_meta(&[change.group_id])?;
            let meta = metas
                .remove(&change.group_id)
                .ok_or_else(|| CoterieError::Storage {
                    reason: format!("no stored group {} for meta change", change.group_id),
                })?;

            for key in needs_current {
                let value = change.values.get_int(key).unwrap_or_default();
                let mask_key = meta_keys::mask_key(key);
                let mask =
                    change
                        .values
                        .get_int(&mask_key)
                        .ok_or_else(|| CoterieError::Storage {
                            reason: format!("masked key {key} carries no mask"),
                        })?;
                change.values.remove(&mask_key);

                let cur = i64::from(match key {
                    meta_keys::GRP_META_STATUS => meta.group_status,
                    _ => meta.subscribe_flags,
                });
                let new = masked(cur, value, mask);
                change.values.put_int(key, new);
                changed |= new != cur;
            }
        }

        // Plain replacements always count as a change.
        changed |= change.values.get_text(meta_keys::GRP_META_SERVICE).is_some()
            || change.values.get_int(meta_keys::GRP_META_CUTOFF).is_some();

        Ok(changed)
    }

    /// Resolves the masked keys of a message change in place.
    fn resolve_message_change(&self, change: &mut MessageMetaChange) -> Result<bool> {
        let mut changed = false;
        let (group_id, msg_id) = change.msg_id;

        if change.values.get_int(meta_keys::MSG_META_STATUS).is_some() {
            let value = change
                .values
                .get_int(meta_keys::MSG_META_STATUS)
                .unwrap_or_default();
            let mask_key = meta_keys::mask_key(meta_keys::MSG_META_STATUS);
            let mask = change
                .values
                .get_int(&mask_key)
                .ok_or_else(|| CoterieError::Storage {
                    reason: "message status change carries no mask".into(),
                })?;
            change.values.remove(&mask_key);

            let mut req = MessageReq::new();
            req.insert(group_id, vec![msg_id]);
            let metas = self.store.retrieve_message_meta(&req)?;
            let meta = metas
                .get(&group_id)
                .and_then(|v| v.first())
                .ok_or_else(|| CoterieError::Storage {
                    reason: format!("no stored message {msg_id} for meta change"),
                })?;

            let cur = i64::from(meta.msg_status);
            let new = masked(cur, value, mask);
            change.values.put_int(meta_keys::MSG_META_STATUS, new);
            changed |= new != cur;
        }

        changed |= change.values.get_text(meta_keys::MSG_META_SERVICE).is_some();

        Ok(changed)
    }

    /// Tick phase 1a: apply queued group meta changes.
    pub(crate) fn process_group_meta_changes(&self) {
        let edits = std::mem::take(&mut self.lock_state().grp_meta_edits);
        if edits.is_empty() {
            return;
        }

        let mut processed = Vec::new();
        for (token, mut change) in edits {
            let group_id = change.group_id;
            let result = self.resolve_group_change(&mut change).and_then(|changed| {
                if changed {
                    self.store.update_group_meta(&change)?;
                }
                Ok(changed)
            });

            match result {
                Ok(changed) => {
                    if self.finish_token(token, true) {
                        self.ledger.record_group_ack(token, group_id);
                        if changed {
                            processed.push(group_id);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%token, %group_id, %e, "group meta change failed");
                    self.finish_token(token, false);
                }
            }
        }

        if !processed.is_empty() {
            self.lock_state().notifications.push(Notification::Groups {
                reason: ChangeReason::Processed,
                meta_only: true,
                group_ids: processed,
            });
        }
    }

    /// Tick phase 1b: apply queued message meta changes.
    pub(crate) fn process_message_meta_changes(&self) {
        let edits = std::mem::take(&mut self.lock_state().msg_meta_edits);
        if edits.is_empty() {
            return;
        }

        let mut processed = MessageChangeMap::new();
        for (token, mut change) in edits {
            let (group_id, msg_id) = change.msg_id;
            let result = self.resolve_message_change(&mut change).and_then(|changed| {
                if changed {
                    self.store.update_message_meta(&change)?;
                }
                Ok(changed)
            });

            match result {
                Ok(changed) => {
                    if self.finish_token(token, true) {
                        self.ledger.record_msg_ack(token, (group_id, msg_id));
                        if changed {
                            processed.entry(group_id).or_default().push(msg_id);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%token, %msg_id, %e, "message meta change failed");
                    self.finish_token(token, false);
                }
            }
        }

        if !processed.is_empty() {
            self.lock_state().notifications.push(Notification::Messages {
                reason: ChangeReason::Processed,
                meta_only: true,
                msgs: processed,
            });
        }
    }
}
