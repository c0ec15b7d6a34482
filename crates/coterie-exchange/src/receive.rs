//! Reception pipeline: deserialize, validate, deduplicate, and store
//! incoming groups and messages.
//!
//! Items arrive through `notify_new_groups` / `notify_new_messages`
//! and wait in one queue per item kind; fresh arrivals and try-later
//! retries share that queue, so intake dedup has a single place to
//! look for both groups and messages. Validation that needs an
//! external author key returns `TryLater`; such items are retried up
//! to the configured attempt cap and then dropped. Batch store calls
//! run with the engine lock released, operating on snapshots.

use std::collections::BTreeSet;
use std::mem;

use coterie_crypto::content_hash;
use coterie_protocol::{
    decode_group_meta, decode_message_meta, group_signing_doc, message_signing_doc, GroupMeta,
    KeyMaterial, MessageMeta, RawGroup, RawMessage,
};
use coterie_storage::{StoredGroup, StoredMessage};
use coterie_types::flags::{group_status, msg_status, subscribe, CircleType};
use coterie_types::{GroupId, KeyId, MessageId, PeerId, Timestamp};

use crate::engine::Exchange;
use crate::notify::{ChangeReason, MessageChangeMap, Notification};
use crate::signer::SignOutcome;

// ---------------------------------------------------------------------------
// Pending records
// ---------------------------------------------------------------------------

/// A received item awaiting (re-)validation.
pub(crate) struct PendingValidation<T> {
    pub item: T,
    pub attempts: u32,
    pub first_seen: Timestamp,
}

/// A received group whose id already exists in the store: a candidate
/// new version, validated against the stored copy.
pub(crate) struct GroupUpdate {
    pub payload: Vec<u8>,
    pub meta: GroupMeta,
    pub sender: PeerId,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

impl Exchange {
    /// Tick phase: validate and store received groups; route known
    /// ids into the update-validation queue.
    pub(crate) fn process_received_groups(&self) {
        let work = mem::take(&mut self.lock_state().received_groups);
        if work.is_empty() {
            return;
        }

        let existing: BTreeSet<GroupId> = match self.store.retrieve_group_ids() {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                tracing::warn!(%e, "group id scan failed, retrying received groups next tick");
                let mut state = self.lock_state();
                let mut requeued = work;
                requeued.extend(state.received_groups.drain(..));
                state.received_groups = requeued;
                return;
            }
        };

        let now = Timestamp::now();
        let mut retained = Vec::new();
        let mut to_store = Vec::new();
        let mut new_ids = Vec::new();
        let mut updates = Vec::new();

        for mut pending in work {
            let raw = &pending.item;
            let mut meta = match decode_group_meta(&raw.meta) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::debug!(group = %raw.group_id, %e, "dropping undecodable group");
                    continue;
                }
            };
            if meta.group_id != raw.group_id {
                tracing::debug!(group = %raw.group_id, "dropping group with mismatched envelope id");
                continue;
            }

            let doc = match group_signing_doc(&meta) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::debug!(group = %raw.group_id, %e, "dropping group with bad key set");
                    continue;
                }
            };
            let mut signed = raw.payload.clone();
            signed.extend_from_slice(&doc);

            match self.authority.validate_group(&signed, &meta, raw.sender) {
                SignOutcome::Fail => {
                    tracing::debug!(group = %raw.group_id, "dropping group failing validation");
                }
                SignOutcome::TryLater => {
                    pending.attempts += 1;
                    if pending.attempts >= self.config.max_validate_attempts {
                        tracing::debug!(group = %raw.group_id, since = %pending.first_seen,
                            "validate attempts exhausted, dropping group");
                    } else {
                        retained.push(pending);
                    }
                }
                SignOutcome::Success => {
                    meta.group_status = group_status::UNPROCESSED | group_status::UNREAD;
                    meta.subscribe_flags = subscribe::NOT_SUBSCRIBED;
                    meta.content_hash = content_hash(&raw.payload);

                    if existing.contains(&meta.group_id) {
                        updates.push(GroupUpdate {
                            payload: pending.item.payload,
                            meta,
                            sender: pending.item.sender,
                        });
                    } else {
                        meta.recv_ts = now;
                        if meta.circle_type == CircleType::YourEyesOnly {
                            meta.originator = Some(pending.item.sender);
                        }
                        new_ids.push(meta.group_id);
                        to_store.push(StoredGroup {
                            payload: pending.item.payload,
                            meta,
                        });
                    }
                }
            }
        }

        let stored_ok = if to_store.is_empty() {
            true
        } else {
            match self.store.store_groups(to_store) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(%e, "storing received groups failed");
                    false
                }
            }
        };

        let mut state = self.lock_state();
        let mut requeued = retained;
        requeued.extend(state.received_groups.drain(..));
        state.received_groups = requeued;
        state.group_updates.extend(updates);
        if stored_ok && !new_ids.is_empty() {
            tracing::info!(count = new_ids.len(), "new groups received");
            state.notifications.push(Notification::Groups {
                reason: ChangeReason::Receive,
                meta_only: false,
                group_ids: new_ids,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Tick phase: validate and store received messages.
    ///
    /// The group metas backing validation are fetched in one coalesced
    /// store call; before storing, the surviving batch is filtered
    /// against ids already present and against the publication test
    /// `status & KEEP != 0 || publish_ts + store_period >= now`.
    pub(crate) fn process_received_messages(&self) {
        let work = mem::take(&mut self.lock_state().received_msgs);
        if work.is_empty() {
            return;
        }

        // Decode metas up front; undecodable items drop here.
        struct Candidate {
            raw: RawMessage,
            meta: MessageMeta,
            attempts: u32,
            first_seen: Timestamp,
        }
        let mut candidates = Vec::new();
        for pending in work {
            match decode_message_meta(&pending.item.meta) {
                Ok(meta) => candidates.push(Candidate {
                    raw: pending.item,
                    meta,
                    attempts: pending.attempts,
                    first_seen: pending.first_seen,
                }),
                Err(e) => {
                    tracing::debug!(msg = %pending.item.msg_id, %e,
                        "dropping undecodable message");
                }
            }
        }
        if candidates.is_empty() {
            return;
        }

        // Coalesce the group meta retrieval into one store call.
        let group_ids: Vec<GroupId> = candidates
            .iter()
            .map(|c| c.raw.group_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let group_metas = match self.store.retrieve_group_meta(&group_ids) {
            Ok(metas) => metas,
            Err(e) => {
                tracing::warn!(%e, "group meta fetch failed, retrying messages next tick");
                let mut state = self.lock_state();
                let mut requeued: Vec<PendingValidation<RawMessage>> = candidates
                    .into_iter()
                    .map(|c| PendingValidation {
                        item: c.raw,
                        attempts: c.attempts,
                        first_seen: c.first_seen,
                    })
                    .collect();
                requeued.extend(state.received_msgs.drain(..));
                state.received_msgs = requeued;
                return;
            }
        };

        let now = Timestamp::now();
        let mut seen: BTreeSet<(GroupId, MessageId)> = BTreeSet::new();
        let mut retained = Vec::new();
        let mut batch: Vec<StoredMessage> = Vec::new();

        for mut candidate in candidates {
            let key = (candidate.raw.group_id, candidate.raw.msg_id);
            if !seen.insert(key) {
                tracing::debug!(msg = %candidate.raw.msg_id, "dropping in-batch duplicate");
                continue;
            }
            let Some(group_meta) = group_metas.get(&candidate.raw.group_id) else {
                tracing::debug!(msg = %candidate.raw.msg_id, group = %candidate.raw.group_id,
                    "dropping message for unknown group");
                continue;
            };
            if candidate.meta.group_id != candidate.raw.group_id
                || candidate.meta.msg_id != candidate.raw.msg_id
            {
                tracing::debug!(msg = %candidate.raw.msg_id,
                    "dropping message with mismatched envelope ids");
                continue;
            }

            let doc = match message_signing_doc(&candidate.meta) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::debug!(msg = %candidate.raw.msg_id, %e,
                        "dropping message with unencodable meta");
                    continue;
                }
            };
            let mut signed = candidate.raw.payload.clone();
            signed.extend_from_slice(&doc);

            match self.authority.validate_message(
                &signed,
                &candidate.raw.payload,
                &doc,
                &candidate.meta,
                group_meta,
                candidate.raw.sender,
            ) {
                SignOutcome::Fail => {
                    tracing::debug!(msg = %candidate.raw.msg_id,
                        "dropping message failing validation");
                }
                SignOutcome::TryLater => {
                    candidate.attempts += 1;
                    if candidate.attempts >= self.config.max_validate_attempts {
                        tracing::debug!(msg = %candidate.raw.msg_id, since = %candidate.first_seen,
                            "validate attempts exhausted, dropping message");
                    } else {
                        retained.push(PendingValidation {
                            item: candidate.raw,
                            attempts: candidate.attempts,
                            first_seen: candidate.first_seen,
                        });
                    }
                }
                SignOutcome::Success => {
                    let mut meta = candidate.meta;
                    meta.msg_status = msg_status::UNPROCESSED | msg_status::UNREAD;
                    meta.recv_ts = now;
                    meta.content_hash = content_hash(&candidate.raw.payload);
                    batch.push(StoredMessage {
                        payload: candidate.raw.payload,
                        meta,
                    });
                }
            }
        }

        // Pre-store filter: drop ids already present and entries
        // failing the publication test.
        let mut notify = MessageChangeMap::new();
        let mut filtered: Vec<StoredMessage> = Vec::new();
        let mut id_cache: std::collections::BTreeMap<GroupId, BTreeSet<MessageId>> =
            Default::default();
        for msg in batch {
            let group_id = msg.meta.group_id;
            let existing = match id_cache.entry(group_id) {
                std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::btree_map::Entry::Vacant(slot) => {
                    match self.store.retrieve_message_ids(&group_id) {
                        Ok(ids) => slot.insert(ids.into_iter().collect()),
                        Err(e) => {
                            tracing::warn!(%group_id, %e, "message id scan failed, dropping batch entry");
                            continue;
                        }
                    }
                }
            };
            if existing.contains(&msg.meta.msg_id) {
                tracing::debug!(msg = %msg.meta.msg_id, "message already stored, dropping");
                continue;
            }
            let period = group_metas
                .get(&group_id)
                .map(|g| g.store_period(self.config.message_store_period_secs))
                .unwrap_or(self.config.message_store_period_secs);
            let keep = msg.meta.msg_status & msg_status::KEEP != 0
                || msg.meta.publish_ts.plus_secs(period) >= now;
            if !keep {
                tracing::debug!(msg = %msg.meta.msg_id, "message fails the publication test, dropping");
                continue;
            }
            notify
                .entry(group_id)
                .or_default()
                .push(msg.meta.msg_id);
            filtered.push(msg);
        }

        let stored_ok = if filtered.is_empty() {
            false
        } else {
            match self.store.store_messages(filtered) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(%e, "storing received messages failed");
                    false
                }
            }
        };

        let mut state = self.lock_state();
        // Older retries stay ahead of anything delivered during this
        // phase.
        let mut requeued = retained;
        requeued.extend(state.received_msgs.drain(..));
        state.received_msgs = requeued;
        if stored_ok && !notify.is_empty() {
            tracing::info!(groups = notify.len(), "new messages received");
            state.notifications.push(Notification::Messages {
                reason: ChangeReason::Receive,
                meta_only: false,
                msgs: notify,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Update validation
    // -----------------------------------------------------------------------

    /// Tick phase: validate queued group updates against the stored
    /// copies and replace the valid ones.
    ///
    /// A new version is valid iff it carries an admin signature that
    /// verifies under the *stored* admin key and is strictly newer
    /// than the stored version. Private key material and local state
    /// of the stored copy are preserved across the replacement.
    pub(crate) fn perform_update_validation(&self) {
        let updates = mem::take(&mut self.lock_state().group_updates);
        if updates.is_empty() {
            return;
        }

        let ids: Vec<GroupId> = updates.iter().map(|u| u.meta.group_id).collect();
        let stored_metas = match self.store.retrieve_group_meta(&ids) {
            Ok(metas) => metas,
            Err(e) => {
                tracing::warn!(%e, "group meta fetch for update validation failed");
                return;
            }
        };

        let now = Timestamp::now();
        let mut to_update = Vec::new();
        let mut updated_ids = Vec::new();

        for update in updates {
            let group_id = update.meta.group_id;
            let Some(old) = stored_metas.get(&group_id) else {
                tracing::debug!(%group_id, "stored group vanished before update validation");
                continue;
            };
            if !update_valid(old, &update) {
                tracing::debug!(%group_id, "dropping invalid group update");
                continue;
            }

            let mut meta = update.meta;
            if meta.circle_type == CircleType::YourEyesOnly {
                meta.originator = Some(update.sender);
            }
            // Preserve private halves held locally: wire keys win, but
            // any full record of the stored copy overrides its public
            // counterpart.
            for record in old.keys.keys.values() {
                if record.material == KeyMaterial::Full {
                    meta.keys.insert(record.clone());
                }
            }
            // Local state survives the version bump.
            meta.subscribe_flags = old.subscribe_flags;
            meta.service_string = old.service_string.clone();
            meta.reputation_cutoff = old.reputation_cutoff;
            meta.recv_ts = now;

            updated_ids.push(group_id);
            to_update.push(StoredGroup {
                payload: update.payload,
                meta,
            });
        }

        if to_update.is_empty() {
            return;
        }
        match self.store.update_groups(to_update) {
            Ok(()) => {
                tracing::info!(count = updated_ids.len(), "group updates applied");
                self.lock_state().notifications.push(Notification::Groups {
                    reason: ChangeReason::Receive,
                    meta_only: false,
                    group_ids: updated_ids,
                });
            }
            Err(e) => tracing::error!(%e, "storing group updates failed"),
        }
    }
}

/// A new version is accepted iff it carries an admin signature that
/// verifies under the stored admin key and its publish timestamp is
/// strictly newer.
fn update_valid(old: &GroupMeta, update: &GroupUpdate) -> bool {
    use coterie_protocol::SignatureRole;

    let Some(sig) = update.meta.signatures.get(SignatureRole::Admin) else {
        return false;
    };
    // The stored admin key is looked up by id — the admin key id IS
    // the group id.
    let Some(admin) = old.keys.keys.get(&KeyId::from(old.group_id)) else {
        return false;
    };
    let Ok(public) = admin.public_key() else {
        return false;
    };
    let Ok(doc) = group_signing_doc(&update.meta) else {
        return false;
    };
    let mut signed = update.payload.clone();
    signed.extend_from_slice(&doc);

    coterie_crypto::verify(&public, &signed, sig).is_ok()
        && update.meta.publish_ts > old.publish_ts
}
