//! Publication pipeline: serialize, sign, hash, and store locally
//! authored groups and messages.
//!
//! Group publication is bounded by wall time (a pending entry older
//! than the configured timeout fails); message publication is bounded
//! by a signing attempt count. Both retry only on `TryLater` — a
//! missing external author key — with the pending item held
//! exclusively by the engine until it is stored or dropped.

use std::collections::BTreeMap;
use std::mem;

use coterie_crypto::content_hash;
use coterie_protocol::{
    generate_group_keys, group_signing_doc, message_signing_doc, GroupMeta, KeySet, MessageMeta,
    SignatureRole,
};
use coterie_storage::{StoredGroup, StoredMessage};
use coterie_types::flags::{msg_status, subscribe};
use coterie_types::{GroupId, MessageId, Timestamp, Token};

use crate::engine::Exchange;
use crate::notify::{ChangeReason, MessageChangeMap, Notification};
use crate::service::ServiceCreate;
use crate::signer::SignOutcome;

// ---------------------------------------------------------------------------
// Drafts and pending records
// ---------------------------------------------------------------------------

/// A group as submitted by the local service: opaque payload plus a
/// meta template. The engine assigns the group id, key set, subscribe
/// flags, timestamps, and signatures.
#[derive(Clone, Debug)]
pub struct GroupDraft {
    /// Opaque service payload.
    pub payload: Vec<u8>,
    /// Meta template (flags, author, circle, storage period).
    pub meta: GroupMeta,
}

/// A message as submitted by the local service. The engine assigns
/// the message id, timestamps, status, and signatures.
#[derive(Clone, Debug)]
pub struct MessageDraft {
    /// Opaque service payload.
    pub payload: Vec<u8>,
    /// Meta template (group id, parent, orig for re-publications,
    /// author).
    pub meta: MessageMeta,
}

/// A group awaiting sign+publish, with its minted or re-used keys.
pub(crate) struct PendingGroupSign {
    pub draft: GroupDraft,
    pub token: Token,
    /// `(full, public)` key sets; `None` until first processed.
    pub keys: Option<(KeySet, KeySet)>,
    pub start_ts: Timestamp,
    pub is_update: bool,
}

/// A message whose signing returned `TryLater`.
pub(crate) struct PendingMessageSign {
    pub draft: MessageDraft,
    pub attempts: u32,
}

enum GroupPublishStep {
    Done(GroupId),
    Fail,
    TryLater,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

impl Exchange {
    /// Tick phase: publish queued groups (first-time and updates).
    pub(crate) fn publish_groups(&self) {
        let queue = mem::take(&mut self.lock_state().groups_to_publish);
        if queue.is_empty() {
            return;
        }

        let mut retained = Vec::new();
        let mut published = Vec::new();

        for mut entry in queue {
            let now = Timestamp::now();
            if now.secs_since(entry.start_ts) > self.config.pending_sign_timeout_secs {
                tracing::warn!(token = %entry.token, "group publication timed out");
                self.finish_token(entry.token, false);
                continue;
            }

            match self.sign_and_store_group(&mut entry, now) {
                GroupPublishStep::Done(group_id) => {
                    tracing::info!(token = %entry.token, %group_id, update = entry.is_update,
                        "group published");
                    if self.finish_token(entry.token, true) {
                        self.ledger.record_group_ack(entry.token, group_id);
                        published.push(group_id);
                    }
                }
                GroupPublishStep::Fail => {
                    self.finish_token(entry.token, false);
                }
                GroupPublishStep::TryLater => retained.push(entry),
            }
        }

        let mut state = self.lock_state();
        // Older entries stay ahead of anything queued during this
        // phase.
        retained.extend(state.groups_to_publish.drain(..));
        state.groups_to_publish = retained;
        if !published.is_empty() {
            state.notifications.push(Notification::Groups {
                reason: ChangeReason::Publish,
                meta_only: false,
                group_ids: published,
            });
        }
    }

    /// One signing attempt for a pending group.
    fn sign_and_store_group(&self, entry: &mut PendingGroupSign, now: Timestamp) -> GroupPublishStep {
        let (full, public) = match &entry.keys {
            Some(pair) => pair.clone(),
            None => {
                let pair = generate_group_keys(true);
                entry.keys = Some(pair.clone());
                pair
            }
        };

        let (admin_keypair, admin_key_id) = {
            let Some(admin) = full.admin_full() else {
                tracing::warn!(token = %entry.token, "key set lacks a full admin key");
                return GroupPublishStep::Fail;
            };
            match admin.keypair() {
                Ok(keypair) => (keypair, admin.key_id),
                Err(e) => {
                    tracing::warn!(token = %entry.token, %e, "admin key unusable");
                    return GroupPublishStep::Fail;
                }
            }
        };

        // The group id is the admin key id, minted or re-used.
        let group_id = GroupId::from(admin_key_id);
        entry.draft.meta.group_id = group_id;

        match self.service.create_group(&mut entry.draft, &full) {
            ServiceCreate::Success => {}
            ServiceCreate::Fail => {
                tracing::warn!(token = %entry.token, "service rejected group creation");
                return GroupPublishStep::Fail;
            }
            ServiceCreate::FailTryLater => return GroupPublishStep::TryLater,
        }

        let meta = &mut entry.draft.meta;
        meta.publish_ts = now;
        meta.subscribe_flags = subscribe::ADMIN | subscribe::PUBLISH | subscribe::SUBSCRIBED;
        // Only public halves enter the signing document and the wire.
        meta.keys = public;

        let doc = match group_signing_doc(meta) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(token = %entry.token, %e, "cannot build group signing document");
                return GroupPublishStep::Fail;
            }
        };
        let mut signed = entry.draft.payload.clone();
        signed.extend_from_slice(&doc);

        meta.signatures
            .insert(SignatureRole::Admin, admin_keypair.sign(&signed));
        let author = meta.author;
        match self
            .authority
            .create_group_signatures(&signed, author, &mut meta.signatures)
        {
            SignOutcome::Success => {}
            SignOutcome::Fail => return GroupPublishStep::Fail,
            SignOutcome::TryLater => return GroupPublishStep::TryLater,
        }

        if !self.store.valid_size(entry.draft.payload.len()) {
            tracing::warn!(token = %entry.token, "group payload exceeds the store size limit");
            return GroupPublishStep::Fail;
        }

        meta.content_hash = content_hash(&entry.draft.payload);
        meta.recv_ts = now;
        // The persisted copy keeps the private halves.
        meta.keys = full;

        let stored = StoredGroup {
            payload: entry.draft.payload.clone(),
            meta: entry.draft.meta.clone(),
        };
        let result = if entry.is_update {
            self.store.update_groups(vec![stored])
        } else {
            self.store.store_groups(vec![stored])
        };
        match result {
            Ok(()) => GroupPublishStep::Done(group_id),
            Err(e) => {
                tracing::error!(token = %entry.token, %group_id, %e, "storing group failed");
                GroupPublishStep::Fail
            }
        }
    }

    /// Tick phase: publish queued messages, reinjecting entries that
    /// wait on a signature.
    pub(crate) fn publish_messages(&self) {
        let (work, pending) = {
            let mut state = self.lock_state();
            (
                mem::take(&mut state.msgs_to_publish),
                mem::take(&mut state.msgs_pending_sign),
            )
        };
        if work.is_empty() && pending.is_empty() {
            return;
        }

        let mut attempts: BTreeMap<Token, u32> = BTreeMap::new();
        let mut combined: Vec<(Token, MessageDraft)> = Vec::new();
        for (token, entry) in pending {
            attempts.insert(token, entry.attempts);
            combined.push((token, entry.draft));
        }
        combined.extend(work);

        let now = Timestamp::now();
        let mut new_pending: BTreeMap<Token, PendingMessageSign> = BTreeMap::new();
        let mut to_store: Vec<StoredMessage> = Vec::new();
        let mut stored_ids: Vec<(Token, GroupId, MessageId)> = Vec::new();

        for (token, mut draft) in combined {
            let group_id = draft.meta.group_id;
            let group_meta = match self.store.retrieve_group_meta(&[group_id]) {
                Ok(mut metas) => metas.remove(&group_id),
                Err(e) => {
                    tracing::warn!(%token, %group_id, %e, "group meta fetch failed");
                    None
                }
            };
            let Some(group_meta) = group_meta else {
                tracing::warn!(%token, %group_id, "cannot publish into unknown group");
                self.finish_token(token, false);
                continue;
            };

            draft.meta.publish_ts = now;
            let doc = match message_signing_doc(&draft.meta) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(%token, %e, "cannot build message signing document");
                    self.finish_token(token, false);
                    continue;
                }
            };
            let msg_id = coterie_crypto::message_id(&draft.payload, &doc);
            draft.meta.msg_id = msg_id;

            let mut signed = draft.payload.clone();
            signed.extend_from_slice(&doc);

            let mut sigs = mem::take(&mut draft.meta.signatures);
            let outcome =
                self.authority
                    .create_message_signatures(&signed, &draft.meta, &group_meta, &mut sigs);
            draft.meta.signatures = sigs;

            match outcome {
                SignOutcome::TryLater => {
                    let made = attempts.get(&token).copied().unwrap_or(0) + 1;
                    if made >= self.config.max_sign_attempts {
                        tracing::warn!(%token, attempts = made, "message sign attempts exhausted");
                        self.finish_token(token, false);
                    } else {
                        new_pending.insert(token, PendingMessageSign { draft, attempts: made });
                    }
                }
                SignOutcome::Fail => {
                    self.finish_token(token, false);
                }
                SignOutcome::Success => {
                    if !self.store.valid_size(draft.payload.len()) {
                        tracing::warn!(%token, "message payload exceeds the store size limit");
                        self.finish_token(token, false);
                        continue;
                    }
                    let meta = &mut draft.meta;
                    meta.orig_msg_id = Some(meta.orig_msg_id.unwrap_or(msg_id));
                    meta.msg_status = msg_status::UNPROCESSED | msg_status::UNREAD;
                    meta.recv_ts = now;
                    meta.content_hash = content_hash(&draft.payload);

                    to_store.push(StoredMessage {
                        payload: draft.payload,
                        meta: draft.meta,
                    });
                    stored_ids.push((token, group_id, msg_id));
                }
            }
        }

        let mut change_map = MessageChangeMap::new();
        if !to_store.is_empty() {
            match self.store.store_messages(to_store) {
                Ok(()) => {
                    for (token, group_id, msg_id) in stored_ids {
                        tracing::info!(%token, %group_id, %msg_id, "message published");
                        if self.finish_token(token, true) {
                            self.ledger.record_msg_ack(token, (group_id, msg_id));
                            change_map.entry(group_id).or_default().push(msg_id);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(%e, "storing published messages failed");
                    for (token, ..) in stored_ids {
                        self.finish_token(token, false);
                    }
                }
            }
        }

        let mut state = self.lock_state();
        state.msgs_pending_sign = new_pending;
        if !change_map.is_empty() {
            state.notifications.push(Notification::Messages {
                reason: ChangeReason::Publish,
                meta_only: false,
                msgs: change_map,
            });
        }
    }

    /// Tick phase: turn queued group-update requests into pending
    /// sign entries re-using the stored private keys.
    pub(crate) fn process_group_update_requests(&self) {
        let updates = mem::take(&mut self.lock_state().group_updates_to_publish);
        if updates.is_empty() {
            return;
        }

        let ids: Vec<GroupId> = updates.iter().map(|(_, draft)| draft.meta.group_id).collect();
        let metas = match self.store.retrieve_group_meta(&ids) {
            Ok(metas) => metas,
            Err(e) => {
                tracing::warn!(%e, "group meta fetch for updates failed");
                for (token, _) in updates {
                    self.finish_token(token, false);
                }
                return;
            }
        };

        let now = Timestamp::now();
        let mut to_sign = Vec::new();
        for (token, draft) in updates {
            let group_id = draft.meta.group_id;
            match metas.get(&group_id) {
                None => {
                    tracing::warn!(%token, %group_id, "cannot update unknown group");
                    self.finish_token(token, false);
                }
                Some(old) if !old.keys.has_private_admin_and_publish() => {
                    tracing::warn!(%token, %group_id, "missing private keys for group update");
                    self.finish_token(token, false);
                }
                Some(old) => match old.keys.public_half() {
                    Ok(public) => to_sign.push(PendingGroupSign {
                        draft,
                        token,
                        keys: Some((old.keys.clone(), public)),
                        start_ts: now,
                        is_update: true,
                    }),
                    Err(e) => {
                        tracing::warn!(%token, %group_id, %e, "stored key set unusable");
                        self.finish_token(token, false);
                    }
                },
            }
        }

        self.lock_state().groups_to_publish.extend(to_sign);
    }

    /// Tick phase: execute queued group deletions.
    pub(crate) fn process_group_deletes(&self) {
        let deletes = mem::take(&mut self.lock_state().group_deletes);
        if deletes.is_empty() {
            return;
        }

        let mut deleted = Vec::new();
        for (token, group_id) in deletes {
            match self.store.remove_groups(&[group_id]) {
                Ok(()) => {
                    tracing::info!(%token, %group_id, "group deleted");
                    if self.finish_token(token, true) {
                        self.ledger.record_group_ack(token, group_id);
                        deleted.push(group_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(%token, %group_id, %e, "group delete failed");
                    self.finish_token(token, false);
                }
            }
        }

        if !deleted.is_empty() {
            self.lock_state().notifications.push(Notification::Groups {
                reason: ChangeReason::Publish,
                meta_only: false,
                group_ids: deleted,
            });
        }
    }
}
