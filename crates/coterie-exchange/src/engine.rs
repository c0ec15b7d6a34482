//! The exchange engine: state, public API, and the tick loop.
//!
//! All internal queues live in [`EngineState`] behind one
//! `std::sync::Mutex`. Public methods lock it only long enough to
//! enqueue work; tick phases snapshot queues under the lock and
//! perform store I/O and crypto with the lock released, so consumer
//! try-lock drains never stall behind a batch store call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use coterie_protocol::{meta_keys, ContentValues, KeySet, RawGroup, RawMessage};
use coterie_storage::{DataStore, GroupMetaChange, MessageMetaChange};
use coterie_types::config::ExchangeConfig;
use coterie_types::flags::subscribe;
use coterie_types::policy::AuthenPolicy;
use coterie_types::{CoterieError, GroupId, MessageId, Result, Timestamp, Token};

use crate::housekeeping::{IntegrityCheck, MessageCleanup};
use crate::identity::IdentityService;
use crate::notify::{ChangeBuffer, ChangeSubscriber, MessageChangeMap, Notification};
use crate::publish::{GroupDraft, MessageDraft, PendingGroupSign, PendingMessageSign};
use crate::receive::{GroupUpdate, PendingValidation};
use crate::service::{ExchangeService, NullService};
use crate::signer::SignatureAuthority;
use crate::token::{TokenLedger, TokenStatus};

// ---------------------------------------------------------------------------
// EngineState
// ---------------------------------------------------------------------------

/// Everything the tick mutates, behind the engine lock.
pub(crate) struct EngineState {
    pub grp_meta_edits: BTreeMap<Token, GroupMetaChange>,
    pub msg_meta_edits: BTreeMap<Token, MessageMetaChange>,

    pub groups_to_publish: Vec<PendingGroupSign>,
    pub group_updates_to_publish: Vec<(Token, GroupDraft)>,
    pub group_deletes: Vec<(Token, GroupId)>,
    pub msgs_to_publish: Vec<(Token, MessageDraft)>,
    pub msgs_pending_sign: BTreeMap<Token, PendingMessageSign>,

    // One queue per item kind holds fresh arrivals AND try-later
    // retries, so intake dedup has exactly one place to look.
    pub received_groups: Vec<PendingValidation<RawGroup>>,
    pub received_msgs: Vec<PendingValidation<RawMessage>>,
    pub group_updates: Vec<GroupUpdate>,

    pub notifications: Vec<Notification>,

    pub cleanup: Option<MessageCleanup>,
    pub last_cleanup: Timestamp,
    pub integrity: Option<IntegrityCheck>,
    pub last_integrity: Timestamp,
}

impl EngineState {
    fn new(now: Timestamp) -> Self {
        Self {
            grp_meta_edits: BTreeMap::new(),
            msg_meta_edits: BTreeMap::new(),
            groups_to_publish: Vec::new(),
            group_updates_to_publish: Vec::new(),
            group_deletes: Vec::new(),
            msgs_to_publish: Vec::new(),
            msgs_pending_sign: BTreeMap::new(),
            received_groups: Vec::new(),
            received_msgs: Vec::new(),
            group_updates: Vec::new(),
            notifications: Vec::new(),
            cleanup: None,
            last_cleanup: now,
            integrity: None,
            last_integrity: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// The generic exchange core.
///
/// Construct with [`Exchange::new`], optionally attach an identity
/// service, service hooks, and a subscriber, then drive [`tick`]
/// (directly in tests, or via [`crate::run_exchange_loop`]).
///
/// [`tick`]: Exchange::tick
pub struct Exchange {
    pub(crate) store: Arc<dyn DataStore>,
    pub(crate) service: Arc<dyn ExchangeService>,
    subscriber: Option<Arc<dyn ChangeSubscriber>>,
    pub(crate) authority: SignatureAuthority,
    policy: AuthenPolicy,
    pub(crate) config: ExchangeConfig,
    pub(crate) ledger: TokenLedger,
    changes: ChangeBuffer,
    state: Mutex<EngineState>,
}

impl Exchange {
    /// Creates an engine over `store` with the given authentication
    /// policy and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoterieError::Config`] when the configuration fails
    /// validation.
    pub fn new(
        store: Arc<dyn DataStore>,
        policy: AuthenPolicy,
        config: ExchangeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let now = Timestamp::now();
        Ok(Self {
            store,
            service: Arc::new(NullService),
            subscriber: None,
            authority: SignatureAuthority::new(policy, None),
            policy,
            config,
            ledger: TokenLedger::new(),
            changes: ChangeBuffer::new(),
            state: Mutex::new(EngineState::new(now)),
        })
    }

    /// Attaches an identity service for author signatures.
    pub fn with_identity_service(mut self, identity: Arc<dyn IdentityService>) -> Self {
        self.authority = SignatureAuthority::new(self.policy, Some(identity));
        self
    }

    /// Attaches service-specific hooks.
    pub fn with_service_hooks(mut self, service: Arc<dyn ExchangeService>) -> Self {
        self.service = service;
        self
    }

    /// Attaches a change subscriber. Without one, notifications drain
    /// through [`groups_changed`] / [`messages_changed`].
    ///
    /// [`groups_changed`]: Exchange::groups_changed
    /// [`messages_changed`]: Exchange::messages_changed
    pub fn with_subscriber(mut self, subscriber: Arc<dyn ChangeSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    /// The engine configuration.
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine lock poisoned")
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Executes one engine tick: the fixed phase sequence over all
    /// queues. Invoked every ~100 ms by the worker loop.
    pub fn tick(&self) {
        // Meta changes run first so services that write-then-read
        // observe their own writes within one tick.
        self.process_group_meta_changes();
        self.process_message_meta_changes();

        self.drain_read_requests();

        self.publish_groups();
        self.publish_messages();
        self.process_group_update_requests();
        self.process_group_deletes();

        // Receive follows publish so notifications for local writes
        // emerge before external arrivals within the same tick.
        self.process_received_groups();
        self.process_received_messages();
        self.perform_update_validation();

        self.flush_notifications();

        self.service.tick();

        self.housekeeping_step();
    }

    fn flush_notifications(&self) {
        let batch = std::mem::take(&mut self.lock_state().notifications);
        if batch.is_empty() {
            return;
        }
        match &self.subscriber {
            Some(subscriber) => subscriber.notify_changes(batch),
            None => self.changes.receive_changes(batch),
        }
    }

    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    /// Moves `token` to a terminal status unless it was cancelled (a
    /// cancelled token keeps its status and produces no output).
    /// Returns true when the caller should emit output for it.
    pub(crate) fn finish_token(&self, token: Token, success: bool) -> bool {
        if self.ledger.is_cancelled(token) {
            return false;
        }
        self.ledger.set_status(
            token,
            if success {
                TokenStatus::Complete
            } else {
                TokenStatus::Failed
            },
        );
        success
    }

    // -----------------------------------------------------------------------
    // Publication API
    // -----------------------------------------------------------------------

    /// Queues a new group for signing and storage. The group id is
    /// assigned by the engine (from the freshly minted admin key) and
    /// delivered through [`acknowledge_group`].
    ///
    /// [`acknowledge_group`]: Exchange::acknowledge_group
    pub fn publish_group(&self, draft: GroupDraft) -> Token {
        let token = self.ledger.mint();
        self.lock_state().groups_to_publish.push(PendingGroupSign {
            draft,
            token,
            keys: None,
            start_ts: Timestamp::now(),
            is_update: false,
        });
        tracing::debug!(%token, "group publish queued");
        token
    }

    /// Queues a new version of an existing group. Fails unless the
    /// stored group still holds its private admin and publish keys.
    pub fn update_group(&self, draft: GroupDraft) -> Token {
        let token = self.ledger.mint();
        self.lock_state()
            .group_updates_to_publish
            .push((token, draft));
        tracing::debug!(%token, "group update queued");
        token
    }

    /// Queues removal of a group (and all its messages).
    pub fn delete_group(&self, group_id: GroupId) -> Token {
        let token = self.ledger.mint();
        self.lock_state().group_deletes.push((token, group_id));
        tracing::debug!(%token, %group_id, "group delete queued");
        token
    }

    /// Queues a new message for signing and storage. The message id is
    /// delivered through [`acknowledge_message`].
    ///
    /// [`acknowledge_message`]: Exchange::acknowledge_message
    pub fn publish_message(&self, draft: MessageDraft) -> Token {
        let token = self.ledger.mint();
        self.lock_state().msgs_to_publish.push((token, draft));
        tracing::debug!(%token, "message publish queued");
        token
    }

    // -----------------------------------------------------------------------
    // Meta-mutation API
    // -----------------------------------------------------------------------

    fn queue_group_meta_change(&self, group_id: GroupId, values: ContentValues) -> Token {
        let token = self.ledger.mint();
        self.lock_state()
            .grp_meta_edits
            .insert(token, GroupMetaChange { group_id, values });
        token
    }

    fn queue_message_meta_change(
        &self,
        msg_id: (GroupId, MessageId),
        values: ContentValues,
    ) -> Token {
        let token = self.ledger.mint();
        self.lock_state()
            .msg_meta_edits
            .insert(token, MessageMetaChange { msg_id, values });
        token
    }

    /// Applies `status` under `mask` to a group's status bits.
    pub fn set_group_status(&self, group_id: GroupId, status: u32, mask: u32) -> Token {
        let mut values = ContentValues::new();
        values.put_int(meta_keys::GRP_META_STATUS, i64::from(status));
        values.put_int(
            &meta_keys::mask_key(meta_keys::GRP_META_STATUS),
            i64::from(mask),
        );
        self.queue_group_meta_change(group_id, values)
    }

    /// Applies `flags` under `mask` to a group's subscription bits.
    pub fn set_group_subscribe_flags(&self, group_id: GroupId, flags: u32, mask: u32) -> Token {
        let mut values = ContentValues::new();
        values.put_int(meta_keys::GRP_META_SUBSCRIBE, i64::from(flags));
        values.put_int(
            &meta_keys::mask_key(meta_keys::GRP_META_SUBSCRIBE),
            i64::from(mask),
        );
        self.queue_group_meta_change(group_id, values)
    }

    /// Flips a group between subscribed and not-subscribed.
    pub fn subscribe_to_group(&self, group_id: GroupId, subscribed: bool) -> Token {
        let flags = if subscribed {
            subscribe::SUBSCRIBED
        } else {
            subscribe::NOT_SUBSCRIBED
        };
        self.set_group_subscribe_flags(group_id, flags, subscribe::STATE_MASK)
    }

    /// Replaces a group's service string.
    pub fn set_group_service_string(&self, group_id: GroupId, service: &str) -> Token {
        let mut values = ContentValues::new();
        values.put_text(meta_keys::GRP_META_SERVICE, service);
        self.queue_group_meta_change(group_id, values)
    }

    /// Replaces a group's reputation cutoff.
    pub fn set_group_reputation_cutoff(&self, group_id: GroupId, cutoff: i32) -> Token {
        let mut values = ContentValues::new();
        values.put_int(meta_keys::GRP_META_CUTOFF, i64::from(cutoff));
        self.queue_group_meta_change(group_id, values)
    }

    /// Applies `status` under `mask` to a message's status bits.
    pub fn set_message_status(
        &self,
        msg_id: (GroupId, MessageId),
        status: u32,
        mask: u32,
    ) -> Token {
        let mut values = ContentValues::new();
        values.put_int(meta_keys::MSG_META_STATUS, i64::from(status));
        values.put_int(
            &meta_keys::mask_key(meta_keys::MSG_META_STATUS),
            i64::from(mask),
        );
        self.queue_message_meta_change(msg_id, values)
    }

    /// Replaces a message's service string.
    pub fn set_message_service_string(
        &self,
        msg_id: (GroupId, MessageId),
        service: &str,
    ) -> Token {
        let mut values = ContentValues::new();
        values.put_text(meta_keys::MSG_META_SERVICE, service);
        self.queue_message_meta_change(msg_id, values)
    }

    // -----------------------------------------------------------------------
    // Network intake (called by the sync layer)
    // -----------------------------------------------------------------------

    /// Enqueues groups received from peers. Returns immediately;
    /// validation happens on subsequent ticks.
    pub fn notify_new_groups(&self, groups: Vec<RawGroup>) {
        let now = Timestamp::now();
        let mut state = self.lock_state();
        for group in groups {
            let duplicate = state
                .received_groups
                .iter()
                .any(|p| p.item.group_id == group.group_id);
            if duplicate {
                tracing::debug!(group = %group.group_id, "dropping duplicate pending group");
                continue;
            }
            state.received_groups.push(PendingValidation {
                item: group,
                attempts: 0,
                first_seen: now,
            });
        }
    }

    /// Enqueues messages received from peers. Duplicates already
    /// queued (fresh or retrying) are dropped here; duplicates
    /// already stored are dropped by the pre-store filter.
    pub fn notify_new_messages(&self, messages: Vec<RawMessage>) {
        let now = Timestamp::now();
        let mut state = self.lock_state();
        for msg in messages {
            let key = (msg.group_id, msg.msg_id);
            let duplicate = state
                .received_msgs
                .iter()
                .any(|p| (p.item.group_id, p.item.msg_id) == key);
            if duplicate {
                tracing::debug!(msg = %msg.msg_id, "dropping duplicate pending message");
                continue;
            }
            state.received_msgs.push(PendingValidation {
                item: msg,
                attempts: 0,
                first_seen: now,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Token queries and acknowledgements
    // -----------------------------------------------------------------------

    /// Returns the status of a token, or `None` once disposed.
    pub fn token_status(&self, token: Token) -> Option<TokenStatus> {
        self.ledger.status(token)
    }

    /// Cancels a pending request. The queued work still runs but its
    /// output is dropped. Returns false for unknown/terminal tokens.
    pub fn cancel_request(&self, token: Token) -> bool {
        self.ledger.cancel(token)
    }

    /// Releases a token without consuming its payload.
    pub fn dispose_token(&self, token: Token) {
        self.ledger.dispose(token);
    }

    /// Consumes the acknowledgement of a group operation: the id of
    /// the group that was published, updated, deleted, or meta-edited.
    /// Disposes the token; a second call returns `None`.
    pub fn acknowledge_group(&self, token: Token) -> Option<GroupId> {
        self.ledger.acknowledge_group(token)
    }

    /// Consumes the acknowledgement of a message publication.
    /// Disposes the token; a second call returns `None`.
    pub fn acknowledge_message(&self, token: Token) -> Option<(GroupId, MessageId)> {
        self.ledger.acknowledge_message(token)
    }

    // -----------------------------------------------------------------------
    // Direct accessors
    // -----------------------------------------------------------------------

    /// Fetches the key set of a locally stored group (private halves
    /// included when this node holds them).
    ///
    /// # Errors
    ///
    /// Returns [`CoterieError::Storage`] if the group is unknown or
    /// the store fails.
    pub fn group_keys(&self, group_id: GroupId) -> Result<KeySet> {
        let mut metas = self.store.retrieve_group_meta(&[group_id])?;
        match metas.remove(&group_id) {
            Some(meta) => Ok(meta.keys),
            None => Err(CoterieError::Storage {
                reason: format!("no stored group {group_id}"),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Consumer drains (try-lock; UI callers must never stall)
    // -----------------------------------------------------------------------

    /// Drains accumulated group changes as `(data, meta)` id lists, or
    /// `None` on lock contention.
    pub fn groups_changed(&self) -> Option<(Vec<GroupId>, Vec<GroupId>)> {
        self.changes.groups_changed()
    }

    /// Drains accumulated message changes as `(data, meta)` maps, or
    /// `None` on lock contention.
    pub fn messages_changed(&self) -> Option<(MessageChangeMap, MessageChangeMap)> {
        self.changes.messages_changed()
    }

    /// Probes for buffered changes, discarding the queues the caller
    /// will not drain.
    pub fn updated(&self, will_drain_groups: bool, will_drain_msgs: bool) -> bool {
        self.changes.updated(will_drain_groups, will_drain_msgs)
    }
}
