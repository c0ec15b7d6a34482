//! End-to-end exchange scenarios: publish/acknowledge, retry on a
//! missing author key, masked meta edits, update replay/acceptance,
//! and receive-side deduplication.
//!
//! All scenarios drive `Exchange::tick` directly against an in-memory
//! store; no worker loop and no real network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use coterie_crypto::{Keypair, PublicKey};
use coterie_exchange::{
    ChangeReason, Exchange, GroupDraft, IdentityService, MessageDraft, Notification, TokenStatus,
};
use coterie_protocol::{
    encode_group_meta, encode_message_meta, group_signing_doc, GroupMeta, MessageMeta, RawGroup,
    RawMessage, SignatureRole,
};
use coterie_storage::{
    DataStore, GroupMetaChange, MemoryStore, MessageMetaChange, MessageReq, StoredGroup,
    StoredMessage,
};
use coterie_types::config::ExchangeConfig;
use coterie_types::flags::group_flags;
use coterie_types::policy::AuthenPolicy;
use coterie_types::{GroupId, IdentityId, MessageId, PeerId, Result};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Identity service stub that never holds keys and records every
/// request it receives.
#[derive(Default)]
struct DenyingIdentity {
    private_requests: Mutex<Vec<IdentityId>>,
    public_requests: Mutex<Vec<IdentityId>>,
}

impl IdentityService for DenyingIdentity {
    fn has_key(&self, _id: &IdentityId) -> bool {
        false
    }

    fn has_private_key(&self, _id: &IdentityId) -> bool {
        false
    }

    fn key(&self, _id: &IdentityId) -> Option<PublicKey> {
        None
    }

    fn private_key(&self, _id: &IdentityId) -> Option<Keypair> {
        None
    }

    fn request_key(&self, id: &IdentityId, _peers: &[PeerId]) {
        self.public_requests.lock().expect("lock").push(*id);
    }

    fn request_private_key(&self, id: &IdentityId) {
        self.private_requests.lock().expect("lock").push(*id);
    }
}

/// Store wrapper counting writes, for dedup assertions.
struct CountingStore {
    inner: MemoryStore,
    group_updates: AtomicUsize,
    message_stores: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            group_updates: AtomicUsize::new(0),
            message_stores: AtomicUsize::new(0),
        }
    }
}

impl DataStore for CountingStore {
    fn retrieve_group_meta(&self, ids: &[GroupId]) -> Result<BTreeMap<GroupId, GroupMeta>> {
        self.inner.retrieve_group_meta(ids)
    }
    fn retrieve_message_meta(
        &self,
        req: &MessageReq,
    ) -> Result<BTreeMap<GroupId, Vec<MessageMeta>>> {
        self.inner.retrieve_message_meta(req)
    }
    fn retrieve_group_ids(&self) -> Result<Vec<GroupId>> {
        self.inner.retrieve_group_ids()
    }
    fn retrieve_message_ids(&self, group_id: &GroupId) -> Result<Vec<MessageId>> {
        self.inner.retrieve_message_ids(group_id)
    }
    fn retrieve_group_data(&self, ids: &[GroupId]) -> Result<Vec<StoredGroup>> {
        self.inner.retrieve_group_data(ids)
    }
    fn retrieve_message_data(
        &self,
        req: &MessageReq,
    ) -> Result<BTreeMap<GroupId, Vec<StoredMessage>>> {
        self.inner.retrieve_message_data(req)
    }
    fn store_groups(&self, groups: Vec<StoredGroup>) -> Result<()> {
        self.inner.store_groups(groups)
    }
    fn store_messages(&self, msgs: Vec<StoredMessage>) -> Result<()> {
        self.message_stores.fetch_add(1, Ordering::SeqCst);
        self.inner.store_messages(msgs)
    }
    fn update_groups(&self, groups: Vec<StoredGroup>) -> Result<()> {
        self.group_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_groups(groups)
    }
    fn update_group_meta(&self, change: &GroupMetaChange) -> Result<()> {
        self.inner.update_group_meta(change)
    }
    fn update_message_meta(&self, change: &MessageMetaChange) -> Result<()> {
        self.inner.update_message_meta(change)
    }
    fn remove_groups(&self, ids: &[GroupId]) -> Result<()> {
        self.inner.remove_groups(ids)
    }
    fn remove_messages(&self, req: &MessageReq) -> Result<()> {
        self.inner.remove_messages(req)
    }
    fn valid_size(&self, len: usize) -> bool {
        self.inner.valid_size(len)
    }
}

/// Subscriber recording every flushed notification batch.
#[derive(Default)]
struct RecordingSubscriber {
    changes: Mutex<Vec<Notification>>,
}

impl coterie_exchange::ChangeSubscriber for RecordingSubscriber {
    fn notify_changes(&self, changes: Vec<Notification>) {
        self.changes.lock().expect("lock").extend(changes);
    }
}

impl RecordingSubscriber {
    fn receive_notifications(&self) -> usize {
        self.changes
            .lock()
            .expect("lock")
            .iter()
            .filter(|n| {
                matches!(
                    n,
                    Notification::Messages {
                        reason: ChangeReason::Receive,
                        ..
                    } | Notification::Groups {
                        reason: ChangeReason::Receive,
                        ..
                    }
                )
            })
            .count()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn public_group_draft(payload: &[u8]) -> GroupDraft {
    GroupDraft {
        payload: payload.to_vec(),
        meta: GroupMeta {
            group_flags: group_flags::PRIVACY_PUBLIC,
            ..GroupMeta::default()
        },
    }
}

fn engine(store: Arc<dyn DataStore>) -> Exchange {
    Exchange::new(store, AuthenPolicy::default(), ExchangeConfig::default()).expect("engine")
}

/// Publishes a group through `exchange` and returns its id.
fn publish_group(exchange: &Exchange, payload: &[u8]) -> GroupId {
    let token = exchange.publish_group(public_group_draft(payload));
    exchange.tick();
    assert_eq!(exchange.token_status(token), Some(TokenStatus::Complete));
    exchange.acknowledge_group(token).expect("group ack")
}

/// Publishes a message through `exchange` and returns its ids.
fn publish_message(exchange: &Exchange, group_id: GroupId, payload: &[u8]) -> (GroupId, MessageId) {
    let token = exchange.publish_message(MessageDraft {
        payload: payload.to_vec(),
        meta: MessageMeta {
            group_id,
            ..MessageMeta::default()
        },
    });
    exchange.tick();
    assert_eq!(exchange.token_status(token), Some(TokenStatus::Complete));
    exchange.acknowledge_message(token).expect("message ack")
}

/// Projects a stored group into the raw form a peer would deliver.
fn group_to_wire(stored: &StoredGroup, sender: PeerId) -> RawGroup {
    RawGroup {
        group_id: stored.meta.group_id,
        payload: stored.payload.clone(),
        meta: encode_group_meta(&stored.meta).expect("wire meta"),
        sender,
    }
}

/// Projects a stored message into the raw form a peer would deliver.
fn message_to_wire(stored: &StoredMessage, sender: PeerId) -> RawMessage {
    RawMessage {
        group_id: stored.meta.group_id,
        msg_id: stored.meta.msg_id,
        payload: stored.payload.clone(),
        meta: encode_message_meta(&stored.meta).expect("wire meta"),
        sender,
    }
}

fn stored_group(store: &dyn DataStore, group_id: GroupId) -> StoredGroup {
    store
        .retrieve_group_data(&[group_id])
        .expect("retrieve group")
        .pop()
        .expect("group present")
}

// ---------------------------------------------------------------------------
// Publish / acknowledge
// ---------------------------------------------------------------------------

#[test]
fn publish_group_acknowledges_once() {
    let store = Arc::new(MemoryStore::new());
    let exchange = engine(store.clone());

    let token = exchange.publish_group(public_group_draft(b"forum"));
    assert_eq!(exchange.token_status(token), Some(TokenStatus::Pending));

    exchange.tick();

    assert_eq!(exchange.token_status(token), Some(TokenStatus::Complete));
    let group_id = exchange.acknowledge_group(token).expect("first ack");
    assert!(!group_id.is_null());
    // The ack payload is consumed exactly once.
    assert_eq!(exchange.acknowledge_group(token), None);
    assert_eq!(exchange.token_status(token), None);
}

#[test]
fn published_group_verifies_under_its_own_admin_key() {
    let store = Arc::new(MemoryStore::new());
    let exchange = engine(store.clone());
    let group_id = publish_group(&exchange, b"forum");

    let stored = stored_group(store.as_ref(), group_id);
    // Locally persisted meta keeps the private key halves.
    assert!(stored.meta.keys.has_private_admin_and_publish());

    // The admin signature verifies against the admin public key
    // embedded in the group's own key set.
    let admin = stored.meta.keys.admin().expect("admin key");
    let public = admin.public_key().expect("public key");
    let doc = group_signing_doc(&stored.meta).expect("doc");
    let mut signed = stored.payload.clone();
    signed.extend_from_slice(&doc);
    let sig = stored
        .meta
        .signatures
        .get(SignatureRole::Admin)
        .expect("admin signature");
    assert!(coterie_crypto::verify(&public, &signed, sig).is_ok());
}

#[test]
fn published_message_id_matches_signed_content() {
    let store = Arc::new(MemoryStore::new());
    let exchange = engine(store.clone());
    let group_id = publish_group(&exchange, b"forum");
    let (_, msg_id) = publish_message(&exchange, group_id, b"first post");

    let mut req = MessageReq::new();
    req.insert(group_id, vec![msg_id]);
    let stored = store
        .retrieve_message_data(&req)
        .expect("retrieve")
        .remove(&group_id)
        .and_then(|mut v| v.pop())
        .expect("message present");

    let doc = coterie_protocol::message_signing_doc(&stored.meta).expect("doc");
    assert_eq!(
        coterie_crypto::message_id(&stored.payload, &doc),
        stored.meta.msg_id
    );
    // Root message: the original-message id points at itself.
    assert_eq!(stored.meta.orig_msg_id, Some(stored.meta.msg_id));
}

// ---------------------------------------------------------------------------
// Missing author key: retry, then fail
// ---------------------------------------------------------------------------

#[test]
fn missing_author_key_retries_five_times_then_fails() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(DenyingIdentity::default());
    let exchange = Exchange::new(
        store.clone(),
        AuthenPolicy::default(),
        ExchangeConfig::default(),
    )
    .expect("engine")
    .with_identity_service(identity.clone());

    let group_id = publish_group(&exchange, b"forum");

    let author = IdentityId::new([0xAB; 16]);
    let token = exchange.publish_message(MessageDraft {
        payload: b"signed post".to_vec(),
        meta: MessageMeta {
            group_id,
            author: Some(author),
            ..MessageMeta::default()
        },
    });

    for tick in 1..=4 {
        exchange.tick();
        assert_eq!(
            exchange.token_status(token),
            Some(TokenStatus::Pending),
            "still retrying after tick {tick}"
        );
    }
    exchange.tick();

    assert_eq!(exchange.token_status(token), Some(TokenStatus::Failed));
    let requests = identity.private_requests.lock().expect("lock");
    assert_eq!(requests.len(), 5);
    assert!(requests.iter().all(|id| *id == author));
    // Nothing was stored.
    assert!(store
        .retrieve_message_ids(&group_id)
        .expect("ids")
        .is_empty());
}

// ---------------------------------------------------------------------------
// Masked status flip
// ---------------------------------------------------------------------------

#[test]
fn masked_status_update_applies_and_notifies() {
    let store = Arc::new(MemoryStore::new());
    let exchange = engine(store.clone());
    let group_id = publish_group(&exchange, b"forum");

    // Seed status 0x0001, full mask.
    let seed = exchange.set_group_status(group_id, 0x0001, 0xFFFF_FFFF);
    exchange.tick();
    assert_eq!(exchange.token_status(seed), Some(TokenStatus::Complete));
    let _ = exchange.groups_changed();

    // Masked flip: value 0x0010 under mask 0x00F0.
    let token = exchange.set_group_status(group_id, 0x0010, 0x00F0);
    exchange.tick();
    assert_eq!(exchange.token_status(token), Some(TokenStatus::Complete));

    let meta = store
        .retrieve_group_meta(&[group_id])
        .expect("meta")
        .remove(&group_id)
        .expect("present");
    assert_eq!(meta.group_status, 0x0011);

    // A processed (meta-only) notification names the group.
    let (_, meta_ids) = exchange.groups_changed().expect("uncontended");
    assert_eq!(meta_ids, vec![group_id]);
}

#[test]
fn masked_update_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let exchange = engine(store.clone());
    let group_id = publish_group(&exchange, b"forum");

    for _ in 0..2 {
        let token = exchange.set_group_status(group_id, 0x0010, 0x00F0);
        exchange.tick();
        assert_eq!(exchange.token_status(token), Some(TokenStatus::Complete));
    }

    let meta = store
        .retrieve_group_meta(&[group_id])
        .expect("meta")
        .remove(&group_id)
        .expect("present");
    assert_eq!(meta.group_status & 0x00F0, 0x0010);
}

// ---------------------------------------------------------------------------
// Group update replay and acceptance
// ---------------------------------------------------------------------------

#[test]
fn replaying_current_group_bytes_is_ignored() {
    let store = Arc::new(CountingStore::new());
    let subscriber = Arc::new(RecordingSubscriber::default());
    let exchange = Exchange::new(
        store.clone(),
        AuthenPolicy::default(),
        ExchangeConfig::default(),
    )
    .expect("engine")
    .with_subscriber(subscriber.clone());

    let group_id = publish_group(&exchange, b"forum");
    let stored = stored_group(store.as_ref(), group_id);
    let baseline = subscriber.receive_notifications();

    // Replay the group's own current bytes.
    exchange.notify_new_groups(vec![group_to_wire(&stored, PeerId::new([9; 32]))]);
    exchange.tick();

    assert_eq!(store.group_updates.load(Ordering::SeqCst), 0);
    assert_eq!(subscriber.receive_notifications(), baseline);
}

#[test]
fn strictly_newer_signed_update_replaces_and_keeps_private_keys() {
    let store = Arc::new(CountingStore::new());
    let subscriber = Arc::new(RecordingSubscriber::default());
    let exchange = Exchange::new(
        store.clone(),
        AuthenPolicy::default(),
        ExchangeConfig::default(),
    )
    .expect("engine")
    .with_subscriber(subscriber.clone());

    let group_id = publish_group(&exchange, b"forum");
    let stored = stored_group(store.as_ref(), group_id);

    // Build a strictly newer version signed with the same admin key.
    let mut new_version = StoredGroup {
        payload: b"forum v2".to_vec(),
        meta: GroupMeta {
            publish_ts: stored.meta.publish_ts.plus_secs(1),
            signatures: Default::default(),
            keys: stored.meta.keys.public_half().expect("public half"),
            subscribe_flags: 0,
            group_status: 0,
            ..stored.meta.clone()
        },
    };
    let doc = group_signing_doc(&new_version.meta).expect("doc");
    let mut signed = new_version.payload.clone();
    signed.extend_from_slice(&doc);
    let admin = stored.meta.keys.admin_full().expect("admin key");
    new_version
        .meta
        .signatures
        .insert(SignatureRole::Admin, admin.keypair().expect("kp").sign(&signed));

    exchange.notify_new_groups(vec![group_to_wire(&new_version, PeerId::new([9; 32]))]);
    exchange.tick();

    let replaced = stored_group(store.as_ref(), group_id);
    assert_eq!(replaced.payload, b"forum v2");
    assert_eq!(replaced.meta.publish_ts, stored.meta.publish_ts.plus_secs(1));
    // Private key halves from the previous local copy survive.
    assert!(replaced.meta.keys.has_private_admin_and_publish());
    // Local subscription state survives too.
    assert_eq!(replaced.meta.subscribe_flags, stored.meta.subscribe_flags);

    assert_eq!(store.group_updates.load(Ordering::SeqCst), 1);
    assert!(subscriber.receive_notifications() > 0);
}

#[test]
fn stale_update_with_valid_signature_is_dropped() {
    let store = Arc::new(CountingStore::new());
    let exchange = engine(store.clone());

    let group_id = publish_group(&exchange, b"forum");
    let stored = stored_group(store.as_ref(), group_id);

    // Same publish_ts: signed correctly but not strictly newer.
    let mut stale = StoredGroup {
        payload: b"forum stale".to_vec(),
        meta: GroupMeta {
            keys: stored.meta.keys.public_half().expect("public half"),
            signatures: Default::default(),
            ..stored.meta.clone()
        },
    };
    let doc = group_signing_doc(&stale.meta).expect("doc");
    let mut signed = stale.payload.clone();
    signed.extend_from_slice(&doc);
    let admin = stored.meta.keys.admin_full().expect("admin key");
    stale
        .meta
        .signatures
        .insert(SignatureRole::Admin, admin.keypair().expect("kp").sign(&signed));

    exchange.notify_new_groups(vec![group_to_wire(&stale, PeerId::new([9; 32]))]);
    exchange.tick();

    assert_eq!(store.group_updates.load(Ordering::SeqCst), 0);
    assert_eq!(stored_group(store.as_ref(), group_id).payload, b"forum");
}

// ---------------------------------------------------------------------------
// Message dedup across ticks
// ---------------------------------------------------------------------------

#[test]
fn triple_delivery_stores_and_notifies_once() {
    // Producer engine mints a properly signed group + message.
    let producer_store = Arc::new(MemoryStore::new());
    let producer = engine(producer_store.clone());
    let group_id = publish_group(&producer, b"forum");
    let (_, msg_id) = publish_message(&producer, group_id, b"hello peers");

    let group_wire = group_to_wire(
        &stored_group(producer_store.as_ref(), group_id),
        PeerId::new([1; 32]),
    );
    let mut req = MessageReq::new();
    req.insert(group_id, vec![msg_id]);
    let stored_msg = producer_store
        .retrieve_message_data(&req)
        .expect("retrieve")
        .remove(&group_id)
        .and_then(|mut v| v.pop())
        .expect("message present");
    let msg_wire = message_to_wire(&stored_msg, PeerId::new([1; 32]));

    // Consumer engine receives the group, then the message thrice.
    let store = Arc::new(CountingStore::new());
    let subscriber = Arc::new(RecordingSubscriber::default());
    let consumer = Exchange::new(
        store.clone(),
        AuthenPolicy::default(),
        ExchangeConfig::default(),
    )
    .expect("engine")
    .with_subscriber(subscriber.clone());

    consumer.notify_new_groups(vec![group_wire]);
    consumer.tick();
    let baseline_notifications = subscriber.receive_notifications();

    // Two deliveries in one tick, a third in the next.
    consumer.notify_new_messages(vec![msg_wire.clone(), msg_wire.clone()]);
    consumer.tick();
    consumer.notify_new_messages(vec![msg_wire]);
    consumer.tick();

    assert_eq!(store.message_stores.load(Ordering::SeqCst), 1);
    assert_eq!(
        store
            .inner
            .retrieve_message_ids(&group_id)
            .expect("ids")
            .len(),
        1
    );
    assert_eq!(
        subscriber.receive_notifications(),
        baseline_notifications + 1
    );
}

// ---------------------------------------------------------------------------
// Reads, deletes, cancellation
// ---------------------------------------------------------------------------

#[test]
fn read_tokens_deliver_and_dispose() {
    let store = Arc::new(MemoryStore::new());
    let exchange = engine(store.clone());
    let group_id = publish_group(&exchange, b"forum");

    let token = exchange.request_group_meta(&[group_id]);
    exchange.tick();

    assert_eq!(exchange.token_status(token), Some(TokenStatus::Complete));
    let metas = exchange.group_meta(token).expect("result");
    assert_eq!(metas.len(), 1);
    assert_eq!(metas[0].group_id, group_id);
    // Consumed: the token is gone.
    assert_eq!(exchange.group_meta(token), None);
    assert_eq!(exchange.token_status(token), None);
}

#[test]
fn delete_group_completes_and_names_the_group() {
    let store = Arc::new(MemoryStore::new());
    let exchange = engine(store.clone());
    let group_id = publish_group(&exchange, b"forum");

    let token = exchange.delete_group(group_id);
    exchange.tick();

    assert_eq!(exchange.token_status(token), Some(TokenStatus::Complete));
    assert_eq!(exchange.acknowledge_group(token), Some(group_id));
    assert!(store.retrieve_group_ids().expect("ids").is_empty());
}

#[test]
fn cancelled_publish_produces_no_ack_or_notification() {
    let store = Arc::new(MemoryStore::new());
    let exchange = engine(store.clone());

    let token = exchange.publish_group(public_group_draft(b"forum"));
    assert!(exchange.cancel_request(token));
    exchange.tick();

    // The work ran (group stored) but the output was dropped.
    assert_eq!(store.retrieve_group_ids().expect("ids").len(), 1);
    assert_eq!(exchange.token_status(token), Some(TokenStatus::Cancelled));
    assert_eq!(exchange.acknowledge_group(token), None);
    let (data, _) = exchange.groups_changed().expect("uncontended");
    assert!(data.is_empty());
}

#[test]
fn update_without_private_keys_fails() {
    // Receive a foreign group (public halves only), then try to
    // publish an update to it.
    let producer_store = Arc::new(MemoryStore::new());
    let producer = engine(producer_store.clone());
    let group_id = publish_group(&producer, b"forum");
    let wire = group_to_wire(
        &stored_group(producer_store.as_ref(), group_id),
        PeerId::new([2; 32]),
    );

    let store = Arc::new(MemoryStore::new());
    let consumer = engine(store.clone());
    consumer.notify_new_groups(vec![wire]);
    consumer.tick();
    assert_eq!(store.retrieve_group_ids().expect("ids"), vec![group_id]);

    let token = consumer.update_group(GroupDraft {
        payload: b"hijack".to_vec(),
        meta: GroupMeta {
            group_id,
            ..GroupMeta::default()
        },
    });
    consumer.tick();
    assert_eq!(consumer.token_status(token), Some(TokenStatus::Failed));
}
