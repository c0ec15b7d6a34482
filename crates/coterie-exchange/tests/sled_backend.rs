//! The exchange against the on-disk sled backend: publish, restart,
//! and read back.

use std::sync::Arc;

use coterie_exchange::{Exchange, GroupDraft, MessageDraft, TokenStatus};
use coterie_protocol::{GroupMeta, MessageMeta};
use coterie_storage::SledStore;
use coterie_types::config::ExchangeConfig;
use coterie_types::flags::group_flags;
use coterie_types::policy::AuthenPolicy;

#[test]
fn publish_survives_engine_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    let (group_id, msg_id) = {
        let store = Arc::new(SledStore::open(dir.path()).expect("open store"));
        let exchange = Exchange::new(store, AuthenPolicy::default(), ExchangeConfig::default())
            .expect("engine");

        let token = exchange.publish_group(GroupDraft {
            payload: b"persistent forum".to_vec(),
            meta: GroupMeta {
                group_flags: group_flags::PRIVACY_PUBLIC,
                ..GroupMeta::default()
            },
        });
        exchange.tick();
        assert_eq!(exchange.token_status(token), Some(TokenStatus::Complete));
        let group_id = exchange.acknowledge_group(token).expect("group ack");

        let token = exchange.publish_message(MessageDraft {
            payload: b"durable post".to_vec(),
            meta: MessageMeta {
                group_id,
                ..MessageMeta::default()
            },
        });
        exchange.tick();
        assert_eq!(exchange.token_status(token), Some(TokenStatus::Complete));
        let (_, msg_id) = exchange.acknowledge_message(token).expect("message ack");
        (group_id, msg_id)
    };

    // A fresh engine over the same directory sees everything.
    let store = Arc::new(SledStore::open(dir.path()).expect("reopen store"));
    let exchange =
        Exchange::new(store, AuthenPolicy::default(), ExchangeConfig::default()).expect("engine");

    let token = exchange.request_group_ids();
    exchange.tick();
    assert_eq!(exchange.group_ids(token), Some(vec![group_id]));

    let token = exchange.request_message_ids(group_id);
    exchange.tick();
    assert_eq!(exchange.message_ids(token), Some(vec![msg_id]));

    // Private key halves survived the restart.
    let keys = exchange.group_keys(group_id).expect("keys");
    assert!(keys.has_private_admin_and_publish());
}
