//! Protocol records and encodings for the Coterie exchange.
//!
//! Defines what a group and a message *are* (metadata records, key
//! sets, signature sets), how they look on the wire (raw envelopes and
//! meta blobs), and the canonical signing documents everything is
//! signed and hashed over.

pub mod canonical;
pub mod content_value;
pub mod keys;
pub mod meta;
pub mod wire;

pub use canonical::{group_signing_doc, message_signing_doc};
pub use content_value::{meta_keys, ContentValues, MetaValue};
pub use keys::{
    generate_group_keys, KeyDistribution, KeyMaterial, KeyRecord, KeySet, SignatureRole,
    SignatureSet,
};
pub use meta::{GroupMeta, MessageMeta};
pub use wire::{
    decode_group_meta, decode_message_meta, encode_group_meta, encode_message_meta, RawGroup,
    RawMessage,
};
