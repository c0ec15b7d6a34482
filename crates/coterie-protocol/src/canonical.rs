//! Canonical CBOR signing documents per RFC 8949 §4.2 (Core
//! Deterministic Encoding).
//!
//! Admin, identity, and publish signatures — and message ids — are all
//! computed over `payload || signing_doc`, never over a serde-derived
//! encoding. The documents here guarantee:
//!
//! - **Sorted keys**: map keys ordered by their CBOR-encoded byte form
//!   (shortest first, then bytewise lexicographic).
//! - **Definite-length**: all maps, arrays, and strings use
//!   definite-length encoding.
//! - **Signature-free**: the attached signature set is never part of
//!   the document.
//! - **Public keys only**: a group document embeds the public halves
//!   of the key set, so the same document is derived from a locally
//!   held full set and from the wire shape.
//!
//! The canonical key order for a group document (9 entries):
//!
//! | # | Key             | CBOR type       |
//! |---|-----------------|-----------------|
//! | 1 | `"keys"`        | Array           |
//! | 2 | `"flags"`       | Integer         |
//! | 3 | `"author"`      | Bytes / Null    |
//! | 4 | `"parent"`      | Bytes / Null    |
//! | 5 | `"period"`      | Integer / Null  |
//! | 6 | `"group_id"`    | Bytes           |
//! | 7 | `"circle_id"`   | Bytes / Null    |
//! | 8 | `"publish_ts"`  | Integer         |
//! | 9 | `"circle_type"` | Integer         |
//!
//! And for a message document (5 entries):
//!
//! | # | Key            | CBOR type    |
//! |---|----------------|--------------|
//! | 1 | `"orig"`       | Bytes / Null |
//! | 2 | `"author"`     | Bytes / Null |
//! | 3 | `"parent"`     | Bytes / Null |
//! | 4 | `"group_id"`   | Bytes        |
//! | 5 | `"publish_ts"` | Integer      |
//!
//! The message document deliberately excludes the message id (the id
//! *is* the hash of `payload || document`) and normalizes a
//! self-referential `orig` to null, since the original-message id is
//! back-filled after signing.

use ciborium::value::Value;
use coterie_types::{CoterieError, Result};

use crate::keys::{KeyDistribution, KeyMaterial, KeySet};
use crate::meta::{GroupMeta, MessageMeta};

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

fn key(name: &str) -> Value {
    Value::Text(name.into())
}

fn bytes_or_null<T: AsRef<[u8]>>(value: Option<T>) -> Value {
    match value {
        Some(v) => Value::Bytes(v.as_ref().to_vec()),
        None => Value::Null,
    }
}

fn distribution_code(d: KeyDistribution) -> i64 {
    match d {
        KeyDistribution::Admin => 0,
        KeyDistribution::PublishPublic => 1,
        KeyDistribution::PublishPrivate => 2,
    }
}

fn material_code(m: KeyMaterial) -> i64 {
    match m {
        KeyMaterial::PublicOnly => 0,
        KeyMaterial::Full => 1,
    }
}

/// Encodes a key set as a CBOR array of `[key_id, distribution,
/// material, bytes]` tuples, ordered by key id.
fn key_set_value(keys: &KeySet) -> Value {
    let records = keys
        .keys
        .values()
        .map(|record| {
            Value::Array(vec![
                Value::Bytes(record.key_id.as_ref().to_vec()),
                Value::Integer(distribution_code(record.distribution).into()),
                Value::Integer(material_code(record.material).into()),
                Value::Bytes(record.bytes.clone()),
            ])
        })
        .collect();
    Value::Array(records)
}

fn encode(map: Vec<(Value, Value)>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&Value::Map(map), &mut buf).map_err(|e| CoterieError::Protocol {
        reason: format!("canonical encoding failed: {e}"),
    })?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Group signing document
// ---------------------------------------------------------------------------

/// Builds the canonical signing document of a group.
///
/// The admin signature (and the identity signature when required)
/// cover `payload || group_signing_doc(meta)`. Private key material in
/// `meta.keys` is projected away first, so locally authored groups and
/// their wire form produce identical documents.
///
/// # Errors
///
/// Returns [`CoterieError::Protocol`] on encoding failure, or a key
/// error if a record's material is malformed.
pub fn group_signing_doc(meta: &GroupMeta) -> Result<Vec<u8>> {
    let public_keys = meta.keys.public_half()?;

    let circle_type = match meta.circle_type {
        coterie_types::flags::CircleType::Public => 0i64,
        coterie_types::flags::CircleType::External => 1,
        coterie_types::flags::CircleType::YourEyesOnly => 2,
    };

    // Entries in pre-computed canonical order (see module docs).
    let entries = vec![
        (key("keys"), key_set_value(&public_keys)),
        (key("flags"), Value::Integer(i64::from(meta.group_flags).into())),
        (key("author"), bytes_or_null(meta.author.as_ref())),
        (key("parent"), bytes_or_null(meta.parent_group.as_ref())),
        (
            key("period"),
            match meta.store_period_secs {
                Some(p) => Value::Integer(p.into()),
                None => Value::Null,
            },
        ),
        (key("group_id"), Value::Bytes(meta.group_id.as_ref().to_vec())),
        (key("circle_id"), bytes_or_null(meta.circle_id.as_ref())),
        (
            key("publish_ts"),
            Value::Integer(meta.publish_ts.as_secs().into()),
        ),
        (key("circle_type"), Value::Integer(circle_type.into())),
    ];

    encode(entries)
}

// ---------------------------------------------------------------------------
// Message signing document
// ---------------------------------------------------------------------------

/// Builds the canonical signing document of a message.
///
/// `MessageId = SHA3-256(payload || message_signing_doc(meta))`, and
/// the publish/identity signatures cover the same concatenation. The
/// message id itself is excluded (it does not exist yet at signing
/// time) and a self-referential `orig_msg_id` encodes as null.
///
/// # Errors
///
/// Returns [`CoterieError::Protocol`] on encoding failure.
pub fn message_signing_doc(meta: &MessageMeta) -> Result<Vec<u8>> {
    // Entries in pre-computed canonical order (see module docs).
    let entries = vec![
        (key("orig"), bytes_or_null(meta.signed_orig().as_ref())),
        (key("author"), bytes_or_null(meta.author.as_ref())),
        (key("parent"), bytes_or_null(meta.parent_msg_id.as_ref())),
        (key("group_id"), Value::Bytes(meta.group_id.as_ref().to_vec())),
        (
            key("publish_ts"),
            Value::Integer(meta.publish_ts.as_secs().into()),
        ),
    ];

    encode(entries)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
