//! Meta-change records applied by the store.
//!
//! The exchange resolves masked bitfield updates *before* handing a
//! change to the store (read-modify-write happens in the engine, where
//! the current value was fetched); by the time a change reaches
//! [`crate::DataStore::update_group_meta`] its bag holds plain values
//! only.

use coterie_protocol::{meta_keys, ContentValues, GroupMeta, MessageMeta};
use coterie_types::{CoterieError, GroupId, MessageId, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Change records
// ---------------------------------------------------------------------------

/// A pending mutation of one group's local meta fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupMetaChange {
    /// Target group.
    pub group_id: GroupId,
    /// Field values to apply.
    pub values: ContentValues,
}

/// A pending mutation of one message's local meta fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageMetaChange {
    /// Target message, addressed by group and message id.
    pub msg_id: (GroupId, MessageId),
    /// Field values to apply.
    pub values: ContentValues,
}

// ---------------------------------------------------------------------------
// Application helpers (shared by the backends)
// ---------------------------------------------------------------------------

fn int_value(values: &ContentValues, key: &str) -> Result<i64> {
    values.get_int(key).ok_or_else(|| CoterieError::Storage {
        reason: format!("meta change key {key} holds no integer"),
    })
}

/// Applies a resolved change bag to a group meta in place.
///
/// # Errors
///
/// Returns [`CoterieError::Storage`] for unrecognized keys or
/// mistyped values; the caller must not apply a partially understood
/// change.
pub fn apply_group_values(meta: &mut GroupMeta, values: &ContentValues) -> Result<()> {
    for (key, _) in values.iter() {
        match key {
            meta_keys::GRP_META_STATUS => {
                meta.group_status = int_value(values, key)? as u32;
            }
            meta_keys::GRP_META_SUBSCRIBE => {
                meta.subscribe_flags = int_value(values, key)? as u32;
            }
            meta_keys::GRP_META_SERVICE => {
                meta.service_string = values
                    .get_text(key)
                    .ok_or_else(|| CoterieError::Storage {
                        reason: "group service string holds no text".into(),
                    })?
                    .to_string();
            }
            meta_keys::GRP_META_CUTOFF => {
                meta.reputation_cutoff = int_value(values, key)? as i32;
            }
            other => {
                return Err(CoterieError::Storage {
                    reason: format!("unrecognized group meta key: {other}"),
                });
            }
        }
    }
    Ok(())
}

/// Applies a resolved change bag to a message meta in place.
///
/// # Errors
///
/// Same contract as [`apply_group_values`].
pub fn apply_message_values(meta: &mut MessageMeta, values: &ContentValues) -> Result<()> {
    for (key, _) in values.iter() {
        match key {
            meta_keys::MSG_META_STATUS => {
                meta.msg_status = int_value(values, key)? as u32;
            }
            meta_keys::MSG_META_SERVICE => {
                meta.service_string = values
                    .get_text(key)
                    .ok_or_else(|| CoterieError::Storage {
                        reason: "message service string holds no text".into(),
                    })?
                    .to_string();
            }
            other => {
                return Err(CoterieError::Storage {
                    reason: format!("unrecognized message meta key: {other}"),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
