//! Typed key/value bags for metadata mutations.
//!
//! A meta change carries a [`ContentValues`] bag. For a masked bitfield
//! update the bag holds two entries: the target key `K` with the new
//! bits, and `K + "_MASK"` with the mask selecting which bits apply.
//! Plain replacements (service strings, cutoff integers) carry a
//! single entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Recognized keys
// ---------------------------------------------------------------------------

/// Keys understood by the meta-mutation processor.
pub mod meta_keys {
    /// Group status bits (masked).
    pub const GRP_META_STATUS: &str = "grp_status";
    /// Group subscription bits (masked).
    pub const GRP_META_SUBSCRIBE: &str = "grp_subscribe";
    /// Group service string (replace).
    pub const GRP_META_SERVICE: &str = "grp_service";
    /// Group reputation cutoff (replace).
    pub const GRP_META_CUTOFF: &str = "grp_cutoff";
    /// Message status bits (masked).
    pub const MSG_META_STATUS: &str = "msg_status";
    /// Message service string (replace).
    pub const MSG_META_SERVICE: &str = "msg_service";

    /// Suffix distinguishing a mask entry from its value entry.
    pub const MASK_SUFFIX: &str = "_MASK";

    /// Returns the mask-entry key for `key`.
    pub fn mask_key(key: &str) -> String {
        format!("{key}{MASK_SUFFIX}")
    }
}

// ---------------------------------------------------------------------------
// MetaValue / ContentValues
// ---------------------------------------------------------------------------

/// A single typed value in a content bag.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    /// Integer value (flag words, cutoffs; stored widened to `i64`).
    Int(i64),
    /// Text value (service strings).
    Text(String),
}

/// Ordered key → typed value bag.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContentValues {
    values: BTreeMap<String, MetaValue>,
}

impl ContentValues {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an integer value.
    pub fn put_int(&mut self, key: &str, value: i64) {
        self.values.insert(key.into(), MetaValue::Int(value));
    }

    /// Inserts a text value.
    pub fn put_text(&mut self, key: &str, value: &str) {
        self.values.insert(key.into(), MetaValue::Text(value.into()));
    }

    /// Returns the integer value for `key`, if present and integral.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(MetaValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text value for `key`, if present and textual.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(MetaValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Removes and returns the entry for `key`.
    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        self.values.remove(key)
    }

    /// Returns true if the bag holds no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let mut cv = ContentValues::new();
        cv.put_int(meta_keys::GRP_META_STATUS, 0x11);
        cv.put_text(meta_keys::GRP_META_SERVICE, "svc");

        assert_eq!(cv.get_int(meta_keys::GRP_META_STATUS), Some(0x11));
        assert_eq!(cv.get_text(meta_keys::GRP_META_SERVICE), Some("svc"));
    }

    #[test]
    fn type_mismatch_yields_none() {
        let mut cv = ContentValues::new();
        cv.put_text("k", "text");
        assert_eq!(cv.get_int("k"), None);

        cv.put_int("k", 1);
        assert_eq!(cv.get_text("k"), None);
    }

    #[test]
    fn remove_clears_entry() {
        let mut cv = ContentValues::new();
        cv.put_int("k", 1);
        assert!(cv.remove("k").is_some());
        assert!(cv.is_empty());
        assert!(cv.remove("k").is_none());
    }

    #[test]
    fn mask_key_format() {
        assert_eq!(
            meta_keys::mask_key(meta_keys::MSG_META_STATUS),
            "msg_status_MASK"
        );
    }
}
