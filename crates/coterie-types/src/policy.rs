//! Authentication policy: which signatures a service requires.
//!
//! A policy is a 32-bit word partitioned into four 8-bit slots — one per
//! group privacy class plus one for group-level options. Each slot holds
//! required-signature bits. The slot consulted for a message is selected
//! by the privacy class of its group; group-level signatures always use
//! the options slot.

use serde::{Deserialize, Serialize};

use crate::flags::PrivacyClass;

// ---------------------------------------------------------------------------
// Per-slot requirement bits
// ---------------------------------------------------------------------------

/// Message signature requirement bits (within a privacy slot).
pub mod msg_authen {
    /// Root (non-reply) messages must carry an author signature.
    pub const ROOT_AUTHOR_SIGN: u8 = 0x01;
    /// Reply messages must carry an author signature.
    pub const CHILD_AUTHOR_SIGN: u8 = 0x02;
    /// Root messages must carry a publish signature.
    pub const ROOT_PUBLISH_SIGN: u8 = 0x04;
    /// Reply messages must carry a publish signature.
    pub const CHILD_PUBLISH_SIGN: u8 = 0x08;
}

/// Group signature requirement bits (within the options slot).
pub mod grp_authen {
    /// Groups must carry an author (identity) signature.
    pub const AUTHOR_SIGN: u8 = 0x01;
}

// ---------------------------------------------------------------------------
// PolicySlot
// ---------------------------------------------------------------------------

/// The four 8-bit slots of an authentication policy word.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PolicySlot {
    /// Requirements for messages in public groups.
    Public,
    /// Requirements for messages in restricted groups.
    Restricted,
    /// Requirements for messages in private groups.
    Private,
    /// Requirements for groups themselves.
    Options,
}

impl PolicySlot {
    /// Bit offset of this slot within the policy word.
    fn offset(self) -> u32 {
        match self {
            Self::Public => 0,
            Self::Restricted => 8,
            Self::Private => 16,
            Self::Options => 24,
        }
    }
}

impl From<PrivacyClass> for PolicySlot {
    fn from(class: PrivacyClass) -> Self {
        match class {
            PrivacyClass::Public => Self::Public,
            PrivacyClass::Restricted => Self::Restricted,
            PrivacyClass::Private => Self::Private,
        }
    }
}

// ---------------------------------------------------------------------------
// AuthenPolicy
// ---------------------------------------------------------------------------

/// A packed authentication policy word.
///
/// Constructed once per service at engine creation and never mutated
/// afterwards; the exchange only ever projects individual bits out of
/// it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AuthenPolicy(u32);

impl AuthenPolicy {
    /// Creates a policy from its raw packed representation.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw packed representation.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Returns true if `flag` is required in `slot`.
    pub fn requires(&self, slot: PolicySlot, flag: u8) -> bool {
        u32::from(flag) & (self.0 >> slot.offset()) != 0
    }

    /// Replaces the 8 bits of `slot` with `bits`, leaving other slots
    /// untouched. Returns the updated policy, builder style.
    pub fn with_slot(self, slot: PolicySlot, bits: u8) -> Self {
        let offset = slot.offset();
        let cleared = self.0 & !(0xFFu32 << offset);
        Self(cleared | (u32::from(bits) << offset))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
