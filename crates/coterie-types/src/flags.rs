//! Flag bitfields and enumerations shared by group and message metadata.
//!
//! All flag words are plain `u32` bitfields stored in metadata records;
//! the constants here give them names. Masked updates (see the exchange
//! meta-mutation processor) operate on the raw words, so the constants
//! double as masks.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Group option flags (wire, set at creation)
// ---------------------------------------------------------------------------

/// Group option flags carried in the signed group meta.
pub mod group_flags {
    /// The group is private: posting requires the private publish key.
    pub const PRIVACY_PRIVATE: u32 = 0x0000_0001;
    /// The group is restricted: posting is gated by the restricted
    /// policy slot.
    pub const PRIVACY_RESTRICTED: u32 = 0x0000_0002;
    /// The group is public.
    pub const PRIVACY_PUBLIC: u32 = 0x0000_0004;
}

// ---------------------------------------------------------------------------
// PrivacyClass
// ---------------------------------------------------------------------------

/// Privacy class of a group, projected from its option flags.
///
/// Selects the authentication-policy slot used when signing and
/// validating messages in the group.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PrivacyClass {
    /// Anyone may post; the public policy slot applies.
    Public,
    /// Posting is restricted; the restricted policy slot applies.
    Restricted,
    /// Posting requires the private publish key; the private policy
    /// slot applies.
    Private,
}

impl PrivacyClass {
    /// Projects the privacy class from a group flag word.
    ///
    /// `RESTRICTED` wins over `PRIVATE` is not a case that occurs in
    /// well-formed groups; when both bits are set, restricted is
    /// chosen, matching the order the flags are tested everywhere else.
    pub fn from_group_flags(flags: u32) -> Self {
        if flags & group_flags::PRIVACY_RESTRICTED != 0 {
            Self::Restricted
        } else if flags & group_flags::PRIVACY_PRIVATE != 0 {
            Self::Private
        } else {
            Self::Public
        }
    }
}

// ---------------------------------------------------------------------------
// Group status flags (local)
// ---------------------------------------------------------------------------

/// Local group status bits. Never serialized onto the wire.
pub mod group_status {
    /// The consuming service has not yet processed the group.
    pub const UNPROCESSED: u32 = 0x0000_0100;
    /// The group has not been shown to the user.
    pub const UNREAD: u32 = 0x0000_0200;
}

// ---------------------------------------------------------------------------
// Message status flags (local)
// ---------------------------------------------------------------------------

/// Local message status bits. Never serialized onto the wire.
pub mod msg_status {
    /// The consuming service has not yet processed the message.
    pub const UNPROCESSED: u32 = 0x0000_0001;
    /// The message has not been shown to the user.
    pub const UNREAD: u32 = 0x0000_0002;
    /// The message is exempt from age-based cleanup.
    pub const KEEP: u32 = 0x0000_0008;
}

// ---------------------------------------------------------------------------
// Subscription flags (local)
// ---------------------------------------------------------------------------

/// Local subscription bits recorded on a stored group.
pub mod subscribe {
    /// This node administers the group (holds the private admin key).
    pub const ADMIN: u32 = 0x0000_0001;
    /// This node may publish to the group (holds the private publish key).
    pub const PUBLISH: u32 = 0x0000_0002;
    /// The local user is subscribed to the group.
    pub const SUBSCRIBED: u32 = 0x0000_0004;
    /// The local user is not subscribed to the group.
    pub const NOT_SUBSCRIBED: u32 = 0x0000_0008;

    /// Mask flipping between subscribed and not-subscribed.
    pub const STATE_MASK: u32 = SUBSCRIBED | NOT_SUBSCRIBED;
}

// ---------------------------------------------------------------------------
// CircleType
// ---------------------------------------------------------------------------

/// Visibility scope of a group.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CircleType {
    /// Visible to every peer.
    #[default]
    Public,
    /// Restricted to an externally defined circle of identities.
    External,
    /// Forwarded only to the peer it was explicitly shared with; the
    /// receiving engine records the introducing peer as originator.
    YourEyesOnly,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
