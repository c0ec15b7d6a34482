//! Notification bus and consumer-facing change buffers.
//!
//! Pipelines append [`Notification`] records while they work; once per
//! tick the engine swaps the pending vector out and hands it to the
//! subscriber (or, absent one, to the internal [`ChangeBuffer`]).
//!
//! The consumer drains acquire their locks with **try-lock**: a UI
//! caller polling for changes must never stall behind a long tick, so
//! contention reads as "no change this call".

use std::collections::BTreeMap;
use std::sync::Mutex;

use coterie_types::{GroupId, MessageId};
use serde::{Deserialize, Serialize};

/// Change payload for messages: group id → changed message ids.
pub type MessageChangeMap = BTreeMap<GroupId, Vec<MessageId>>;

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Why a change notification was produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChangeReason {
    /// The item arrived from a peer.
    Receive,
    /// The item was published (or deleted) locally.
    Publish,
    /// A requested meta mutation was applied.
    Processed,
}

/// A change record produced by the pipelines.
///
/// Exactly two shapes exist; both are handled everywhere. (The
/// ancestral design modelled this as an open class hierarchy and
/// leaked entries of unexpected shape — the closed enum makes that
/// unrepresentable.)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// One or more groups changed.
    Groups {
        /// Why the groups changed.
        reason: ChangeReason,
        /// True when only local meta changed (nothing new on the wire).
        meta_only: bool,
        /// The affected group ids.
        group_ids: Vec<GroupId>,
    },
    /// One or more messages changed.
    Messages {
        /// Why the messages changed.
        reason: ChangeReason,
        /// True when only local meta changed.
        meta_only: bool,
        /// The affected messages, grouped by group id.
        msgs: MessageChangeMap,
    },
}

// ---------------------------------------------------------------------------
// ChangeSubscriber
// ---------------------------------------------------------------------------

/// Receives the per-tick notification flush.
pub trait ChangeSubscriber: Send + Sync {
    /// Called once per tick with all notifications accumulated during
    /// that tick. Never called with an empty batch.
    fn notify_changes(&self, changes: Vec<Notification>);
}

// ---------------------------------------------------------------------------
// ChangeBuffer
// ---------------------------------------------------------------------------

/// Accumulated changes awaiting a consumer drain.
///
/// Group and message changes live behind separate locks so a consumer
/// interested in one kind never contends on the other.
pub(crate) struct ChangeBuffer {
    groups: Mutex<Vec<(bool, Vec<GroupId>)>>,
    msgs: Mutex<Vec<(bool, MessageChangeMap)>>,
}

impl ChangeBuffer {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(Vec::new()),
            msgs: Mutex::new(Vec::new()),
        }
    }

    /// Files a notification batch into the consumer buffers. Blocking
    /// lock — only the engine calls this, once per tick.
    pub fn receive_changes(&self, changes: Vec<Notification>) {
        for change in changes {
            match change {
                Notification::Groups {
                    meta_only,
                    group_ids,
                    ..
                } => {
                    if let Ok(mut buffer) = self.groups.lock() {
                        buffer.push((meta_only, group_ids));
                    }
                }
                Notification::Messages {
                    meta_only, msgs, ..
                } => {
                    if let Ok(mut buffer) = self.msgs.lock() {
                        buffer.push((meta_only, msgs));
                    }
                }
            }
        }
    }

    /// Drains accumulated group changes into `(data, meta)` id lists.
    /// Returns `None` when the buffer is contended.
    pub fn groups_changed(&self) -> Option<(Vec<GroupId>, Vec<GroupId>)> {
        let mut buffer = self.groups.try_lock().ok()?;
        let mut data = Vec::new();
        let mut meta = Vec::new();
        for (meta_only, ids) in buffer.drain(..) {
            if meta_only {
                meta.extend(ids);
            } else {
                data.extend(ids);
            }
        }
        Some((data, meta))
    }

    /// Drains accumulated message changes into `(data, meta)` maps.
    /// Returns `None` when the buffer is contended.
    pub fn messages_changed(&self) -> Option<(MessageChangeMap, MessageChangeMap)> {
        let mut buffer = self.msgs.try_lock().ok()?;
        let mut data = MessageChangeMap::new();
        let mut meta = MessageChangeMap::new();
        for (meta_only, map) in buffer.drain(..) {
            let target = if meta_only { &mut meta } else { &mut data };
            for (gid, ids) in map {
                target.entry(gid).or_default().extend(ids);
            }
        }
        Some((data, meta))
    }

    /// Returns true if any changes are buffered. Buffers the caller
    /// does not intend to drain are discarded.
    pub fn updated(&self, will_drain_groups: bool, will_drain_msgs: bool) -> bool {
        let mut changed = false;

        if let Ok(mut groups) = self.groups.try_lock() {
            changed |= !groups.is_empty();
            if !will_drain_groups {
                groups.clear();
            }
        }
        if let Ok(mut msgs) = self.msgs.try_lock() {
            changed |= !msgs.is_empty();
            if !will_drain_msgs {
                msgs.clear();
            }
        }

        changed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(b: u8) -> GroupId {
        GroupId::new([b; 16])
    }

    fn mid(b: u8) -> MessageId {
        MessageId::new([b; 32])
    }

    #[test]
    fn group_changes_split_by_meta_flag() {
        let buffer = ChangeBuffer::new();
        buffer.receive_changes(vec![
            Notification::Groups {
                reason: ChangeReason::Receive,
                meta_only: false,
                group_ids: vec![gid(1)],
            },
            Notification::Groups {
                reason: ChangeReason::Processed,
                meta_only: true,
                group_ids: vec![gid(2)],
            },
        ]);

        let (data, meta) = buffer.groups_changed().expect("uncontended");
        assert_eq!(data, vec![gid(1)]);
        assert_eq!(meta, vec![gid(2)]);

        // Drained: second call yields nothing.
        let (data, meta) = buffer.groups_changed().expect("uncontended");
        assert!(data.is_empty() && meta.is_empty());
    }

    #[test]
    fn message_changes_merge_across_batches() {
        let buffer = ChangeBuffer::new();
        let mut first = MessageChangeMap::new();
        first.insert(gid(1), vec![mid(1)]);
        let mut second = MessageChangeMap::new();
        second.insert(gid(1), vec![mid(2)]);

        buffer.receive_changes(vec![
            Notification::Messages {
                reason: ChangeReason::Receive,
                meta_only: false,
                msgs: first,
            },
            Notification::Messages {
                reason: ChangeReason::Receive,
                meta_only: false,
                msgs: second,
            },
        ]);

        let (data, _) = buffer.messages_changed().expect("uncontended");
        assert_eq!(data[&gid(1)], vec![mid(1), mid(2)]);
    }

    #[test]
    fn updated_reports_and_discards() {
        let buffer = ChangeBuffer::new();
        buffer.receive_changes(vec![Notification::Groups {
            reason: ChangeReason::Publish,
            meta_only: false,
            group_ids: vec![gid(1)],
        }]);

        assert!(buffer.updated(false, true));
        // Group buffer was discarded by the probe above.
        let (data, meta) = buffer.groups_changed().expect("uncontended");
        assert!(data.is_empty() && meta.is_empty());
        assert!(!buffer.updated(true, true));
    }

    #[test]
    fn contended_drain_returns_none() {
        let buffer = ChangeBuffer::new();
        let _guard = buffer.groups.lock().expect("test lock");
        assert!(buffer.groups_changed().is_none());
        // Message buffer is independent of the group lock.
        assert!(buffer.messages_changed().is_some());
    }
}
