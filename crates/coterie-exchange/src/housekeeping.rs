//! Housekeeping: periodic message cleanup and store integrity checks.
//!
//! Cleanup runs as a cooperative task — one group per engine tick —
//! so a large store never stalls the tick. The integrity check scans
//! the whole store on a background thread; the engine polls it each
//! tick and joins it when it reports done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use coterie_crypto::content_hash;
use coterie_storage::{DataStore, MessageReq};
use coterie_types::flags::msg_status;
use coterie_types::{GroupId, MessageId, Result, Timestamp};

use crate::engine::Exchange;

// ---------------------------------------------------------------------------
// MessageCleanup
// ---------------------------------------------------------------------------

/// Incremental age-based message eviction.
///
/// Snapshot the group list once, then visit one group per step,
/// removing messages that fail the publication test
/// `status & KEEP != 0 || publish_ts + period >= now`.
pub(crate) struct MessageCleanup {
    groups: Vec<GroupId>,
    next: usize,
}

impl MessageCleanup {
    /// Snapshots the group list and positions at the start.
    pub fn new(store: &dyn DataStore) -> Result<Self> {
        Ok(Self {
            groups: store.retrieve_group_ids()?,
            next: 0,
        })
    }

    /// Processes one group. Returns true when the sweep is finished.
    pub fn step(&mut self, store: &dyn DataStore, default_period_secs: i64) -> Result<bool> {
        let Some(group_id) = self.groups.get(self.next).copied() else {
            return Ok(true);
        };
        self.next += 1;

        let period = store
            .retrieve_group_meta(&[group_id])?
            .remove(&group_id)
            .map(|meta| meta.store_period(default_period_secs))
            .unwrap_or(default_period_secs);

        let mut req = MessageReq::new();
        req.insert(group_id, Vec::new());
        let metas = store.retrieve_message_meta(&req)?;

        let now = Timestamp::now();
        let expired: Vec<MessageId> = metas
            .get(&group_id)
            .map(|metas| {
                metas
                    .iter()
                    .filter(|m| {
                        m.msg_status & msg_status::KEEP == 0
                            && m.publish_ts.plus_secs(period) < now
                    })
                    .map(|m| m.msg_id)
                    .collect()
            })
            .unwrap_or_default();

        if !expired.is_empty() {
            tracing::debug!(%group_id, count = expired.len(), "evicting expired messages");
            let mut removal = MessageReq::new();
            removal.insert(group_id, expired);
            store.remove_messages(&removal)?;
        }

        Ok(self.next >= self.groups.len())
    }
}

// ---------------------------------------------------------------------------
// IntegrityCheck
// ---------------------------------------------------------------------------

/// Findings of one integrity scan.
#[derive(Clone, Debug, Default)]
pub struct IntegrityReport {
    /// Groups visited.
    pub groups_scanned: usize,
    /// Messages visited.
    pub messages_scanned: usize,
    /// Groups whose stored hash no longer matches their payload, or
    /// whose key set fails validation.
    pub corrupt_groups: Vec<GroupId>,
    /// Messages whose stored hash no longer matches their payload.
    pub corrupt_messages: Vec<(GroupId, MessageId)>,
}

impl IntegrityReport {
    /// True when nothing suspicious was found.
    pub fn is_clean(&self) -> bool {
        self.corrupt_groups.is_empty() && self.corrupt_messages.is_empty()
    }
}

/// A store scan running on its own thread.
pub(crate) struct IntegrityCheck {
    handle: Option<JoinHandle<IntegrityReport>>,
    done: Arc<AtomicBool>,
}

impl IntegrityCheck {
    /// Spawns the scan thread.
    pub fn start(store: Arc<dyn DataStore>) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let thread_done = Arc::clone(&done);
        let handle = std::thread::Builder::new()
            .name("coterie-integrity".into())
            .spawn(move || {
                let report = run_scan(store.as_ref());
                thread_done.store(true, Ordering::Release);
                report
            })
            .ok();
        if handle.is_none() {
            // Spawn failure: report done immediately so the engine
            // resets its timer instead of waiting forever.
            done.store(true, Ordering::Release);
        }
        Self { handle, done }
    }

    /// True once the scan thread finished its work.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Joins the scan thread and returns its report.
    pub fn join(mut self) -> Option<IntegrityReport> {
        self.handle.take().and_then(|handle| handle.join().ok())
    }
}

fn run_scan(store: &dyn DataStore) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    let groups = match store.retrieve_group_data(&[]) {
        Ok(groups) => groups,
        Err(e) => {
            tracing::warn!(%e, "integrity check cannot scan groups");
            return report;
        }
    };

    for group in &groups {
        report.groups_scanned += 1;
        let hash_ok = content_hash(&group.payload) == group.meta.content_hash;
        let keys_ok = group.meta.keys.validate().is_ok();
        if !hash_ok || !keys_ok {
            tracing::warn!(group = %group.meta.group_id, hash_ok, keys_ok,
                "integrity check: corrupt group");
            report.corrupt_groups.push(group.meta.group_id);
        }

        let mut req = MessageReq::new();
        req.insert(group.meta.group_id, Vec::new());
        let msgs = match store.retrieve_message_data(&req) {
            Ok(mut map) => map.remove(&group.meta.group_id).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(group = %group.meta.group_id, %e,
                    "integrity check cannot scan messages");
                continue;
            }
        };
        for msg in msgs {
            report.messages_scanned += 1;
            if content_hash(&msg.payload) != msg.meta.content_hash {
                tracing::warn!(group = %msg.meta.group_id, msg = %msg.meta.msg_id,
                    "integrity check: corrupt message");
                report
                    .corrupt_messages
                    .push((msg.meta.group_id, msg.meta.msg_id));
            }
        }
    }

    tracing::info!(
        groups = report.groups_scanned,
        messages = report.messages_scanned,
        clean = report.is_clean(),
        "integrity check finished"
    );
    report
}

// ---------------------------------------------------------------------------
// Engine wiring
// ---------------------------------------------------------------------------

impl Exchange {
    /// Tick phase: advance housekeeping — at most one cleanup step,
    /// plus integrity-check lifecycle management.
    pub(crate) fn housekeeping_step(&self) {
        let now = Timestamp::now();

        // Message cleanup: start when due, then advance one step per
        // tick until done.
        let cleanup = {
            let mut state = self.lock_state();
            let due = now.secs_since(state.last_cleanup) >= self.config.msg_cleanup_period_secs;
            if state.cleanup.is_none() && !due {
                None
            } else if let Some(task) = state.cleanup.take() {
                Some(task)
            } else {
                match MessageCleanup::new(self.store.as_ref()) {
                    Ok(task) => Some(task),
                    Err(e) => {
                        tracing::warn!(%e, "cannot start message cleanup");
                        state.last_cleanup = now;
                        None
                    }
                }
            }
        };
        if let Some(mut task) = cleanup {
            match task.step(self.store.as_ref(), self.config.message_store_period_secs) {
                Ok(true) => self.lock_state().last_cleanup = now,
                Ok(false) => self.lock_state().cleanup = Some(task),
                Err(e) => {
                    tracing::warn!(%e, "message cleanup aborted");
                    self.lock_state().last_cleanup = now;
                }
            }
        }

        // Integrity check: start when due; join when the worker
        // reports done.
        let action = {
            let mut state = self.lock_state();
            let running_done = state.integrity.as_ref().is_some_and(IntegrityCheck::is_done);
            if running_done {
                state.integrity.take()
            } else if state.integrity.is_none()
                && now.secs_since(state.last_integrity) >= self.config.integrity_check_period_secs
            {
                state.integrity = Some(IntegrityCheck::start(Arc::clone(&self.store)));
                None
            } else {
                None
            }
        };
        if let Some(check) = action {
            if let Some(report) = check.join() {
                if !report.is_clean() {
                    tracing::warn!(
                        corrupt_groups = report.corrupt_groups.len(),
                        corrupt_messages = report.corrupt_messages.len(),
                        "integrity check found corrupt records"
                    );
                }
            }
            self.lock_state().last_integrity = now;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use coterie_protocol::{GroupMeta, MessageMeta};
    use coterie_storage::{MemoryStore, StoredGroup, StoredMessage};

    fn store_with_messages(ages_secs: &[(u8, i64, u32)]) -> MemoryStore {
        let store = MemoryStore::new();
        let group = StoredGroup {
            payload: vec![1],
            meta: GroupMeta {
                group_id: GroupId::new([1; 16]),
                ..GroupMeta::default()
            },
        };
        store.store_groups(vec![group]).expect("store group");

        let now = Timestamp::now();
        let msgs = ages_secs
            .iter()
            .map(|(id, age, status)| StoredMessage {
                payload: vec![*id],
                meta: MessageMeta {
                    group_id: GroupId::new([1; 16]),
                    msg_id: MessageId::new([*id; 32]),
                    publish_ts: Timestamp::from_secs(now.as_secs() - age),
                    msg_status: *status,
                    ..MessageMeta::default()
                },
            })
            .collect();
        store.store_messages(msgs).expect("store messages");
        store
    }

    #[test]
    fn cleanup_evicts_expired_unless_kept() -> Result<()> {
        // Period 100 s: id 1 fresh, id 2 expired, id 3 expired but KEEP.
        let store = store_with_messages(&[
            (1, 10, 0),
            (2, 1_000, 0),
            (3, 1_000, msg_status::KEEP),
        ]);

        let mut cleanup = MessageCleanup::new(&store)?;
        assert!(cleanup.step(&store, 100)?);

        let remaining = store.retrieve_message_ids(&GroupId::new([1; 16]))?;
        assert_eq!(
            remaining,
            vec![MessageId::new([1; 32]), MessageId::new([3; 32])]
        );
        Ok(())
    }

    #[test]
    fn cleanup_on_empty_store_finishes_immediately() -> Result<()> {
        let store = MemoryStore::new();
        let mut cleanup = MessageCleanup::new(&store)?;
        assert!(cleanup.step(&store, 100)?);
        Ok(())
    }

    #[test]
    fn integrity_check_flags_corrupt_hashes() {
        let store = Arc::new(store_with_messages(&[(1, 10, 0)]));
        // Stored content hashes were never set (all zero) so every
        // record reads as corrupt.
        let check = IntegrityCheck::start(store);
        while !check.is_done() {
            std::thread::yield_now();
        }
        let report = check.join().expect("report");
        assert_eq!(report.groups_scanned, 1);
        assert_eq!(report.messages_scanned, 1);
        assert!(!report.is_clean());
    }
}
