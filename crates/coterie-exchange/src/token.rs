//! Token ledger: the asynchronous boundary between callers and the
//! engine.
//!
//! Every request mints an opaque 32-bit token whose status the caller
//! polls. Publication requests additionally record an
//! **acknowledgement payload** (the id of what was published), which
//! the caller consumes exactly once through the acknowledge contract —
//! consuming it also disposes the token.
//!
//! The ledger carries its own lock so `mint` never contends with a
//! running tick.

use std::collections::BTreeMap;
use std::sync::Mutex;

use coterie_types::{GroupId, MessageId, Token};
use serde::{Deserialize, Serialize};

use crate::reader::{ReadRequest, ReadResult};

// ---------------------------------------------------------------------------
// TokenStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a request token.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TokenStatus {
    /// Queued; the engine has not finished processing it.
    Pending,
    /// Some but not all of the requested data is available.
    Partial,
    /// Processing finished successfully.
    Complete,
    /// Processing failed; see the engine log for the cause.
    Failed,
    /// The caller cancelled the request. The queued work still runs
    /// but produces no output.
    Cancelled,
}

impl TokenStatus {
    /// Returns true for statuses that will never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// TokenLedger
// ---------------------------------------------------------------------------

struct LedgerInner {
    next_raw: u32,
    statuses: BTreeMap<Token, TokenStatus>,
    read_requests: Vec<(Token, ReadRequest)>,
    read_results: BTreeMap<Token, ReadResult>,
    group_acks: BTreeMap<Token, GroupId>,
    msg_acks: BTreeMap<Token, (GroupId, MessageId)>,
}

/// Mints tokens and tracks their lifecycle.
pub(crate) struct TokenLedger {
    inner: Mutex<LedgerInner>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                next_raw: 0,
                statuses: BTreeMap::new(),
                read_requests: Vec::new(),
                read_results: BTreeMap::new(),
                group_acks: BTreeMap::new(),
                msg_acks: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerInner> {
        // A poisoned ledger lock means a panic mid-update; propagating
        // the panic is the only sane option.
        self.inner.lock().expect("token ledger lock poisoned")
    }

    /// Mints a fresh pending token. Never blocks on engine work.
    pub fn mint(&self) -> Token {
        let mut inner = self.lock();
        inner.next_raw = inner.next_raw.wrapping_add(1);
        if inner.next_raw == 0 {
            inner.next_raw = 1;
        }
        let token = Token::new(inner.next_raw);
        inner.statuses.insert(token, TokenStatus::Pending);
        token
    }

    /// Returns the status of `token`, or `None` after disposal.
    pub fn status(&self, token: Token) -> Option<TokenStatus> {
        self.lock().statuses.get(&token).copied()
    }

    /// Transitions `token` to `status`. Cancelled tokens stay
    /// cancelled; disposed tokens are ignored.
    pub fn set_status(&self, token: Token, status: TokenStatus) {
        let mut inner = self.lock();
        match inner.statuses.get_mut(&token) {
            Some(current) if *current != TokenStatus::Cancelled => *current = status,
            _ => {}
        }
    }

    /// Cancels a non-terminal token. Returns false if the token is
    /// unknown or already terminal.
    pub fn cancel(&self, token: Token) -> bool {
        let mut inner = self.lock();
        match inner.statuses.get_mut(&token) {
            Some(status) if !status.is_terminal() => {
                *status = TokenStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Returns true if the token was cancelled.
    pub fn is_cancelled(&self, token: Token) -> bool {
        self.status(token) == Some(TokenStatus::Cancelled)
    }

    /// Releases the token and everything recorded under it.
    pub fn dispose(&self, token: Token) {
        let mut inner = self.lock();
        inner.statuses.remove(&token);
        inner.read_results.remove(&token);
        inner.group_acks.remove(&token);
        inner.msg_acks.remove(&token);
    }

    // -- read requests ------------------------------------------------------

    /// Records the request descriptor of a read token.
    pub fn queue_read(&self, token: Token, request: ReadRequest) {
        self.lock().read_requests.push((token, request));
    }

    /// Drains all queued read requests in FIFO order.
    pub fn take_read_requests(&self) -> Vec<(Token, ReadRequest)> {
        std::mem::take(&mut self.lock().read_requests)
    }

    /// Stores a fulfilled read result, unless the token was cancelled.
    pub fn put_read_result(&self, token: Token, result: ReadResult) {
        let mut inner = self.lock();
        if inner.statuses.get(&token) != Some(&TokenStatus::Cancelled) {
            inner.read_results.insert(token, result);
        }
    }

    /// Consumes the result of a completed (or partially fulfilled)
    /// read token, disposing the token. Returns `None` while pending
    /// or after failure.
    pub fn take_read_result(&self, token: Token) -> Option<ReadResult> {
        let mut inner = self.lock();
        if !matches!(
            inner.statuses.get(&token),
            Some(TokenStatus::Complete | TokenStatus::Partial)
        ) {
            return None;
        }
        let result = inner.read_results.remove(&token);
        if result.is_some() {
            inner.statuses.remove(&token);
            inner.group_acks.remove(&token);
            inner.msg_acks.remove(&token);
        }
        result
    }

    // -- acknowledgement payloads ------------------------------------------

    /// Records the group id a publication token resolves to.
    pub fn record_group_ack(&self, token: Token, group_id: GroupId) {
        self.lock().group_acks.insert(token, group_id);
    }

    /// Records the (group, message) pair a message-publication token
    /// resolves to.
    pub fn record_msg_ack(&self, token: Token, ids: (GroupId, MessageId)) {
        self.lock().msg_acks.insert(token, ids);
    }

    /// Consumes the group acknowledgement for `token`, disposing the
    /// token. A second call for the same token returns `None`.
    pub fn acknowledge_group(&self, token: Token) -> Option<GroupId> {
        let mut inner = self.lock();
        let group_id = inner.group_acks.remove(&token)?;
        inner.statuses.remove(&token);
        inner.read_results.remove(&token);
        Some(group_id)
    }

    /// Consumes the message acknowledgement for `token`, disposing the
    /// token.
    pub fn acknowledge_message(&self, token: Token) -> Option<(GroupId, MessageId)> {
        let mut inner = self.lock();
        let ids = inner.msg_acks.remove(&token)?;
        inner.statuses.remove(&token);
        inner.read_results.remove(&token);
        Some(ids)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
