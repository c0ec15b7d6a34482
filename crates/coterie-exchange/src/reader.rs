//! Data-access front-end: token-based reads.
//!
//! A read request mints a token and records its descriptor in the
//! ledger; the tick fulfils queued descriptors from the store and
//! parks results under the token. The caller polls the token status
//! and consumes the result, which disposes the token.

use std::collections::BTreeMap;

use coterie_protocol::{GroupMeta, MessageMeta};
use coterie_storage::{MessageReq, StoredGroup, StoredMessage};
use coterie_types::{GroupId, MessageId, Token};

use crate::engine::Exchange;
use crate::token::TokenStatus;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Descriptor of a queued read. Empty id lists select everything in
/// scope.
#[derive(Clone, Debug)]
pub enum ReadRequest {
    /// All stored group ids.
    GroupIds,
    /// Metas of the named groups (all groups when empty).
    GroupMeta(Vec<GroupId>),
    /// Full records of the named groups (all groups when empty).
    GroupData(Vec<GroupId>),
    /// Message ids of one group.
    MessageIds(GroupId),
    /// Message metas per the request map.
    MessageMeta(MessageReq),
    /// Full message records per the request map.
    MessageData(MessageReq),
}

/// Result parked under a completed read token.
#[derive(Clone, Debug)]
pub enum ReadResult {
    /// Stored group ids.
    GroupIds(Vec<GroupId>),
    /// Group metas.
    GroupMeta(Vec<GroupMeta>),
    /// Full group records.
    GroupData(Vec<StoredGroup>),
    /// Message ids of the requested group.
    MessageIds(Vec<MessageId>),
    /// Message metas per group.
    MessageMeta(BTreeMap<GroupId, Vec<MessageMeta>>),
    /// Full message records per group.
    MessageData(BTreeMap<GroupId, Vec<StoredMessage>>),
}

// ---------------------------------------------------------------------------
// Front-end
// ---------------------------------------------------------------------------

impl Exchange {
    fn queue_read(&self, request: ReadRequest) -> Token {
        let token = self.ledger.mint();
        self.ledger.queue_read(token, request);
        token
    }

    /// Requests the list of all stored group ids.
    pub fn request_group_ids(&self) -> Token {
        self.queue_read(ReadRequest::GroupIds)
    }

    /// Requests group metas; an empty slice selects all groups.
    pub fn request_group_meta(&self, ids: &[GroupId]) -> Token {
        self.queue_read(ReadRequest::GroupMeta(ids.to_vec()))
    }

    /// Requests full group records; an empty slice selects all groups.
    pub fn request_group_data(&self, ids: &[GroupId]) -> Token {
        self.queue_read(ReadRequest::GroupData(ids.to_vec()))
    }

    /// Requests the message ids of one group.
    pub fn request_message_ids(&self, group_id: GroupId) -> Token {
        self.queue_read(ReadRequest::MessageIds(group_id))
    }

    /// Requests message metas; empty id lists select whole groups.
    pub fn request_message_meta(&self, req: MessageReq) -> Token {
        self.queue_read(ReadRequest::MessageMeta(req))
    }

    /// Requests full message records.
    pub fn request_message_data(&self, req: MessageReq) -> Token {
        self.queue_read(ReadRequest::MessageData(req))
    }

    /// Tick phase: fulfil queued read requests. The queue is drained
    /// under the ledger lock; store fetches run without it.
    ///
    /// Explicit id requests that come back under-filled (some ids
    /// unknown to the store) finish as `Partial`; the result is still
    /// consumable.
    pub(crate) fn drain_read_requests(&self) {
        let requests = self.ledger.take_read_requests();
        for (token, request) in requests {
            if self.ledger.is_cancelled(token) {
                continue;
            }
            let mut requested: Option<usize> = None;
            if let ReadRequest::GroupMeta(ids) | ReadRequest::GroupData(ids) = &request {
                if !ids.is_empty() {
                    requested = Some(ids.len());
                }
            }
            let result = match request {
                ReadRequest::GroupIds => self
                    .store
                    .retrieve_group_ids()
                    .map(ReadResult::GroupIds),
                ReadRequest::GroupMeta(ids) => self
                    .store
                    .retrieve_group_meta(&ids)
                    .map(|metas| ReadResult::GroupMeta(metas.into_values().collect())),
                ReadRequest::GroupData(ids) => self
                    .store
                    .retrieve_group_data(&ids)
                    .map(ReadResult::GroupData),
                ReadRequest::MessageIds(group_id) => self
                    .store
                    .retrieve_message_ids(&group_id)
                    .map(ReadResult::MessageIds),
                ReadRequest::MessageMeta(req) => self
                    .store
                    .retrieve_message_meta(&req)
                    .map(ReadResult::MessageMeta),
                ReadRequest::MessageData(req) => self
                    .store
                    .retrieve_message_data(&req)
                    .map(ReadResult::MessageData),
            };
            match result {
                Ok(result) => {
                    let delivered = match &result {
                        ReadResult::GroupMeta(metas) => Some(metas.len()),
                        ReadResult::GroupData(groups) => Some(groups.len()),
                        _ => None,
                    };
                    let status = match (requested, delivered) {
                        (Some(want), Some(got)) if got < want => TokenStatus::Partial,
                        _ => TokenStatus::Complete,
                    };
                    self.ledger.put_read_result(token, result);
                    self.ledger.set_status(token, status);
                }
                Err(e) => {
                    tracing::warn!(%token, %e, "read request failed");
                    self.ledger.set_status(token, TokenStatus::Failed);
                }
            }
        }
    }

    // -- result accessors ---------------------------------------------------

    /// Consumes the result of a completed group-id read.
    pub fn group_ids(&self, token: Token) -> Option<Vec<GroupId>> {
        match self.ledger.take_read_result(token)? {
            ReadResult::GroupIds(ids) => Some(ids),
            _ => None,
        }
    }

    /// Consumes the result of a completed group-meta read.
    pub fn group_meta(&self, token: Token) -> Option<Vec<GroupMeta>> {
        match self.ledger.take_read_result(token)? {
            ReadResult::GroupMeta(metas) => Some(metas),
            _ => None,
        }
    }

    /// Consumes the result of a completed group-data read.
    pub fn group_data(&self, token: Token) -> Option<Vec<StoredGroup>> {
        match self.ledger.take_read_result(token)? {
            ReadResult::GroupData(groups) => Some(groups),
            _ => None,
        }
    }

    /// Consumes the result of a completed message-id read.
    pub fn message_ids(&self, token: Token) -> Option<Vec<MessageId>> {
        match self.ledger.take_read_result(token)? {
            ReadResult::MessageIds(ids) => Some(ids),
            _ => None,
        }
    }

    /// Consumes the result of a completed message-meta read.
    pub fn message_meta(&self, token: Token) -> Option<BTreeMap<GroupId, Vec<MessageMeta>>> {
        match self.ledger.take_read_result(token)? {
            ReadResult::MessageMeta(metas) => Some(metas),
            _ => None,
        }
    }

    /// Consumes the result of a completed message-data read.
    pub fn message_data(&self, token: Token) -> Option<BTreeMap<GroupId, Vec<StoredMessage>>> {
        match self.ledger.take_read_result(token)? {
            ReadResult::MessageData(msgs) => Some(msgs),
            _ => None,
        }
    }
}
