//! The Coterie exchange engine.
//!
//! A long-running worker that mints and validates signed groups and
//! messages, persists them through a [`coterie_storage::DataStore`],
//! and decouples callers from disk and crypto work with 32-bit request
//! tokens. The engine is driven by a ~100 ms tick; every public
//! mutation method enqueues work and returns immediately with a token
//! whose status can be polled through the ledger.
//!
//! Tick phases, in order:
//!
//! 1. Group / message meta changes (so write-then-read services
//!    observe their writes).
//! 2. Read-request fulfilment.
//! 3. Group publication, message publication, queued group updates,
//!    group deletes.
//! 4. Received data: groups, then messages, then update validation.
//! 5. Notification flush.
//! 6. Service tick hook.
//! 7. Housekeeping (message cleanup, integrity check).

mod engine;
mod housekeeping;
mod identity;
mod meta_edit;
mod notify;
mod publish;
mod receive;
mod reader;
mod runner;
mod signer;
mod token;

pub mod service;

pub use engine::Exchange;
pub use housekeeping::IntegrityReport;
pub use identity::IdentityService;
pub use notify::{ChangeReason, ChangeSubscriber, MessageChangeMap, Notification};
pub use publish::{GroupDraft, MessageDraft};
pub use reader::{ReadRequest, ReadResult};
pub use runner::{run_exchange_loop, ExchangeHandle};
pub use service::{ExchangeService, ServiceCreate};
pub use signer::SignOutcome;
pub use token::TokenStatus;
