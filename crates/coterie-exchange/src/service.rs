//! Hooks produced by the exchange for the enclosing service.
//!
//! A service embedding an exchange customizes two points: group
//! finalization during publication and a once-per-tick callback. Both
//! default to no-ops so a bare exchange works out of the box (and in
//! tests).

use coterie_protocol::KeySet;

use crate::publish::GroupDraft;

/// Outcome of the service-create hook.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceCreate {
    /// The draft is ready to sign and store.
    Success,
    /// The draft is unusable; fail the token.
    Fail,
    /// The service is missing something transient; retry next tick
    /// until the publication timeout.
    FailTryLater,
}

/// Service-specific hooks invoked by the engine.
pub trait ExchangeService: Send + Sync {
    /// Invoked during group publication, after key generation and
    /// before signing. The service may rewrite the draft (e.g. embed
    /// key material into its payload).
    fn create_group(&self, _draft: &mut GroupDraft, _keys: &KeySet) -> ServiceCreate {
        ServiceCreate::Success
    }

    /// Called once per tick, after the notification flush.
    fn tick(&self) {}
}

/// The no-op service used when an embedder registers nothing.
pub struct NullService;

impl ExchangeService for NullService {}
