//! Identity service contract.
//!
//! Author signatures are made with keys owned by an external identity
//! service, not by the exchange. Key fetches are asynchronous: the
//! request variants are fire-and-forget, and the signature authority
//! answers `TryLater` until the key shows up (or the retry cap kills
//! the attempt).

use coterie_crypto::{Keypair, PublicKey};
use coterie_types::{IdentityId, PeerId};

/// External signing-identity provider consumed by the signature
/// authority.
pub trait IdentityService: Send + Sync {
    /// Returns true if the public key of `id` is available locally.
    fn has_key(&self, id: &IdentityId) -> bool;

    /// Returns true if the private key of `id` is available locally.
    fn has_private_key(&self, id: &IdentityId) -> bool;

    /// Fetches the public key of `id`, if cached.
    fn key(&self, id: &IdentityId) -> Option<PublicKey>;

    /// Fetches the private key of `id`, if held.
    fn private_key(&self, id: &IdentityId) -> Option<Keypair>;

    /// Requests the public key of `id` from the given peers.
    /// Fire-and-forget; the engine retries later.
    fn request_key(&self, id: &IdentityId, peers: &[PeerId]);

    /// Requests the private key of `id`. Fire-and-forget.
    fn request_private_key(&self, id: &IdentityId);
}
