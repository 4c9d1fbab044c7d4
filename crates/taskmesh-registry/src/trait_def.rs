//! The `ServiceRegistry` contract — registration plus discovery.
//!
//! Every concrete variant (Redis, Consul, in-memory) implements this trait.
//! The rest of the system (dispatcher, scanners, RPC fabric) is written
//! against the trait only, never against a concrete variant.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::RegistryError;
use crate::model::{RegistryEvent, Role, ServerEndpoint};

/// Registration + discovery, as described in spec §4.5.
///
/// Implementations must be safe to clone cheaply (usually an `Arc` around a
/// connection handle) and to share across scanner/dispatcher tasks.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Publish this node's own endpoint. Idempotent: calling twice just
    /// re-asserts the registration (renews the session TTL).
    async fn register(&self, server: &ServerEndpoint) -> Result<(), RegistryError>;

    /// Remove this node's own endpoint. Idempotent.
    async fn deregister(&self, server: &ServerEndpoint) -> Result<(), RegistryError>;

    /// Sorted list of currently-alive peers of the given role, optionally
    /// filtered to one group (groups only apply to workers).
    ///
    /// Lazily refreshes the underlying cache if `next_refresh_time < now`,
    /// per the contract in spec §4.5 — callers never need to refresh
    /// explicitly.
    async fn discovered_servers(
        &self,
        role: Role,
        group: Option<&str>,
    ) -> Result<Vec<ServerEndpoint>, RegistryError>;

    /// O(log n) membership test against the last refresh. Does not force a
    /// refresh — callers that need up-to-the-moment liveness should call
    /// `discovered_servers` first.
    async fn is_alive(&self, server: &ServerEndpoint) -> Result<bool, RegistryError>;

    /// Subscribe to registration/deregistration events for a role. This is
    /// advisory only — the periodic pull via `discovered_servers` is
    /// authoritative and callers must not assume delivery.
    fn subscribe(&self, role: Role) -> broadcast::Receiver<RegistryEvent>;
}
