//! Group-load-balanced RPC: invoke any currently-discovered server of a
//! group, picking a random starting index and rotating round-robin across
//! retries.

use std::sync::Arc;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use taskmesh_registry::{Role, ServiceRegistry};

use crate::destination::{CallerIdentity, Destination};
use crate::error::RpcError;
use crate::transport::Transport;

/// Group-load-balanced proxy: `invoke(group, methodCall)`.
pub struct Discovery {
    registry: Arc<dyn ServiceRegistry>,
    destination: Destination,
    role: Role,
}

impl Discovery {
    pub fn new(registry: Arc<dyn ServiceRegistry>, transport: Transport, caller: Option<CallerIdentity>, role: Role) -> Self {
        Self {
            registry,
            destination: Destination::new(transport, caller),
            role,
        }
    }

    /// Invoke `method` on a server of `group`, trying up to `max_count`
    /// discovered peers starting from a random index, stopping early on a
    /// non-retryable HTTP status.
    pub async fn invoke<Req, Resp>(&self, group: &str, method: &str, body: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let servers = self.registry.discovered_servers(self.role, Some(group)).await?;
        if servers.is_empty() {
            return Err(RpcError::NoServerAvailable(Some(group.to_owned())));
        }

        let max_count = self.destination.transport_policy().max_count;
        let start = rand::thread_rng().gen_range(0..servers.len());
        let mut last_err = None;

        for i in 0..max_count.min(servers.len() as u32) {
            let server = &servers[(start + i as usize) % servers.len()];
            match self.destination.invoke(server, method, body).await {
                Ok(resp) => return Ok(resp),
                // A non-retryable HTTP status is an application-level
                // rejection, not a server-health signal — rotating to
                // another peer wouldn't help, so stop immediately.
                Err(err @ RpcError::NonRetryable { .. }) => return Err(err),
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or(RpcError::NoServerAvailable(Some(group.to_owned()))))
    }
}
