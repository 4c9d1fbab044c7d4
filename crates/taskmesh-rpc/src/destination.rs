//! Point-to-point RPC: invoke one already-known server.

use serde::de::DeserializeOwned;
use serde::Serialize;

use taskmesh_registry::{Role, ServerEndpoint};

use crate::auth::AuthHeaders;
use crate::error::RpcError;
use crate::transport::Transport;

/// Identifies the caller for the purpose of deciding whether auth headers
/// are attached — only a Worker calling a Supervisor signs its request.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub role: Role,
    pub group: String,
    pub worker_token: String,
}

/// Point-to-point proxy: `invoke(server, methodCall)`.
pub struct Destination {
    transport: Transport,
    caller: Option<CallerIdentity>,
}

impl Destination {
    /// `caller` is `None` for calls that never need signing (supervisor→
    /// worker, worker→worker); `Some` identifies a worker calling a
    /// supervisor.
    pub fn new(transport: Transport, caller: Option<CallerIdentity>) -> Self {
        Self { transport, caller }
    }

    pub fn transport_policy(&self) -> crate::transport::RetryPolicy {
        self.transport.policy()
    }

    fn auth_headers_for(&self, callee_role: Role, now_millis: i64) -> Option<AuthHeaders> {
        let caller = self.caller.as_ref()?;
        if caller.role != Role::Worker || callee_role != Role::Supervisor {
            return None;
        }
        Some(AuthHeaders::sign(&caller.worker_token, &caller.group, now_millis))
    }

    /// Invoke `method` (a path under the target's base URL, e.g.
    /// `/worker/rpc/receive`) on `server`.
    pub async fn invoke<Req, Resp>(&self, server: &ServerEndpoint, method: &str, body: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", server.base_url(), method);
        let now_millis = chrono::Utc::now().timestamp_millis();
        let auth = self.auth_headers_for(server.role, now_millis);
        self.transport.post_with_retry(method, &url, body, auth.as_ref()).await
    }
}
