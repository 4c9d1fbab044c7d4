//! RPC fabric error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("registry error: {0}")]
    Registry(#[from] taskmesh_registry::RegistryError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no discovered server available for group {0:?}")]
    NoServerAvailable(Option<String>),

    #[error("call to {method} failed with non-retryable status {status}")]
    NonRetryable { method: String, status: u16 },

    #[error("call to {method} exhausted {attempts} attempts")]
    RetriesExhausted { method: String, attempts: u32 },
}
