//! Dispatch pipeline error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("rpc error: {0}")]
    Rpc(#[from] taskmesh_rpc::RpcError),

    #[error("registry error: {0}")]
    Registry(#[from] taskmesh_registry::RegistryError),

    #[error("store error: {0}")]
    Store(#[from] taskmesh_store::StoreError),

    #[error("engine error: {0}")]
    Engine(#[from] taskmesh_core::EngineError),

    #[error("no worker discovered for group {0}")]
    NoWorkerAvailable(String),

    #[error("timing wheel ring overflowed at bucket {0}")]
    RingOverflow(usize),

    #[error("task {0} received by the wrong worker")]
    WrongWorker(i64),
}
