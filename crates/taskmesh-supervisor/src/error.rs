//! Typed error type for the supervisor crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("engine error: {0}")]
    Engine(#[from] taskmesh_core::EngineError),

    #[error("store error: {0}")]
    Store(#[from] taskmesh_store::StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] taskmesh_registry::RegistryError),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}
