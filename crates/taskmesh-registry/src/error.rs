//! Registry error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("consul transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("registry operation timed out")]
    Timeout,

    #[error("no such endpoint registered: {0}")]
    NotFound(String),
}
