//! `taskmesh-store` — pure persistence layer for the scheduling tables.
//!
//! Provides a connection pool, typed row structs, and repository functions
//! for `sched_job`, `sched_instance`, `sched_task`, `sched_workflow`,
//! `sched_depend`, and `sched_group`. No business logic lives here — the
//! state machine in `taskmesh-core` composes these functions inside its own
//! transactions.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::StoreError;
pub use pool::DbPool;
