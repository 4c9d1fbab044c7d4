//! Repository functions — one function per database operation.
//!
//! Every function accepts an `impl PgExecutor<'_>` so callers can pass
//! either a bare `&DbPool` (for independent reads) or a `&mut Transaction`
//! (for the row-locked read-then-CAS sequences the state machine needs).
//! No business logic, no domain enums — pure SQL and row structs.

pub mod depend;
pub mod group;
pub mod instances;
pub mod jobs;
pub mod tasks;
pub mod workflow;
