//! `taskmesh-core` — domain model and transactional state machine for the
//! scheduling engine.
//!
//! This crate owns the rules: what a job/instance/task is, how a run state
//! is derived from its tasks, how a workflow DAG advances, and what should
//! happen after a retry or a dependency cascade. It never issues an RPC or
//! opens a socket itself — transitions are described as [`effect::Effect`]
//! values that `taskmesh-dispatch`/`taskmesh-supervisor` execute once the
//! owning transaction has committed.

pub mod cascade;
pub mod convert;
pub mod dag;
pub mod effect;
pub mod error;
pub mod idgen;
pub mod lock;
pub mod machine;
pub mod model;
pub mod schedule;
pub mod split;
pub mod workflow;

pub use effect::{DispatchIntent, DispatchOperation, Effect};
pub use error::EngineError;
pub use idgen::SnowflakeGenerator;
pub use lock::InstanceLockTable;
pub use machine::{derive_run_state, StateMachine};
pub use schedule::next_trigger_time;
pub use model::{
    CollisionStrategy, DependEdge, ExecuteState, Instance, InstanceAttach, Job, JobState, JobType,
    RetryType, RouteStrategy, RunState, RunType, Task, TriggerType, WorkflowEdge, END_NODE, START_NODE,
};
