//! Core domain model: jobs, instances, tasks, and the edges that connect
//! them into workflows and dependency chains.
//!
//! These are in-memory domain types, not persistence row structs — the
//! `taskmesh-store` crate owns the row shapes and converts to/from these.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskmesh_registry::ServerEndpoint;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// How a job is triggered into instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// A single instance, split into N independently routed tasks.
    Normal,
    /// A DAG of node instances, materialized from `SchedWorkflow` edges.
    Workflow,
    /// One task per currently-discovered worker of the job's group.
    Broadcast,
}

/// Whether the scanner is allowed to fire a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Enable,
    Disable,
}

/// How `nextTriggerTime` is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Cron,
    Once,
    Period,
    Depend,
    FixedRate,
    FixedDelay,
}

/// How a supervisor picks a worker among a group's discovered peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteStrategy {
    Broadcast,
    RoundRobin,
    Random,
    LeastRecentlyUsed,
    ConsistentHash,
    LocalPriority,
}

/// What happens to a CANCELED instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryType {
    None,
    /// Re-split from `jobParam`, regenerating every task.
    All,
    /// Clone only the failed tasks (broadcast tasks on a now-dead worker are dropped).
    Failed,
}

/// What happens when a job's previous instance is still running at its next fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollisionStrategy {
    Concurrent,
    Serial,
    Override,
    Discard,
}

/// A job definition — the durable template a scanner fires into instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: i64,
    pub group: String,
    pub job_type: JobType,
    pub job_state: JobState,
    pub trigger_type: TriggerType,
    /// Interpreted per `trigger_type` (cron expression, epoch millis, period spec, ...).
    pub trigger_value: String,
    pub route_strategy: RouteStrategy,
    pub retry_type: RetryType,
    pub retry_count: u32,
    pub retry_interval_ms: i64,
    pub collision_strategy: CollisionStrategy,
    /// Class name / bean name / source identifying what the worker should run.
    pub executor_text: String,
    pub job_param: Option<String>,
    pub next_trigger_time: Option<DateTime<Utc>>,
    pub last_trigger_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

/// Why an instance was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunType {
    Schedule,
    Depend,
    Retry,
    Manual,
}

/// Lifecycle state of an instance. Discriminants match the wire/storage
/// encoding used throughout the system (see the data model section of the
/// scheduling design).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum RunState {
    Waiting = 10,
    Running = 20,
    Paused = 30,
    Finished = 40,
    Canceled = 50,
}

impl RunState {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finished | RunState::Canceled)
    }
}

impl TryFrom<i16> for RunState {
    type Error = crate::EngineError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(RunState::Waiting),
            20 => Ok(RunState::Running),
            30 => Ok(RunState::Paused),
            40 => Ok(RunState::Finished),
            50 => Ok(RunState::Canceled),
            other => Err(crate::EngineError::UnknownDiscriminant("RunState", other as i32)),
        }
    }
}

/// One firing of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: i64,
    pub job_id: i64,
    /// Root of the logical chain; invariant across RETRY/DEPEND creation.
    pub rnstance_id: i64,
    /// Immediate predecessor, if this instance was created by retry or cascade.
    pub pnstance_id: Option<i64>,
    /// The workflow lead's instance id, if this instance is a node in a workflow.
    pub wnstance_id: Option<i64>,
    pub run_type: RunType,
    pub trigger_time: DateTime<Utc>,
    pub run_state: RunState,
    pub run_start_time: Option<DateTime<Utc>>,
    pub run_end_time: Option<DateTime<Utc>>,
    pub retried_count: u32,
    /// Optimistic-lock counter; every mutation must CAS on the value it read.
    pub version: i64,
    /// Carries `cur_node` for workflow leads; otherwise empty.
    pub attach: InstanceAttach,
}

/// Free-form per-instance metadata, modeled as a typed JSON payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceAttach {
    /// For workflow leads: the node currently being evaluated.
    pub cur_node: Option<String>,
    /// Populated when an instance is finalized as DATA_INVALID (§7, §9-c):
    /// a sub-tag of CANCELED surfaced via `errorMsg` rather than a distinct state.
    pub error_msg: Option<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Lifecycle state of a task. Discriminants match the wire/storage encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum ExecuteState {
    Waiting = 10,
    Executing = 20,
    Paused = 30,
    Completed = 40,
    DispatchFailed = 50,
    InitException = 51,
    ExecuteFailed = 52,
    ExecuteException = 53,
    ExecuteTimeout = 54,
    ExecuteCollision = 55,
    BroadcastAborted = 56,
    ExecuteAborted = 57,
    ShutdownCanceled = 58,
    ManualCanceled = 59,
}

impl ExecuteState {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// WAITING and EXECUTING are the only non-terminal, non-paused states.
    pub fn is_runnable(self) -> bool {
        matches!(self, ExecuteState::Waiting | ExecuteState::Executing)
    }

    pub fn is_paused(self) -> bool {
        matches!(self, ExecuteState::Paused)
    }

    /// Any state at or past `COMPLETED` is terminal.
    pub fn is_terminal(self) -> bool {
        self.as_i16() >= ExecuteState::Completed.as_i16()
    }

    /// Any terminal state other than `COMPLETED` counts as a failure for
    /// run-state derivation and retry/dependency cascade decisions.
    pub fn is_failure(self) -> bool {
        self.is_terminal() && self != ExecuteState::Completed
    }
}

impl TryFrom<i16> for ExecuteState {
    type Error = crate::EngineError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        use ExecuteState::*;
        Ok(match value {
            10 => Waiting,
            20 => Executing,
            30 => Paused,
            40 => Completed,
            50 => DispatchFailed,
            51 => InitException,
            52 => ExecuteFailed,
            53 => ExecuteException,
            54 => ExecuteTimeout,
            55 => ExecuteCollision,
            56 => BroadcastAborted,
            57 => ExecuteAborted,
            58 => ShutdownCanceled,
            59 => ManualCanceled,
            other => return Err(crate::EngineError::UnknownDiscriminant("ExecuteState", other as i32)),
        })
    }
}

/// A unit of work dispatched to exactly one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub instance_id: i64,
    pub task_no: u32,
    pub task_count: u32,
    pub task_param: Option<String>,
    pub execute_state: ExecuteState,
    /// Set only after a successful `startTask` acknowledgement from that worker.
    pub worker: Option<ServerEndpoint>,
    pub execute_start_time: Option<DateTime<Utc>>,
    pub execute_end_time: Option<DateTime<Utc>>,
    pub execute_snapshot: Option<serde_json::Value>,
    pub dispatch_failed_count: u32,
    pub error_msg: Option<String>,
}

// ---------------------------------------------------------------------------
// Workflow edges
// ---------------------------------------------------------------------------

/// A distinguished node name every workflow graph contains implicitly.
pub const START_NODE: &str = "START";
pub const END_NODE: &str = "END";

/// One edge of a workflow DAG, carrying the run-state of the node instance
/// it targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub wnstance_id: i64,
    pub source_node: String,
    pub target_node: String,
    pub sequence: u32,
    pub run_state: RunState,
    /// The instance materialized for `target_node`, once created.
    pub instance_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Dependency edges
// ---------------------------------------------------------------------------

/// Declares that `child_job_id` should fire a DEPEND instance whenever
/// `parent_job_id` reaches FINISHED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependEdge {
    pub parent_job_id: i64,
    pub child_job_id: i64,
    /// Used as an offset (milliseconds) on the new instance's trigger time so
    /// multiple dependents of the same parent don't collide on
    /// `(jobId, triggerTime, runType)`.
    pub sequence: u32,
}

// ---------------------------------------------------------------------------
// Display / FromStr (human-friendly round trip for config and CLI use)
// ---------------------------------------------------------------------------

macro_rules! screaming_snake_display {
    ($ty:ty, [$($variant:ident => $text:literal),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self {
                    $(<$ty>::$variant => $text,)+
                };
                write!(f, "{s}")
            }
        }

        impl FromStr for $ty {
            type Err = crate::EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(<$ty>::$variant),)+
                    other => Err(crate::EngineError::UnknownVariant(stringify!($ty), other.to_owned())),
                }
            }
        }
    };
}

screaming_snake_display!(JobType, [Normal => "NORMAL", Workflow => "WORKFLOW", Broadcast => "BROADCAST"]);
screaming_snake_display!(JobState, [Enable => "ENABLE", Disable => "DISABLE"]);
screaming_snake_display!(TriggerType, [
    Cron => "CRON", Once => "ONCE", Period => "PERIOD",
    Depend => "DEPEND", FixedRate => "FIXED_RATE", FixedDelay => "FIXED_DELAY",
]);
screaming_snake_display!(RouteStrategy, [
    Broadcast => "BROADCAST", RoundRobin => "ROUND_ROBIN", Random => "RANDOM",
    LeastRecentlyUsed => "LEAST_RECENTLY_USED", ConsistentHash => "CONSISTENT_HASH",
    LocalPriority => "LOCAL_PRIORITY",
]);
screaming_snake_display!(RetryType, [None => "NONE", All => "ALL", Failed => "FAILED"]);
screaming_snake_display!(CollisionStrategy, [
    Concurrent => "CONCURRENT", Serial => "SERIAL", Override => "OVERRIDE", Discard => "DISCARD",
]);
screaming_snake_display!(RunType, [Schedule => "SCHEDULE", Depend => "DEPEND", Retry => "RETRY", Manual => "MANUAL"]);
