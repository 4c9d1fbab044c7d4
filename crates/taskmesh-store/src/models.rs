//! Row structs that map onto the six `sched_*` tables.
//!
//! These are *persistence* models — plain columns, no behaviour and no
//! dependency on the domain enums in `taskmesh-core` (that dependency runs
//! the other way: core depends on store, not store on core). Callers decode
//! the `String`/`i16` discriminant columns into domain enums themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted job definition row (`sched_job`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub job_id: i64,
    pub group_name: String,
    pub job_type: String,
    pub job_state: String,
    pub trigger_type: String,
    pub trigger_value: String,
    pub route_strategy: String,
    pub retry_type: String,
    pub retry_count: i32,
    pub retry_interval_ms: i64,
    pub collision_strategy: String,
    pub executor_text: String,
    pub job_param: Option<String>,
    pub next_trigger_time: Option<DateTime<Utc>>,
    pub last_trigger_time: Option<DateTime<Utc>>,
}

/// A persisted instance row (`sched_instance`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstanceRow {
    pub instance_id: i64,
    pub job_id: i64,
    pub rnstance_id: i64,
    pub pnstance_id: Option<i64>,
    pub wnstance_id: Option<i64>,
    pub run_type: String,
    pub trigger_time: DateTime<Utc>,
    pub run_state: i16,
    pub run_start_time: Option<DateTime<Utc>>,
    pub run_end_time: Option<DateTime<Utc>>,
    pub retried_count: i32,
    pub version: i64,
    /// JSON-encoded `InstanceAttach`.
    pub attach: Option<serde_json::Value>,
}

/// A persisted task row (`sched_task`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRow {
    pub task_id: i64,
    pub instance_id: i64,
    pub task_no: i32,
    pub task_count: i32,
    pub task_param: Option<String>,
    pub execute_state: i16,
    /// Wire-encoded `ServerEndpoint` (see `ServerEndpoint::to_wire`), `NULL`
    /// until a successful `startTask` acknowledgement.
    pub worker: Option<String>,
    pub execute_start_time: Option<DateTime<Utc>>,
    pub execute_end_time: Option<DateTime<Utc>>,
    pub execute_snapshot: Option<serde_json::Value>,
    pub dispatch_failed_count: i32,
    pub error_msg: Option<String>,
}

/// A persisted workflow edge row (`sched_workflow`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowEdgeRow {
    pub wnstance_id: i64,
    pub source_node: String,
    pub target_node: String,
    pub sequence: i32,
    pub run_state: i16,
    pub instance_id: Option<i64>,
}

/// A persisted dependency edge row (`sched_depend`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DependEdgeRow {
    pub parent_job_id: i64,
    pub child_job_id: i64,
    pub sequence: i32,
}

/// A persisted group row (`sched_group`) — the administrative partition a
/// job and its workers belong to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GroupRow {
    pub group_name: String,
    pub description: Option<String>,
}
