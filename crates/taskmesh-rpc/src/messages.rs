//! Wire DTOs exchanged over `/worker/rpc/*` and `/supervisor/rpc/*`.
//!
//! These are deliberately flat, `Serialize`/`Deserialize` structs distinct
//! from the domain types in `taskmesh_core::model` — the wire shape is a
//! public contract the rest of the system must not couple to internal
//! representation changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskmesh_core::{ExecuteState, JobType, RouteStrategy};
use taskmesh_registry::ServerEndpoint;

/// What a worker is being asked to do with the task it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchOperationWire {
    Execute,
    Pause,
    Cancel,
}

/// `POST /worker/rpc/receive` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTaskParam {
    pub task_id: i64,
    pub instance_id: i64,
    pub wnstance_id: Option<i64>,
    pub job_id: i64,
    pub trigger_time: DateTime<Utc>,
    pub execute_timeout_ms: Option<i64>,
    pub operation: DispatchOperationWire,
    pub route_strategy: RouteStrategy,
    pub worker: ServerEndpoint,
    pub job_type: JobType,
    pub job_param: Option<String>,
}

/// `POST /worker/rpc/verify` body — asks a worker whether it can still run
/// the given executor text before a dispatch commits it to that worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyJobParam {
    pub job_id: i64,
    pub executor_text: String,
}

/// `POST /worker/rpc/split` body — asks a worker to pre-split a job param
/// into per-task params without executing anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitJobParam {
    pub job_id: i64,
    pub job_param: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitJobResult {
    pub task_params: Vec<Option<String>>,
}

/// `GET /worker/rpc/metrics` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetrics {
    pub worker: ServerEndpoint,
    pub executing_task_count: u32,
    pub executor_pool_size: u32,
    pub executor_pool_active: u32,
}

/// `POST /worker/rpc/configure` body — runtime-adjustable worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureWorkerParam {
    pub executor_pool_size: Option<u32>,
}

/// `POST /supervisor/rpc/startTask` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskParam {
    pub task_id: i64,
    pub instance_id: i64,
    pub worker: ServerEndpoint,
}

/// `POST /supervisor/rpc/terminateTask` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateTaskParam {
    pub task_id: i64,
    pub instance_id: i64,
    pub wnstance_id: Option<i64>,
    pub to_state: ExecuteState,
    pub error_msg: Option<String>,
    pub operation: DispatchOperationWire,
}

/// `POST /supervisor/rpc/updateTaskWorker` body — a worker reassigns itself
/// mid-flight (e.g. after a local restart that changed its port).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskWorkerParam {
    pub task_id: i64,
    pub worker: ServerEndpoint,
}

/// `POST /supervisor/rpc/checkpoint` body — periodic liveness + progress
/// ping for a long-running task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointParam {
    pub task_id: i64,
    pub snapshot: Option<serde_json::Value>,
}

/// `POST /supervisor/rpc/pauseInstance` / `/cancelInstance` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceControlParam {
    pub instance_id: i64,
}

/// `POST /supervisor/rpc/subscribeEvent` body — a worker asks to be
/// notified of control events (pause/cancel) for an instance it is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeEventParam {
    pub instance_id: i64,
    pub worker: ServerEndpoint,
}
