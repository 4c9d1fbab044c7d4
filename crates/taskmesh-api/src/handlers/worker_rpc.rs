//! `/worker/rpc/*` — the admission and inspection surface a supervisor
//! calls on a worker it has routed (or is considering routing) tasks to.

use axum::extract::State;
use axum::Json;

use taskmesh_rpc::messages::{
    ConfigureWorkerParam, DispatchOperationWire, ExecuteTaskParam, SplitJobParam, SplitJobResult,
    VerifyJobParam, WorkerMetrics,
};

use crate::worker::WorkerState;

/// Admit a task for delayed execution, or — for a PAUSE/CANCEL intent —
/// interrupt it out of band. A task not yet due is simply dropped from the
/// wheel; a task already executing is signaled through the pool, which races
/// its `execute()` future against the control signal and reports back
/// PAUSED or MANUAL_CANCELED once it loses. Either, neither, or both may
/// apply (a task due exactly now could be in either place), so both are
/// always attempted.
pub async fn receive(State(state): State<WorkerState>, Json(param): Json<ExecuteTaskParam>) -> Json<bool> {
    match param.operation {
        DispatchOperationWire::Execute => {
            let ok = state.wheel.offer(param).is_ok();
            Json(ok)
        }
        DispatchOperationWire::Pause | DispatchOperationWire::Cancel => {
            state.wheel.remove(param.task_id, param.trigger_time.timestamp_millis());
            state.pool.signal_executing(param.task_id, param.operation);
            Json(true)
        }
    }
}

/// Whether this worker has an executor registered for `job_id` at all —
/// the per-job registration, not `executor_text` itself, is the worker's
/// unit of capability (see [`taskmesh_dispatch::JobRegistry`]); a mismatched
/// `executor_text` still fails verification.
pub async fn verify(State(state): State<WorkerState>, Json(param): Json<VerifyJobParam>) -> Json<bool> {
    let ok = state
        .job_registry
        .get(param.job_id)
        .is_some_and(|reg| reg.executor_text == param.executor_text);
    Json(ok)
}

/// Pre-split a job param without executing anything. Workers in this
/// implementation don't customize splitting per executor, so this mirrors
/// the supervisor's own comma-delimited [`taskmesh_core::split::split`].
pub async fn split(Json(param): Json<SplitJobParam>) -> Result<Json<SplitJobResult>, axum::http::StatusCode> {
    match taskmesh_core::split::split(param.job_id, param.job_param.as_deref()) {
        Ok(task_params) => Ok(Json(SplitJobResult { task_params })),
        Err(_) => Err(axum::http::StatusCode::BAD_REQUEST),
    }
}

pub async fn metrics(State(state): State<WorkerState>) -> Json<WorkerMetrics> {
    Json(WorkerMetrics {
        worker: state.this_worker.clone(),
        executing_task_count: state.pool.active_count(),
        executor_pool_size: state.pool.pool_size(),
        executor_pool_active: state.pool.active_count(),
    })
}

pub async fn configure(State(state): State<WorkerState>, Json(param): Json<ConfigureWorkerParam>) -> Json<bool> {
    if let Some(size) = param.executor_pool_size {
        state.pool.resize(size);
    }
    Json(true)
}
