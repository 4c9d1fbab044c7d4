//! `/supervisor/rpc/*` — callbacks a worker uses to report task lifecycle
//! events back to the owning supervisor (§4.6). Every route here sits
//! behind [`crate::auth::require_worker_signature`].

use std::collections::HashSet;

use axum::extract::State;
use axum::Json;

use taskmesh_registry::Role;
use taskmesh_rpc::messages::{
    CheckpointParam, InstanceControlParam, StartTaskParam, SubscribeEventParam, TerminateTaskParam,
    UpdateTaskWorkerParam,
};
use taskmesh_store::repository;

use crate::error::ApiError;
use crate::supervisor::SupervisorState;

async fn live_worker_addresses(state: &SupervisorState) -> Result<HashSet<String>, ApiError> {
    Ok(state
        .registry
        .discovered_servers(Role::Worker, None)
        .await?
        .into_iter()
        .map(|s| s.address())
        .collect())
}

pub async fn start_task(State(state): State<SupervisorState>, Json(param): Json<StartTaskParam>) -> Json<bool> {
    match state.state_machine.start_task(param.task_id, &param.worker).await {
        Ok(()) => Json(true),
        Err(err) => {
            tracing::warn!(task_id = param.task_id, error = %err, "startTask rejected");
            Json(false)
        }
    }
}

pub async fn terminate_task(
    State(state): State<SupervisorState>,
    Json(param): Json<TerminateTaskParam>,
) -> Result<Json<bool>, ApiError> {
    let live = live_worker_addresses(&state).await?;
    let mut next_ids = state.ids.as_next_ids();
    let effect = state
        .state_machine
        .terminate_task(param.task_id, param.to_state, param.error_msg.as_deref(), &mut next_ids, &live)
        .await?;
    state.dispatcher.dispatch(effect, &state.state_machine, &mut next_ids).await;
    Ok(Json(true))
}

pub async fn update_task_worker(
    State(state): State<SupervisorState>,
    Json(param): Json<UpdateTaskWorkerParam>,
) -> Result<Json<bool>, ApiError> {
    let updated = repository::tasks::set_worker(&state.pool, param.task_id, &param.worker.to_wire()).await?;
    Ok(Json(updated))
}

pub async fn checkpoint(
    State(state): State<SupervisorState>,
    Json(param): Json<CheckpointParam>,
) -> Result<Json<bool>, ApiError> {
    let Some(snapshot) = param.snapshot else {
        return Ok(Json(true));
    };
    let updated = repository::tasks::set_snapshot(&state.pool, param.task_id, &snapshot).await?;
    Ok(Json(updated))
}

pub async fn pause_instance(
    State(state): State<SupervisorState>,
    Json(param): Json<InstanceControlParam>,
) -> Result<Json<bool>, ApiError> {
    let mut next_ids = state.ids.as_next_ids();
    let effect = state.state_machine.pause(param.instance_id).await?;
    state.dispatcher.dispatch(effect, &state.state_machine, &mut next_ids).await;
    Ok(Json(true))
}

pub async fn cancel_instance(
    State(state): State<SupervisorState>,
    Json(param): Json<InstanceControlParam>,
) -> Result<Json<bool>, ApiError> {
    let mut next_ids = state.ids.as_next_ids();
    let effect = state.state_machine.cancel(param.instance_id).await?;
    state.dispatcher.dispatch(effect, &state.state_machine, &mut next_ids).await;
    Ok(Json(true))
}

/// A worker registers interest in pause/cancel events for an instance it's
/// running. Pause/cancel are themselves delivered as ordinary dispatch
/// intents through `/worker/rpc/receive` (a `DispatchOperation::Pause` or
/// `::Cancel` `ExecuteTaskParam`), so there is no separate push channel to
/// wire up here — this just acknowledges the subscription.
pub async fn subscribe_event(Json(_param): Json<SubscribeEventParam>) -> Json<bool> {
    Json(true)
}
