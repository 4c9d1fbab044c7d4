//! `/api/v1/instances/:id/{pause,cancel,resume}` — manual instance control.

use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::error::ApiError;
use crate::supervisor::SupervisorState;

pub async fn pause(Path(instance_id): Path<i64>, State(state): State<SupervisorState>) -> Result<StatusCode, ApiError> {
    let mut next_ids = state.ids.as_next_ids();
    let effect = state.state_machine.pause(instance_id).await?;
    state.dispatcher.dispatch(effect, &state.state_machine, &mut next_ids).await;
    Ok(StatusCode::ACCEPTED)
}

pub async fn cancel(Path(instance_id): Path<i64>, State(state): State<SupervisorState>) -> Result<StatusCode, ApiError> {
    let mut next_ids = state.ids.as_next_ids();
    let effect = state.state_machine.cancel(instance_id).await?;
    state.dispatcher.dispatch(effect, &state.state_machine, &mut next_ids).await;
    Ok(StatusCode::ACCEPTED)
}

pub async fn resume(Path(instance_id): Path<i64>, State(state): State<SupervisorState>) -> Result<StatusCode, ApiError> {
    let mut next_ids = state.ids.as_next_ids();
    let effect = state.state_machine.resume(instance_id).await?;
    state.dispatcher.dispatch(effect, &state.state_machine, &mut next_ids).await;
    Ok(StatusCode::ACCEPTED)
}
