//! `/api/v1/jobs` — job definition CRUD.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use taskmesh_core::model::{
    CollisionStrategy, Job, JobState, JobType, RetryType, RouteStrategy, TriggerType,
};
use taskmesh_store::models::JobRow;
use taskmesh_store::repository;

use crate::error::ApiError;
use crate::supervisor::SupervisorState;

#[derive(Debug, Deserialize)]
pub struct CreateJobDto {
    pub group: String,
    pub job_type: JobType,
    pub trigger_type: TriggerType,
    pub trigger_value: String,
    #[serde(default = "default_route_strategy")]
    pub route_strategy: RouteStrategy,
    #[serde(default = "default_retry_type")]
    pub retry_type: RetryType,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_interval_ms: i64,
    #[serde(default = "default_collision_strategy")]
    pub collision_strategy: CollisionStrategy,
    pub executor_text: String,
    pub job_param: Option<String>,
}

fn default_route_strategy() -> RouteStrategy {
    RouteStrategy::RoundRobin
}
fn default_retry_type() -> RetryType {
    RetryType::None
}
fn default_collision_strategy() -> CollisionStrategy {
    CollisionStrategy::Concurrent
}

pub async fn list(State(state): State<SupervisorState>) -> Result<Json<Vec<JobRow>>, ApiError> {
    let rows = repository::jobs::list_jobs(&state.pool, None).await?;
    Ok(Json(rows))
}

pub async fn get(Path(job_id): Path<i64>, State(state): State<SupervisorState>) -> Result<Json<JobRow>, ApiError> {
    let row = repository::jobs::get_job(&state.pool, job_id).await?;
    Ok(Json(row))
}

pub async fn create(
    State(state): State<SupervisorState>,
    Json(dto): Json<CreateJobDto>,
) -> Result<(StatusCode, Json<JobRow>), ApiError> {
    let mut next_id = state.ids.as_next_ids();
    let job_id = next_id();
    let mut job = Job {
        job_id,
        group: dto.group,
        job_type: dto.job_type,
        job_state: JobState::Enable,
        trigger_type: dto.trigger_type,
        trigger_value: dto.trigger_value,
        route_strategy: dto.route_strategy,
        retry_type: dto.retry_type,
        retry_count: dto.retry_count,
        retry_interval_ms: dto.retry_interval_ms,
        collision_strategy: dto.collision_strategy,
        executor_text: dto.executor_text,
        job_param: dto.job_param,
        next_trigger_time: None,
        last_trigger_time: None,
    };
    job.next_trigger_time = taskmesh_core::next_trigger_time(&job, Utc::now())
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let row = JobRow::from(&job);
    repository::jobs::insert_job(&state.pool, &row).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn delete(Path(job_id): Path<i64>, State(state): State<SupervisorState>) -> Result<StatusCode, ApiError> {
    if repository::instances::has_active_for_job(&state.pool, job_id).await? {
        return Err(ApiError::BadRequest(format!("job {job_id} still has active instances")));
    }
    state.state_machine.delete_job(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledDto {
    pub enabled: bool,
}

pub async fn set_enabled(
    Path(job_id): Path<i64>,
    State(state): State<SupervisorState>,
    Json(dto): Json<SetEnabledDto>,
) -> Result<StatusCode, ApiError> {
    let next_trigger_time = if dto.enabled {
        let row = repository::jobs::get_job(&state.pool, job_id).await?;
        let job: Job = row.try_into()?;
        taskmesh_core::next_trigger_time(&job, Utc::now()).map_err(|err| ApiError::BadRequest(err.to_string()))?
    } else {
        None
    };
    let job_state = if dto.enabled { "ENABLE" } else { "DISABLE" };
    let updated = repository::jobs::set_job_state(&state.pool, job_id, job_state, next_trigger_time).await?;
    if !updated {
        return Err(ApiError::Store(taskmesh_store::StoreError::NotFound));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_job_dto_fills_in_defaults() {
        let dto: CreateJobDto = serde_json::from_value(serde_json::json!({
            "group": "default",
            "job_type": "NORMAL",
            "trigger_type": "CRON",
            "trigger_value": "0 0 * * * *",
            "executor_text": "echo hi",
            "job_param": null,
        }))
        .unwrap();

        assert_eq!(dto.route_strategy, RouteStrategy::RoundRobin);
        assert_eq!(dto.retry_type, RetryType::None);
        assert_eq!(dto.collision_strategy, CollisionStrategy::Concurrent);
        assert_eq!(dto.retry_count, 0);
        assert_eq!(dto.retry_interval_ms, 0);
    }

    #[test]
    fn create_job_dto_keeps_explicit_values() {
        let dto: CreateJobDto = serde_json::from_value(serde_json::json!({
            "group": "default",
            "job_type": "NORMAL",
            "trigger_type": "CRON",
            "trigger_value": "0 0 * * * *",
            "route_strategy": "CONSISTENT_HASH",
            "retry_type": "ALL",
            "retry_count": 3,
            "executor_text": "echo hi",
            "job_param": null,
        }))
        .unwrap();

        assert_eq!(dto.route_strategy, RouteStrategy::ConsistentHash);
        assert_eq!(dto.retry_type, RetryType::All);
        assert_eq!(dto.retry_count, 3);
    }
}
