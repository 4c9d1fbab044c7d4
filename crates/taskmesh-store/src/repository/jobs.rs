//! `sched_job` repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::{models::JobRow, StoreError};

/// Insert a freshly created job definition.
pub async fn insert_job(executor: impl PgExecutor<'_>, row: &JobRow) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sched_job
            (job_id, group_name, job_type, job_state, trigger_type, trigger_value,
             route_strategy, retry_type, retry_count, retry_interval_ms,
             collision_strategy, executor_text, job_param, next_trigger_time, last_trigger_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(row.job_id)
    .bind(&row.group_name)
    .bind(&row.job_type)
    .bind(&row.job_state)
    .bind(&row.trigger_type)
    .bind(&row.trigger_value)
    .bind(&row.route_strategy)
    .bind(&row.retry_type)
    .bind(row.retry_count)
    .bind(row.retry_interval_ms)
    .bind(&row.collision_strategy)
    .bind(&row.executor_text)
    .bind(&row.job_param)
    .bind(row.next_trigger_time)
    .bind(row.last_trigger_time)
    .execute(executor)
    .await?;
    Ok(())
}

/// All job definitions in a group, newest-id first; `group` of `None` lists
/// every group.
pub async fn list_jobs(executor: impl PgExecutor<'_>, group: Option<&str>) -> Result<Vec<JobRow>, StoreError> {
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT job_id, group_name, job_type, job_state, trigger_type, trigger_value,
               route_strategy, retry_type, retry_count, retry_interval_ms,
               collision_strategy, executor_text, job_param, next_trigger_time, last_trigger_time
        FROM sched_job
        WHERE $1::text IS NULL OR group_name = $1
        ORDER BY job_id DESC
        "#,
    )
    .bind(group)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Flip a job's `job_state` (ENABLE/DISABLE), clearing `next_trigger_time`
/// when disabling so a stale schedule can't re-fire once re-enabled without
/// first recomputing it.
pub async fn set_job_state(
    executor: impl PgExecutor<'_>,
    job_id: i64,
    job_state: &str,
    next_trigger_time: Option<DateTime<Utc>>,
) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE sched_job SET job_state = $1, next_trigger_time = $2 WHERE job_id = $3")
        .bind(job_state)
        .bind(next_trigger_time)
        .bind(job_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Fetch a single job by its primary key.
pub async fn get_job(executor: impl PgExecutor<'_>, job_id: i64) -> Result<JobRow, StoreError> {
    sqlx::query_as::<_, JobRow>(
        r#"
        SELECT job_id, group_name, job_type, job_state, trigger_type, trigger_value,
               route_strategy, retry_type, retry_count, retry_interval_ms,
               collision_strategy, executor_text, job_param, next_trigger_time, last_trigger_time
        FROM sched_job WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(executor)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Jobs due to fire within `lookahead` of `now`, locked so two supervisor
/// replicas never both pick up the same job in the same sweep.
pub async fn due_jobs(
    executor: impl PgExecutor<'_>,
    now: DateTime<Utc>,
    lookahead: chrono::Duration,
    limit: i64,
) -> Result<Vec<JobRow>, StoreError> {
    let horizon = now + lookahead;
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT job_id, group_name, job_type, job_state, trigger_type, trigger_value,
               route_strategy, retry_type, retry_count, retry_interval_ms,
               collision_strategy, executor_text, job_param, next_trigger_time, last_trigger_time
        FROM sched_job
        WHERE job_state = 'ENABLE' AND next_trigger_time IS NOT NULL AND next_trigger_time <= $1
        ORDER BY next_trigger_time ASC
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(horizon)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// CAS the job's `nextTriggerTime`/`lastTriggerTime`. `expected_next` must
/// match the currently stored value (including both being `NULL`) or the
/// update affects zero rows.
pub async fn cas_next_trigger_time(
    executor: impl PgExecutor<'_>,
    job_id: i64,
    expected_next: Option<DateTime<Utc>>,
    new_next: Option<DateTime<Utc>>,
    last_trigger_time: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE sched_job
        SET next_trigger_time = $1, last_trigger_time = $2
        WHERE job_id = $3 AND next_trigger_time IS NOT DISTINCT FROM $4
        "#,
    )
    .bind(new_next)
    .bind(last_trigger_time)
    .bind(job_id)
    .bind(expected_next)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// A child job enabled for dependency-cascade firing, paired with the
/// `sched_depend.sequence` offset used to avoid trigger-time collisions.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DependentJobRow {
    pub sequence: i32,
    #[sqlx(flatten)]
    pub job: JobRow,
}

/// Enabled jobs that depend on `parent_job_id`, paired with their
/// `sched_depend.sequence` offset.
pub async fn enabled_dependents(
    executor: impl PgExecutor<'_>,
    parent_job_id: i64,
) -> Result<Vec<DependentJobRow>, StoreError> {
    let rows = sqlx::query_as::<_, DependentJobRow>(
        r#"
        SELECT d.sequence,
               j.job_id, j.group_name, j.job_type, j.job_state, j.trigger_type, j.trigger_value,
               j.route_strategy, j.retry_type, j.retry_count, j.retry_interval_ms,
               j.collision_strategy, j.executor_text, j.job_param, j.next_trigger_time, j.last_trigger_time
        FROM sched_depend d
        JOIN sched_job j ON j.job_id = d.child_job_id
        WHERE d.parent_job_id = $1 AND j.job_state = 'ENABLE'
        ORDER BY d.sequence ASC
        "#,
    )
    .bind(parent_job_id)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}
