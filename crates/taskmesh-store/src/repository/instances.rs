//! `sched_instance` repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::{models::InstanceRow, StoreError};

/// Insert a freshly created instance row.
pub async fn insert(executor: impl PgExecutor<'_>, row: &InstanceRow) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sched_instance
            (instance_id, job_id, rnstance_id, pnstance_id, wnstance_id, run_type,
             trigger_time, run_state, run_start_time, run_end_time, retried_count, version, attach)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(row.instance_id)
    .bind(row.job_id)
    .bind(row.rnstance_id)
    .bind(row.pnstance_id)
    .bind(row.wnstance_id)
    .bind(&row.run_type)
    .bind(row.trigger_time)
    .bind(row.run_state)
    .bind(row.run_start_time)
    .bind(row.run_end_time)
    .bind(row.retried_count)
    .bind(row.version)
    .bind(&row.attach)
    .execute(executor)
    .await?;
    Ok(())
}

/// Read an instance without locking it.
pub async fn get(executor: impl PgExecutor<'_>, instance_id: i64) -> Result<InstanceRow, StoreError> {
    sqlx::query_as::<_, InstanceRow>(
        r#"
        SELECT instance_id, job_id, rnstance_id, pnstance_id, wnstance_id, run_type,
               trigger_time, run_state, run_start_time, run_end_time, retried_count, version, attach
        FROM sched_instance WHERE instance_id = $1
        "#,
    )
    .bind(instance_id)
    .fetch_optional(executor)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Read-lock an instance row for the duration of the caller's transaction.
/// This is the database half of the two-guard serialization scheme (the
/// in-process half is `taskmesh_core::lock::InstanceLockTable`).
pub async fn lock_for_update(
    executor: impl PgExecutor<'_>,
    instance_id: i64,
) -> Result<InstanceRow, StoreError> {
    sqlx::query_as::<_, InstanceRow>(
        r#"
        SELECT instance_id, job_id, rnstance_id, pnstance_id, wnstance_id, run_type,
               trigger_time, run_state, run_start_time, run_end_time, retried_count, version, attach
        FROM sched_instance WHERE instance_id = $1
        FOR UPDATE
        "#,
    )
    .bind(instance_id)
    .fetch_optional(executor)
    .await?
    .ok_or(StoreError::NotFound)
}

/// CAS the instance's run state, bumping `version`. The caller must already
/// hold the row lock from [`lock_for_update`] in the same transaction.
#[allow(clippy::too_many_arguments)]
pub async fn cas_run_state(
    executor: impl PgExecutor<'_>,
    instance_id: i64,
    expected_version: i64,
    new_run_state: i16,
    run_start_time: Option<DateTime<Utc>>,
    run_end_time: Option<DateTime<Utc>>,
    attach: Option<&serde_json::Value>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE sched_instance
        SET run_state = $1,
            run_start_time = COALESCE($2, run_start_time),
            run_end_time = COALESCE($3, run_end_time),
            attach = COALESCE($4, attach),
            version = version + 1
        WHERE instance_id = $5 AND version = $6
        "#,
    )
    .bind(new_run_state)
    .bind(run_start_time)
    .bind(run_end_time)
    .bind(attach)
    .bind(instance_id)
    .bind(expected_version)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Bump `retried_count` by one (used when a retry instance links back via
/// `pnstanceId`, on the *new* instance's row, at insert time — exposed
/// separately for completeness of the cascade path).
pub async fn increment_retried_count(
    executor: impl PgExecutor<'_>,
    instance_id: i64,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE sched_instance SET retried_count = retried_count + 1 WHERE instance_id = $1")
        .bind(instance_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Whether `job_id` has any instance still in WAITING, RUNNING, or PAUSED —
/// the precondition the API layer checks before allowing a job definition
/// to be deleted.
pub async fn has_active_for_job(executor: impl PgExecutor<'_>, job_id: i64) -> Result<bool, StoreError> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM sched_instance WHERE job_id = $1 AND run_state IN (10, 20, 30))",
    )
    .bind(job_id)
    .fetch_one(executor)
    .await?;
    Ok(exists)
}

/// Instances in WAITING whose `trigger_time` predates `threshold` — the
/// Waiting-scanner's candidate set.
pub async fn waiting_older_than(
    executor: impl PgExecutor<'_>,
    threshold: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<InstanceRow>, StoreError> {
    let rows = sqlx::query_as::<_, InstanceRow>(
        r#"
        SELECT instance_id, job_id, rnstance_id, pnstance_id, wnstance_id, run_type,
               trigger_time, run_state, run_start_time, run_end_time, retried_count, version, attach
        FROM sched_instance
        WHERE run_state = 10 AND trigger_time <= $1
        ORDER BY trigger_time ASC
        LIMIT $2
        "#,
    )
    .bind(threshold)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Instances in RUNNING whose `run_start_time` predates `threshold` — the
/// Running-scanner's candidate set.
pub async fn running_older_than(
    executor: impl PgExecutor<'_>,
    threshold: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<InstanceRow>, StoreError> {
    let rows = sqlx::query_as::<_, InstanceRow>(
        r#"
        SELECT instance_id, job_id, rnstance_id, pnstance_id, wnstance_id, run_type,
               trigger_time, run_state, run_start_time, run_end_time, retried_count, version, attach
        FROM sched_instance
        WHERE run_state = 20 AND run_start_time IS NOT NULL AND run_start_time <= $1
        ORDER BY run_start_time ASC
        LIMIT $2
        "#,
    )
    .bind(threshold)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}
