//! `sched_task` repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::{models::TaskRow, StoreError};

/// Insert the tasks produced by a split as one multi-row `INSERT`. Built as
/// a single statement (rather than one `execute` per row) so the call works
/// uniformly whether `executor` is a pool handle or a transaction — looping
/// would otherwise require reborrowing the same connection across calls,
/// which a generic `PgExecutor` can't do without an un-satisfiable `Copy`
/// bound on a `&mut` transaction.
pub async fn insert_many(executor: impl PgExecutor<'_>, rows: &[TaskRow]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut sql = String::from(
        "INSERT INTO sched_task \
         (task_id, instance_id, task_no, task_count, task_param, execute_state, worker, \
          execute_start_time, execute_end_time, execute_snapshot, dispatch_failed_count, error_msg) VALUES ",
    );
    for i in 0..rows.len() {
        if i > 0 {
            sql.push(',');
        }
        let base = i * 12;
        sql.push_str(&format!(
            "(${},${},${},${},${},${},${},${},${},${},${},${})",
            base + 1, base + 2, base + 3, base + 4, base + 5, base + 6,
            base + 7, base + 8, base + 9, base + 10, base + 11, base + 12,
        ));
    }

    let mut query = sqlx::query(&sql);
    for row in rows {
        query = query
            .bind(row.task_id)
            .bind(row.instance_id)
            .bind(row.task_no)
            .bind(row.task_count)
            .bind(&row.task_param)
            .bind(row.execute_state)
            .bind(&row.worker)
            .bind(row.execute_start_time)
            .bind(row.execute_end_time)
            .bind(&row.execute_snapshot)
            .bind(row.dispatch_failed_count)
            .bind(&row.error_msg);
    }
    query.execute(executor).await?;
    Ok(())
}

/// Fetch a single task by its primary key.
pub async fn get(executor: impl PgExecutor<'_>, task_id: i64) -> Result<TaskRow, StoreError> {
    sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT task_id, instance_id, task_no, task_count, task_param, execute_state, worker,
               execute_start_time, execute_end_time, execute_snapshot, dispatch_failed_count, error_msg
        FROM sched_task WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_optional(executor)
    .await?
    .ok_or(StoreError::NotFound)
}

/// All tasks for an instance, in `task_no` order.
pub async fn list_by_instance(
    executor: impl PgExecutor<'_>,
    instance_id: i64,
) -> Result<Vec<TaskRow>, StoreError> {
    let rows = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT task_id, instance_id, task_no, task_count, task_param, execute_state, worker,
               execute_start_time, execute_end_time, execute_snapshot, dispatch_failed_count, error_msg
        FROM sched_task WHERE instance_id = $1 ORDER BY task_no ASC
        "#,
    )
    .bind(instance_id)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// CAS a single task's `execute_state`, stamping the worker and timestamp
/// columns relevant to the transition.
#[allow(clippy::too_many_arguments)]
pub async fn cas_state(
    executor: impl PgExecutor<'_>,
    task_id: i64,
    expected_state: i16,
    new_state: i16,
    worker: Option<&str>,
    execute_start_time: Option<DateTime<Utc>>,
    execute_end_time: Option<DateTime<Utc>>,
    error_msg: Option<&str>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE sched_task
        SET execute_state = $1,
            worker = COALESCE($2, worker),
            execute_start_time = COALESCE($3, execute_start_time),
            execute_end_time = COALESCE($4, execute_end_time),
            error_msg = COALESCE($5, error_msg)
        WHERE task_id = $6 AND execute_state = $7
        "#,
    )
    .bind(new_state)
    .bind(worker)
    .bind(execute_start_time)
    .bind(execute_end_time)
    .bind(error_msg)
    .bind(task_id)
    .bind(expected_state)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Bulk-move every task of an instance currently in `expected_state` to
/// `new_state` (used by PAUSE/CANCEL/RESUME, which act on every WAITING or
/// PAUSED task at once). Returns the rows that were actually updated.
pub async fn bulk_cas_state(
    executor: impl PgExecutor<'_>,
    instance_id: i64,
    expected_state: i16,
    new_state: i16,
) -> Result<Vec<TaskRow>, StoreError> {
    let rows = sqlx::query_as::<_, TaskRow>(
        r#"
        UPDATE sched_task
        SET execute_state = $1
        WHERE instance_id = $2 AND execute_state = $3
        RETURNING task_id, instance_id, task_no, task_count, task_param, execute_state, worker,
                  execute_start_time, execute_end_time, execute_snapshot, dispatch_failed_count, error_msg
        "#,
    )
    .bind(new_state)
    .bind(instance_id)
    .bind(expected_state)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// A worker reassigning itself mid-flight (`/supervisor/rpc/updateTaskWorker`).
pub async fn set_worker(executor: impl PgExecutor<'_>, task_id: i64, worker: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE sched_task SET worker = $1 WHERE task_id = $2")
        .bind(worker)
        .bind(task_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// A worker's periodic liveness/progress ping (`/supervisor/rpc/checkpoint`).
pub async fn set_snapshot(
    executor: impl PgExecutor<'_>,
    task_id: i64,
    snapshot: &serde_json::Value,
) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE sched_task SET execute_snapshot = $1 WHERE task_id = $2 AND execute_state = 20")
        .bind(snapshot)
        .bind(task_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Increment `dispatch_failed_count`, returning the new value so the caller
/// can decide whether the implementation-defined terminal threshold was hit.
pub async fn increment_dispatch_failed_count(
    executor: impl PgExecutor<'_>,
    task_id: i64,
) -> Result<i32, StoreError> {
    let (count,): (i32,) = sqlx::query_as(
        "UPDATE sched_task SET dispatch_failed_count = dispatch_failed_count + 1 WHERE task_id = $1 RETURNING dispatch_failed_count",
    )
    .bind(task_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}
