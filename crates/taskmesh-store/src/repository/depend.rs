//! `sched_depend` repository functions.

use sqlx::PgExecutor;

use crate::{models::DependEdgeRow, StoreError};

/// Every dependency edge declared for `parent_job_id`.
pub async fn list_children(
    executor: impl PgExecutor<'_>,
    parent_job_id: i64,
) -> Result<Vec<DependEdgeRow>, StoreError> {
    let rows = sqlx::query_as::<_, DependEdgeRow>(
        "SELECT parent_job_id, child_job_id, sequence FROM sched_depend WHERE parent_job_id = $1 ORDER BY sequence ASC",
    )
    .bind(parent_job_id)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Declare a new parent→child dependency.
pub async fn insert(
    executor: impl PgExecutor<'_>,
    row: &DependEdgeRow,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO sched_depend (parent_job_id, child_job_id, sequence) VALUES ($1, $2, $3)",
    )
    .bind(row.parent_job_id)
    .bind(row.child_job_id)
    .bind(row.sequence)
    .execute(executor)
    .await?;
    Ok(())
}
