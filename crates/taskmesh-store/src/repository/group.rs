//! `sched_group` repository functions.
//!
//! A group is the administrative partition a job and its candidate workers
//! belong to; this table is the CRUD surface, not a source of liveness
//! (liveness is the registry's job).

use sqlx::PgExecutor;

use crate::{models::GroupRow, StoreError};

pub async fn get(executor: impl PgExecutor<'_>, group_name: &str) -> Result<GroupRow, StoreError> {
    sqlx::query_as::<_, GroupRow>("SELECT group_name, description FROM sched_group WHERE group_name = $1")
        .bind(group_name)
        .fetch_optional(executor)
        .await?
        .ok_or(StoreError::NotFound)
}

pub async fn list(executor: impl PgExecutor<'_>) -> Result<Vec<GroupRow>, StoreError> {
    let rows = sqlx::query_as::<_, GroupRow>("SELECT group_name, description FROM sched_group ORDER BY group_name ASC")
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

pub async fn upsert(executor: impl PgExecutor<'_>, row: &GroupRow) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sched_group (group_name, description) VALUES ($1, $2)
        ON CONFLICT (group_name) DO UPDATE SET description = EXCLUDED.description
        "#,
    )
    .bind(&row.group_name)
    .bind(&row.description)
    .execute(executor)
    .await?;
    Ok(())
}
