//! `sched_workflow` repository functions.

use sqlx::PgExecutor;

use crate::{models::WorkflowEdgeRow, StoreError};

/// Insert every edge of a freshly materialized workflow DAG as one
/// multi-row `INSERT` — see `tasks::insert_many` for why this is a single
/// statement rather than a per-row loop.
pub async fn insert_edges(executor: impl PgExecutor<'_>, rows: &[WorkflowEdgeRow]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut sql = String::from(
        "INSERT INTO sched_workflow (wnstance_id, source_node, target_node, sequence, run_state, instance_id) VALUES ",
    );
    for i in 0..rows.len() {
        if i > 0 {
            sql.push(',');
        }
        let base = i * 6;
        sql.push_str(&format!("(${},${},${},${},${},${})", base + 1, base + 2, base + 3, base + 4, base + 5, base + 6));
    }

    let mut query = sqlx::query(&sql);
    for row in rows {
        query = query
            .bind(row.wnstance_id)
            .bind(&row.source_node)
            .bind(&row.target_node)
            .bind(row.sequence)
            .bind(row.run_state)
            .bind(row.instance_id);
    }
    query.execute(executor).await?;
    Ok(())
}

/// All edges belonging to one workflow's lead instance.
pub async fn list_edges(
    executor: impl PgExecutor<'_>,
    wnstance_id: i64,
) -> Result<Vec<WorkflowEdgeRow>, StoreError> {
    let rows = sqlx::query_as::<_, WorkflowEdgeRow>(
        r#"
        SELECT wnstance_id, source_node, target_node, sequence, run_state, instance_id
        FROM sched_workflow WHERE wnstance_id = $1
        "#,
    )
    .bind(wnstance_id)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Unconditionally set the run-state of the edge targeting `target_node`.
/// Callers must already hold the workflow lead's instance lock — there is
/// no CAS guard here because `advance()`'s fold is only ever run by the
/// single writer holding that lock.
pub async fn set_edge_run_state(
    executor: impl PgExecutor<'_>,
    wnstance_id: i64,
    target_node: &str,
    run_state: i16,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE sched_workflow SET run_state = $1 WHERE wnstance_id = $2 AND target_node = $3")
        .bind(run_state)
        .bind(wnstance_id)
        .bind(target_node)
        .execute(executor)
        .await?;
    Ok(())
}

/// CAS the run-state of the edge targeting `target_node`.
pub async fn cas_edge_run_state(
    executor: impl PgExecutor<'_>,
    wnstance_id: i64,
    target_node: &str,
    expected_run_state: i16,
    new_run_state: i16,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE sched_workflow
        SET run_state = $1
        WHERE wnstance_id = $2 AND target_node = $3 AND run_state = $4
        "#,
    )
    .bind(new_run_state)
    .bind(wnstance_id)
    .bind(target_node)
    .bind(expected_run_state)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Force every edge still in a non-terminal run-state to `new_run_state`
/// (used to short-circuit-cancel the remainder of a workflow once a failure
/// is observed).
pub async fn cancel_runnable_edges(
    executor: impl PgExecutor<'_>,
    wnstance_id: i64,
    runnable_states: &[i16],
    new_run_state: i16,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE sched_workflow
        SET run_state = $1
        WHERE wnstance_id = $2 AND run_state = ANY($3)
        "#,
    )
    .bind(new_run_state)
    .bind(wnstance_id)
    .bind(runnable_states)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// CAS the instance materialized for `target_node` from the instance a
/// retry is replacing to the freshly spawned one, leaving the edge itself
/// non-terminal (the retry keeps the node in flight rather than advancing
/// the DAG).
pub async fn cas_edge_instance(
    executor: impl PgExecutor<'_>,
    wnstance_id: i64,
    target_node: &str,
    expected_instance_id: i64,
    new_instance_id: i64,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE sched_workflow SET instance_id = $1 WHERE wnstance_id = $2 AND target_node = $3 AND instance_id = $4",
    )
    .bind(new_instance_id)
    .bind(wnstance_id)
    .bind(target_node)
    .bind(expected_instance_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Record the instance materialized for `target_node`.
pub async fn set_edge_instance(
    executor: impl PgExecutor<'_>,
    wnstance_id: i64,
    target_node: &str,
    instance_id: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE sched_workflow SET instance_id = $1 WHERE wnstance_id = $2 AND target_node = $3",
    )
    .bind(instance_id)
    .bind(wnstance_id)
    .bind(target_node)
    .execute(executor)
    .await?;
    Ok(())
}
