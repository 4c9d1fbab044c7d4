//! The transactional state machine — §4.1's eight operations
//! (TRIGGER, PAUSE, CANCEL, RESUME, DELETE, START_TASK, TERMINATE_TASK,
//! PURGE) plus the pure run-state derivation rule they all rely on.
//!
//! Every operation acquires the instance's in-process lock ([`InstanceLockTable`])
//! and the matching database row lock (`FOR UPDATE`) before mutating, runs
//! inside one `sqlx` transaction, and returns an [`Effect`] the caller
//! executes only once that transaction has committed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use taskmesh_registry::{Role, ServerEndpoint, ServiceRegistry};
use taskmesh_store::{repository, DbPool};

use crate::cascade::{self, RetryTaskSpec};
use crate::dag;
use crate::effect::{DispatchIntent, DispatchOperation, Effect};
use crate::lock::InstanceLockTable;
use crate::model::{
    ExecuteState, Instance, InstanceAttach, Job, JobState, JobType, RunState, RunType, Task, WorkflowEdge,
};
use crate::workflow::{self, WorkflowStep};
use crate::EngineError;

/// Fold a set of sibling tasks into the `RunState` their instance should
/// carry, or `None` if the instance should stay exactly as it is.
///
/// - every task terminal -> `CANCELED` if any failed, else `FINISHED`
/// - any task still `WAITING`/`EXECUTING` -> no change (`None`)
/// - otherwise (a mix of terminal and `PAUSED`, none still runnable) -> `PAUSED`
pub fn derive_run_state(tasks: &[Task]) -> Option<RunState> {
    if tasks.is_empty() {
        return None;
    }
    if tasks.iter().all(|t| t.execute_state.is_terminal()) {
        let any_failed = tasks.iter().any(|t| t.execute_state.is_failure());
        return Some(if any_failed { RunState::Canceled } else { RunState::Finished });
    }
    if tasks.iter().any(|t| t.execute_state.is_runnable()) {
        return None;
    }
    Some(RunState::Paused)
}

/// Ties the store, the registry, and the in-process lock table together to
/// implement the scheduling state transitions. Holds no business state of
/// its own beyond the lock table.
pub struct StateMachine {
    pool: DbPool,
    locks: InstanceLockTable,
    registry: Arc<dyn ServiceRegistry>,
}

impl StateMachine {
    pub fn new(pool: DbPool, registry: Arc<dyn ServiceRegistry>) -> Self {
        Self { pool, locks: InstanceLockTable::new(), registry }
    }

    fn lock_key(instance: &Instance) -> i64 {
        instance.wnstance_id.unwrap_or(instance.instance_id)
    }

    // -----------------------------------------------------------------
    // TRIGGER
    // -----------------------------------------------------------------

    /// Fire `job` into a fresh instance at `trigger_time`, CAS-ing the job's
    /// `nextTriggerTime` forward to `new_next_trigger_time` in the same
    /// transaction so two supervisor replicas can never both fire it.
    /// Cron/period arithmetic lives in the scanner; this only needs the two
    /// timestamps it already computed.
    pub async fn trigger(
        &self,
        job: &Job,
        run_type: RunType,
        trigger_time: chrono::DateTime<Utc>,
        new_next_trigger_time: Option<chrono::DateTime<Utc>>,
        next_ids: &mut impl FnMut() -> i64,
    ) -> Result<Effect, EngineError> {
        if job.job_state != JobState::Enable {
            return Err(EngineError::JobDisabled(job.job_id));
        }

        let mut tx = self.pool.begin().await.map_err(taskmesh_store::StoreError::from)?;

        let cas_ok = repository::jobs::cas_next_trigger_time(
            &mut *tx,
            job.job_id,
            job.next_trigger_time,
            new_next_trigger_time,
            trigger_time,
        )
        .await?;
        if !cas_ok {
            tx.rollback().await.map_err(taskmesh_store::StoreError::from)?;
            return Ok(Effect::none());
        }

        let instance_id = next_ids();
        let instance = Instance {
            instance_id,
            job_id: job.job_id,
            rnstance_id: instance_id,
            pnstance_id: None,
            wnstance_id: None,
            run_type,
            trigger_time,
            run_state: RunState::Waiting,
            run_start_time: None,
            run_end_time: None,
            retried_count: 0,
            version: 0,
            attach: InstanceAttach::default(),
        };

        let effect = match job.job_type {
            JobType::Normal => self.materialize_normal(&mut tx, job, &instance, next_ids).await?,
            JobType::Broadcast => self.materialize_broadcast(&mut tx, job, &instance, next_ids).await?,
            JobType::Workflow => self.materialize_workflow(&mut tx, job, &instance, next_ids).await?,
        };

        tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
        Ok(effect)
    }

    async fn materialize_normal(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job: &Job,
        instance: &Instance,
        next_ids: &mut impl FnMut() -> i64,
    ) -> Result<Effect, EngineError> {
        let params = crate::split::split(job.job_id, job.job_param.as_deref())?;
        let task_count = params.len() as u32;
        let tasks = build_tasks(next_ids, instance.instance_id, task_count, params.into_iter().map(|p| (p, None)));

        repository::instances::insert(&mut **tx, &taskmesh_store::models::InstanceRow::from(instance)).await?;
        let task_rows: Vec<_> = tasks.iter().map(taskmesh_store::models::TaskRow::from).collect();
        repository::tasks::insert_many(&mut **tx, &task_rows).await?;

        Ok(Effect::single(DispatchIntent {
            job: job.clone(),
            instance: instance.clone(),
            tasks,
            operation: DispatchOperation::Execute,
        }))
    }

    async fn materialize_broadcast(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job: &Job,
        instance: &Instance,
        next_ids: &mut impl FnMut() -> i64,
    ) -> Result<Effect, EngineError> {
        let workers = self.registry.discovered_servers(Role::Worker, Some(&job.group)).await?;
        let task_count = workers.len() as u32;
        let tasks = build_tasks(
            next_ids,
            instance.instance_id,
            task_count,
            workers.into_iter().map(|w| (job.job_param.clone(), Some(w))),
        );

        repository::instances::insert(&mut **tx, &taskmesh_store::models::InstanceRow::from(instance)).await?;
        let task_rows: Vec<_> = tasks.iter().map(taskmesh_store::models::TaskRow::from).collect();
        repository::tasks::insert_many(&mut **tx, &task_rows).await?;

        Ok(Effect::single(DispatchIntent {
            job: job.clone(),
            instance: instance.clone(),
            tasks,
            operation: DispatchOperation::Execute,
        }))
    }

    async fn materialize_workflow(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job: &Job,
        instance: &Instance,
        next_ids: &mut impl FnMut() -> i64,
    ) -> Result<Effect, EngineError> {
        let templates = workflow::parse_workflow_template(job.job_id, job.job_param.as_deref())?;
        let candidate_edges: Vec<WorkflowEdge> = templates
            .iter()
            .map(|(from, to, seq)| WorkflowEdge {
                wnstance_id: instance.instance_id,
                source_node: from.clone(),
                target_node: to.clone(),
                sequence: *seq,
                run_state: RunState::Waiting,
                instance_id: None,
            })
            .collect();
        dag::validate_workflow_dag(&candidate_edges)?;

        let mut workflow_instance = instance.clone();
        workflow_instance.wnstance_id = Some(instance.instance_id);
        repository::instances::insert(&mut **tx, &taskmesh_store::models::InstanceRow::from(&workflow_instance)).await?;

        let edge_rows: Vec<_> = candidate_edges.iter().map(taskmesh_store::models::WorkflowEdgeRow::from).collect();
        repository::workflow::insert_edges(&mut **tx, &edge_rows).await?;

        let ready = workflow::initial_ready_nodes(&candidate_edges);
        let mut effect = Effect::none();
        for node in ready {
            effect = effect.merge(self.start_workflow_node(&mut **tx, job, &workflow_instance, &node, next_ids).await?);
        }
        Ok(effect)
    }

    /// `conn` is a concrete connection (rather than a generic executor)
    /// because this makes several sequential calls against it — a
    /// transaction's connection can be reborrowed for each one, but can't
    /// satisfy a generic `Copy` bound the way `&PgPool` can.
    async fn start_workflow_node(
        &self,
        conn: &mut sqlx::PgConnection,
        job: &Job,
        lead: &Instance,
        node: &str,
        next_ids: &mut impl FnMut() -> i64,
    ) -> Result<Effect, EngineError> {
        let instance_id = next_ids();
        let node_instance = Instance {
            instance_id,
            job_id: job.job_id,
            rnstance_id: lead.rnstance_id,
            pnstance_id: None,
            wnstance_id: lead.wnstance_id,
            run_type: lead.run_type,
            trigger_time: Utc::now(),
            run_state: RunState::Waiting,
            run_start_time: None,
            run_end_time: None,
            retried_count: 0,
            version: 0,
            attach: InstanceAttach { cur_node: Some(node.to_owned()), error_msg: None },
        };

        let params = crate::split::split(job.job_id, job.job_param.as_deref())?;
        let task_count = params.len() as u32;
        let tasks = build_tasks(next_ids, instance_id, task_count, params.into_iter().map(|p| (p, None)));

        repository::instances::insert(&mut *conn, &taskmesh_store::models::InstanceRow::from(&node_instance)).await?;
        let task_rows: Vec<_> = tasks.iter().map(taskmesh_store::models::TaskRow::from).collect();
        repository::tasks::insert_many(&mut *conn, &task_rows).await?;
        repository::workflow::set_edge_instance(&mut *conn, lead.wnstance_id.unwrap_or(lead.instance_id), node, instance_id).await?;

        Ok(Effect::single(DispatchIntent {
            job: job.clone(),
            instance: node_instance,
            tasks,
            operation: DispatchOperation::Execute,
        }))
    }

    // -----------------------------------------------------------------
    // PAUSE / CANCEL / RESUME
    // -----------------------------------------------------------------

    /// Move every still-runnable task of `instance_id` to PAUSED, signal any
    /// worker currently executing one of its tasks, and move the instance
    /// itself to PAUSED once no EXECUTING task is left outstanding (an
    /// instance with a live EXECUTING task stays RUNNING until that
    /// worker's own `terminateTask` callback settles it). For a workflow
    /// lead, recurses into every non-terminal node instance first.
    pub async fn pause(&self, instance_id: i64) -> Result<Effect, EngineError> {
        self.control(instance_id, ExecuteState::Paused, RunState::Paused, DispatchOperation::Pause).await
    }

    /// Move every non-terminal task of `instance_id` to MANUAL_CANCELED,
    /// signal any worker currently executing one of its tasks, and move the
    /// instance to CANCELED once no EXECUTING task is left outstanding. For
    /// a workflow lead, recurses into every non-terminal node instance
    /// first.
    pub async fn cancel(&self, instance_id: i64) -> Result<Effect, EngineError> {
        self.control(instance_id, ExecuteState::ManualCanceled, RunState::Canceled, DispatchOperation::Cancel).await
    }

    /// Move every PAUSED task back to WAITING and the instance back to
    /// RUNNING, re-dispatching them. For a workflow lead, recurses into
    /// every PAUSED node instance first.
    pub async fn resume(&self, instance_id: i64) -> Result<Effect, EngineError> {
        let row = repository::instances::get(&self.pool, instance_id).await?;
        let instance: Instance = row.try_into()?;
        if instance.wnstance_id == Some(instance.instance_id) {
            return self.resume_workflow_lead(instance_id).await;
        }
        let _guard = self.locks.lock(Self::lock_key(&instance)).await;
        self.transition_bulk_locked(instance_id, ExecuteState::Paused, ExecuteState::Waiting, RunState::Running, DispatchOperation::Execute)
            .await
    }

    /// Shared entry point for [`Self::pause`]/[`Self::cancel`]: dispatches
    /// to the workflow-lead path or the single-instance path depending on
    /// whether `instance_id` is a workflow lead.
    async fn control(
        &self,
        instance_id: i64,
        new_task_state: ExecuteState,
        new_run_state: RunState,
        operation: DispatchOperation,
    ) -> Result<Effect, EngineError> {
        let row = repository::instances::get(&self.pool, instance_id).await?;
        let instance: Instance = row.try_into()?;
        let job_row = repository::jobs::get_job(&self.pool, instance.job_id).await?;
        let job: Job = job_row.try_into()?;
        let live_workers = self.live_worker_addresses(&job.group).await?;

        if instance.wnstance_id == Some(instance.instance_id) {
            return self.control_workflow_lead(instance_id, new_task_state, new_run_state, operation, &live_workers).await;
        }
        let _guard = self.locks.lock(Self::lock_key(&instance)).await;
        self.pause_or_cancel_locked(instance_id, new_task_state, new_run_state, operation, &live_workers).await
    }

    async fn live_worker_addresses(&self, group: &str) -> Result<HashSet<String>, EngineError> {
        Ok(self.registry.discovered_servers(Role::Worker, Some(group)).await?.into_iter().map(|w| w.address()).collect())
    }

    /// PAUSE/CANCEL on a single (non-workflow-lead) instance. Assumes the
    /// caller already holds the instance's process lock.
    ///
    /// Bulk-moves WAITING tasks to `new_task_state` as before, but also
    /// looks for EXECUTING tasks whose worker is still alive: those are
    /// carried in the returned [`Effect`] so the dispatcher can signal the
    /// worker directly, and as long as any of them remain outstanding the
    /// instance's own run state is left untouched rather than force-set.
    async fn pause_or_cancel_locked(
        &self,
        instance_id: i64,
        new_task_state: ExecuteState,
        new_run_state: RunState,
        operation: DispatchOperation,
        live_workers: &HashSet<String>,
    ) -> Result<Effect, EngineError> {
        let mut tx = self.pool.begin().await.map_err(taskmesh_store::StoreError::from)?;
        let row = repository::instances::lock_for_update(&mut *tx, instance_id).await?;
        let instance: Instance = row.try_into()?;
        if instance.run_state.is_terminal() {
            tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
            return Ok(Effect::none());
        }

        let job_row = repository::jobs::get_job(&mut *tx, instance.job_id).await?;
        let job: Job = job_row.try_into()?;

        let moved = repository::tasks::bulk_cas_state(&mut *tx, instance_id, ExecuteState::Waiting.as_i16(), new_task_state.as_i16()).await?;
        let mut signaled: Vec<Task> = moved.into_iter().map(Task::try_from).collect::<Result<_, _>>()?;

        let task_rows = repository::tasks::list_by_instance(&mut *tx, instance_id).await?;
        let all_tasks: Vec<Task> = task_rows.into_iter().map(Task::try_from).collect::<Result<_, _>>()?;
        let executing: Vec<Task> = all_tasks
            .into_iter()
            .filter(|t| t.execute_state == ExecuteState::Executing && t.worker.as_ref().is_some_and(|w| live_workers.contains(&w.address())))
            .collect();

        if executing.is_empty() {
            let ok = repository::instances::cas_run_state(
                &mut *tx,
                instance_id,
                instance.version,
                new_run_state.as_i16(),
                None,
                if new_run_state.is_terminal() { Some(Utc::now()) } else { None },
                None,
            )
            .await?;
            if !ok {
                tx.rollback().await.map_err(taskmesh_store::StoreError::from)?;
                return Err(EngineError::CasConflict(format!("instance {instance_id} version changed")));
            }
        }
        tx.commit().await.map_err(taskmesh_store::StoreError::from)?;

        signaled.extend(executing);
        if signaled.is_empty() {
            return Ok(Effect::none());
        }
        Ok(Effect::single(DispatchIntent { job, instance, tasks: signaled, operation }))
    }

    /// PAUSE/CANCEL on a workflow lead. Acquires the process lock shared by
    /// the lead and every one of its node instances exactly once (they all
    /// key to the same lock — see [`InstanceLockTable`]), recurses the same
    /// transition into every node instance still attached to a non-terminal
    /// edge, and only re-derives the lead's own run state once every node
    /// has settled.
    async fn control_workflow_lead(
        &self,
        wnstance_id: i64,
        new_task_state: ExecuteState,
        new_run_state: RunState,
        operation: DispatchOperation,
        live_workers: &HashSet<String>,
    ) -> Result<Effect, EngineError> {
        let _guard = self.locks.lock(wnstance_id).await;

        let edge_rows = repository::workflow::list_edges(&self.pool, wnstance_id).await?;
        let edges: Vec<WorkflowEdge> = edge_rows.into_iter().map(WorkflowEdge::try_from).collect::<Result<_, _>>()?;

        let mut effect = Effect::none();
        let mut all_settled = true;
        for edge in &edges {
            if edge.run_state.is_terminal() {
                continue;
            }
            let Some(node_instance_id) = edge.instance_id else {
                repository::workflow::set_edge_run_state(&self.pool, wnstance_id, &edge.target_node, new_run_state.as_i16()).await?;
                continue;
            };

            effect = effect.merge(
                self.pause_or_cancel_locked(node_instance_id, new_task_state, new_run_state, operation, live_workers).await?,
            );

            let node_row = repository::instances::get(&self.pool, node_instance_id).await?;
            let node_state: RunState = node_row.run_state.try_into()?;
            if node_state.is_terminal() {
                repository::workflow::set_edge_run_state(&self.pool, wnstance_id, &edge.target_node, node_state.as_i16()).await?;
            } else if node_state == new_run_state {
                repository::workflow::set_edge_run_state(&self.pool, wnstance_id, &edge.target_node, new_run_state.as_i16()).await?;
            } else {
                all_settled = false;
            }
        }

        if all_settled {
            let lead_row = repository::instances::get(&self.pool, wnstance_id).await?;
            if !RunState::try_from(lead_row.run_state)?.is_terminal() {
                repository::instances::cas_run_state(
                    &self.pool,
                    wnstance_id,
                    lead_row.version,
                    new_run_state.as_i16(),
                    None,
                    if new_run_state.is_terminal() { Some(Utc::now()) } else { None },
                    None,
                )
                .await?;
            }
        }

        Ok(effect)
    }

    /// RESUME on a workflow lead. Acquires the shared lock once, reverts
    /// every PAUSED edge (and, if materialized, its node instance) back to
    /// WAITING/RUNNING, and re-derives the lead's own run state.
    async fn resume_workflow_lead(&self, wnstance_id: i64) -> Result<Effect, EngineError> {
        let _guard = self.locks.lock(wnstance_id).await;

        let edge_rows = repository::workflow::list_edges(&self.pool, wnstance_id).await?;
        let edges: Vec<WorkflowEdge> = edge_rows.into_iter().map(WorkflowEdge::try_from).collect::<Result<_, _>>()?;

        let mut effect = Effect::none();
        for edge in &edges {
            if edge.run_state != RunState::Paused {
                continue;
            }
            if let Some(node_instance_id) = edge.instance_id {
                effect = effect.merge(
                    self.transition_bulk_locked(
                        node_instance_id,
                        ExecuteState::Paused,
                        ExecuteState::Waiting,
                        RunState::Running,
                        DispatchOperation::Execute,
                    )
                    .await?,
                );
            }
            repository::workflow::set_edge_run_state(&self.pool, wnstance_id, &edge.target_node, RunState::Waiting.as_i16()).await?;
        }

        let lead_row = repository::instances::get(&self.pool, wnstance_id).await?;
        if RunState::try_from(lead_row.run_state)? == RunState::Paused {
            repository::instances::cas_run_state(&self.pool, wnstance_id, lead_row.version, RunState::Running.as_i16(), None, None, None).await?;
        }

        Ok(effect)
    }

    /// Assumes the caller already holds the instance's process lock — used
    /// directly by [`Self::resume`] and, for a workflow lead's nodes, by
    /// [`Self::resume_workflow_lead`].
    async fn transition_bulk_locked(
        &self,
        instance_id: i64,
        expected_task_state: ExecuteState,
        new_task_state: ExecuteState,
        new_run_state: RunState,
        operation: DispatchOperation,
    ) -> Result<Effect, EngineError> {
        let mut tx = self.pool.begin().await.map_err(taskmesh_store::StoreError::from)?;
        let row = repository::instances::lock_for_update(&mut *tx, instance_id).await?;
        let instance: Instance = row.try_into()?;

        let job_row = repository::jobs::get_job(&mut *tx, instance.job_id).await?;
        let job: Job = job_row.try_into()?;

        let moved = repository::tasks::bulk_cas_state(&mut *tx, instance_id, expected_task_state.as_i16(), new_task_state.as_i16()).await?;

        let ok = repository::instances::cas_run_state(
            &mut *tx,
            instance_id,
            instance.version,
            new_run_state.as_i16(),
            None,
            if new_run_state.is_terminal() { Some(Utc::now()) } else { None },
            None,
        )
        .await?;
        if !ok {
            tx.rollback().await.map_err(taskmesh_store::StoreError::from)?;
            return Err(EngineError::CasConflict(format!("instance {instance_id} version changed")));
        }
        tx.commit().await.map_err(taskmesh_store::StoreError::from)?;

        if moved.is_empty() {
            return Ok(Effect::none());
        }
        let tasks: Result<Vec<Task>, _> = moved.into_iter().map(Task::try_from).collect();
        Ok(Effect::single(DispatchIntent { job, instance, tasks: tasks?, operation }))
    }

    // -----------------------------------------------------------------
    // PURGE (scanner-detected zombie instance)
    // -----------------------------------------------------------------

    /// Terminate a zombie instance the RunningInstanceScanner found with no
    /// WAITING tasks and no alive EXECUTING task. Any task still PAUSED is
    /// forced terminal as `EXECUTE_TIMEOUT`, then the instance is settled
    /// and cascaded exactly as [`Self::terminate_task`] would.
    ///
    /// A no-op (same as a lost CAS race) if the instance already left
    /// `{WAITING, RUNNING}` by the time this runs.
    pub async fn purge(
        &self,
        instance_id: i64,
        next_ids: &mut impl FnMut() -> i64,
        live_workers: &HashSet<String>,
    ) -> Result<Effect, EngineError> {
        let row = repository::instances::get(&self.pool, instance_id).await?;
        let instance: Instance = row.try_into()?;
        if !matches!(instance.run_state, RunState::Waiting | RunState::Running) {
            return Ok(Effect::none());
        }
        repository::tasks::bulk_cas_state(
            &self.pool,
            instance_id,
            ExecuteState::Paused.as_i16(),
            ExecuteState::ExecuteTimeout.as_i16(),
        )
        .await?;
        self.settle_instance(instance_id, next_ids, live_workers).await
    }

    /// Re-derive an instance's run state from its current tasks without a
    /// preceding task mutation. Used by the WAITING/RUNNING scanners when
    /// they find an instance whose tasks already settled but whose own
    /// `runState` never advanced (a crash between the last task's terminal
    /// CAS and its instance-settle step).
    pub async fn resettle(
        &self,
        instance_id: i64,
        next_ids: &mut impl FnMut() -> i64,
        live_workers: &HashSet<String>,
    ) -> Result<Effect, EngineError> {
        self.settle_instance(instance_id, next_ids, live_workers).await
    }

    // -----------------------------------------------------------------
    // DELETE / PURGE
    // -----------------------------------------------------------------

    /// Administrative removal of a job definition; callers must have
    /// already confirmed no live instances remain (enforced by the API
    /// layer's cascading check, not here).
    pub async fn delete_job(&self, job_id: i64) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM sched_job WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(taskmesh_store::StoreError::from)?;
        Ok(())
    }

    /// Drop terminal instances (and their tasks) older than `before` — the
    /// periodic housekeeping sweep, not a per-instance transition.
    pub async fn purge_before(&self, before: chrono::DateTime<Utc>) -> Result<u64, EngineError> {
        let result = sqlx::query(
            "DELETE FROM sched_instance WHERE run_state IN (40, 50) AND COALESCE(run_end_time, trigger_time) < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(taskmesh_store::StoreError::from)?;
        Ok(result.rows_affected())
    }

    // -----------------------------------------------------------------
    // START_TASK / TERMINATE_TASK — worker-reported task lifecycle
    // -----------------------------------------------------------------

    /// A worker accepted dispatch of `task_id` and is about to run it.
    pub async fn start_task(&self, task_id: i64, worker: &ServerEndpoint) -> Result<(), EngineError> {
        let ok = repository::tasks::cas_state(
            &self.pool,
            task_id,
            ExecuteState::Waiting.as_i16(),
            ExecuteState::Executing.as_i16(),
            Some(&worker.to_wire()),
            Some(Utc::now()),
            None,
            None,
        )
        .await?;
        if !ok {
            return Err(EngineError::CasConflict(format!("task {task_id} was not WAITING")));
        }
        Ok(())
    }

    /// A worker reported `task_id`'s terminal outcome; folds the sibling
    /// tasks' states into the owning instance's run state (and, for a
    /// workflow node, advances the DAG) and returns any follow-up effect
    /// (retry cascade, dependency cascade, or next-node dispatch).
    ///
    /// `to_state` is usually terminal (COMPLETED/EXECUTE_FAILED/...), but a
    /// worker honoring an out-of-band PAUSE on a task it is executing also
    /// calls this with `ExecuteState::Paused` — non-terminal at the task
    /// level, but still the worker's final word on that task for now.
    pub async fn terminate_task(
        &self,
        task_id: i64,
        to_state: ExecuteState,
        error_msg: Option<&str>,
        next_ids: &mut impl FnMut() -> i64,
        live_workers: &HashSet<String>,
    ) -> Result<Effect, EngineError> {
        if !to_state.is_terminal() && to_state != ExecuteState::Paused {
            return Err(EngineError::CasConflict(format!("{to_state:?} is not a valid terminateTask report")));
        }

        let task_row = repository::tasks::get(&self.pool, task_id).await?;
        let instance_id = task_row.instance_id;

        let ok = repository::tasks::cas_state(
            &self.pool,
            task_id,
            ExecuteState::Executing.as_i16(),
            to_state.as_i16(),
            None,
            None,
            if to_state.is_terminal() { Some(Utc::now()) } else { None },
            error_msg,
        )
        .await?;
        if !ok {
            return Ok(Effect::none());
        }

        self.settle_instance(instance_id, next_ids, live_workers).await
    }

    /// Re-derive an instance's run state from its current tasks and, if it
    /// became terminal, chain the appropriate cascade (workflow advance,
    /// retry, or dependency fan-out).
    async fn settle_instance(
        &self,
        instance_id: i64,
        next_ids: &mut impl FnMut() -> i64,
        live_workers: &HashSet<String>,
    ) -> Result<Effect, EngineError> {
        let mut tx = self.pool.begin().await.map_err(taskmesh_store::StoreError::from)?;
        let row = repository::instances::lock_for_update(&mut *tx, instance_id).await?;
        let instance: Instance = row.try_into()?;
        let _guard = self.locks.lock(Self::lock_key(&instance)).await;

        let task_rows = repository::tasks::list_by_instance(&mut *tx, instance_id).await?;
        let tasks: Vec<Task> = task_rows.into_iter().map(Task::try_from).collect::<Result<_, _>>()?;

        let Some(new_run_state) = derive_run_state(&tasks) else {
            tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
            return Ok(Effect::none());
        };

        let ok = repository::instances::cas_run_state(
            &mut *tx,
            instance_id,
            instance.version,
            new_run_state.as_i16(),
            None,
            if new_run_state.is_terminal() { Some(Utc::now()) } else { None },
            None,
        )
        .await?;
        if !ok {
            tx.rollback().await.map_err(taskmesh_store::StoreError::from)?;
            return Err(EngineError::CasConflict(format!("instance {instance_id} version changed")));
        }

        let job_row = repository::jobs::get_job(&mut *tx, instance.job_id).await?;
        let job: Job = job_row.try_into()?;

        let mut effect = Effect::none();

        if let Some(wnstance_id) = instance.wnstance_id {
            let Some(cur_node) = instance.attach.cur_node.clone() else {
                tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
                return Ok(effect);
            };

            if new_run_state == RunState::Canceled && cascade::should_retry(&job, instance.retried_count) {
                let trigger_time = cascade::compute_retry_trigger_time(Utc::now(), &job, instance.retried_count);
                let specs = cascade::select_retry_tasks(&job, &tasks, live_workers)?;
                if !specs.is_empty() {
                    effect = effect
                        .merge(self.spawn_workflow_retry(&mut *tx, &job, &instance, wnstance_id, &cur_node, trigger_time, specs, next_ids).await?);
                    tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
                    return Ok(effect);
                }
            }

            let edge_rows = repository::workflow::list_edges(&mut *tx, wnstance_id).await?;
            let mut edges: Vec<WorkflowEdge> = edge_rows.into_iter().map(WorkflowEdge::try_from).collect::<Result<_, _>>()?;
            let before: Vec<(String, RunState)> = edges.iter().map(|e| (e.target_node.clone(), e.run_state)).collect();

            let step = workflow::advance(&mut edges, &cur_node, new_run_state);

            for (target, prior_state) in &before {
                let now_state = edges.iter().find(|e| &e.target_node == target).unwrap().run_state;
                if now_state != *prior_state {
                    repository::workflow::set_edge_run_state(&mut *tx, wnstance_id, target, now_state.as_i16()).await?;
                }
            }

            match step {
                WorkflowStep::Terminal(lead_state) => {
                    let lead_row = repository::instances::get(&mut *tx, wnstance_id).await?;
                    repository::instances::cas_run_state(
                        &mut *tx,
                        wnstance_id,
                        lead_row.version,
                        lead_state.as_i16(),
                        None,
                        Some(Utc::now()),
                        None,
                    )
                    .await?;
                    tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
                    return Ok(effect);
                }
                WorkflowStep::Ready(nodes) => {
                    let lead_row = repository::instances::get(&mut *tx, wnstance_id).await?;
                    let lead: Instance = lead_row.try_into()?;
                    tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
                    for node in nodes {
                        let mut conn = self.pool.acquire().await.map_err(taskmesh_store::StoreError::from)?;
                        effect = effect.merge(self.start_workflow_node(&mut conn, &job, &lead, &node, next_ids).await?);
                    }
                    return Ok(effect);
                }
                WorkflowStep::Pending => {
                    if new_run_state == RunState::Paused && edges.iter().all(|e| e.run_state.is_terminal() || e.run_state == RunState::Paused) {
                        let lead_row = repository::instances::get(&mut *tx, wnstance_id).await?;
                        if !RunState::try_from(lead_row.run_state)?.is_terminal() {
                            repository::instances::cas_run_state(
                                &mut *tx,
                                wnstance_id,
                                lead_row.version,
                                RunState::Paused.as_i16(),
                                None,
                                None,
                                None,
                            )
                            .await?;
                        }
                    }
                    tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
                    return Ok(effect);
                }
            }
        }

        if new_run_state == RunState::Canceled && cascade::should_retry(&job, instance.retried_count) {
            let trigger_time = cascade::compute_retry_trigger_time(Utc::now(), &job, instance.retried_count);
            let specs = cascade::select_retry_tasks(&job, &tasks, live_workers)?;
            if !specs.is_empty() {
                effect = effect.merge(self.spawn_retry(&mut *tx, &job, &instance, trigger_time, specs, next_ids).await?);
            }
            tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
            return Ok(effect);
        }

        if new_run_state == RunState::Finished {
            let dependents = repository::jobs::enabled_dependents(&mut *tx, job.job_id).await?;
            tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
            for dependent in dependents {
                let child: Job = dependent.job.try_into()?;
                let trigger_time = cascade::dependency_trigger_time(Utc::now(), dependent.sequence.max(0) as u32);
                effect = effect.merge(self.trigger(&child, RunType::Depend, trigger_time, child.next_trigger_time, next_ids).await?);
            }
            return Ok(effect);
        }

        tx.commit().await.map_err(taskmesh_store::StoreError::from)?;
        Ok(effect)
    }

    async fn spawn_retry(
        &self,
        conn: &mut sqlx::PgConnection,
        job: &Job,
        prior: &Instance,
        trigger_time: chrono::DateTime<Utc>,
        specs: Vec<RetryTaskSpec>,
        next_ids: &mut impl FnMut() -> i64,
    ) -> Result<Effect, EngineError> {
        let retry_instance_id = next_ids();
        let retry_instance = Instance {
            instance_id: retry_instance_id,
            job_id: job.job_id,
            rnstance_id: prior.rnstance_id,
            pnstance_id: Some(prior.instance_id),
            wnstance_id: None,
            run_type: RunType::Retry,
            trigger_time,
            run_state: RunState::Waiting,
            run_start_time: None,
            run_end_time: None,
            retried_count: prior.retried_count + 1,
            version: 0,
            attach: InstanceAttach::default(),
        };
        repository::instances::insert(&mut *conn, &taskmesh_store::models::InstanceRow::from(&retry_instance)).await?;

        let task_count = specs.len() as u32;
        let tasks = build_tasks(next_ids, retry_instance_id, task_count, specs.into_iter().map(|s| (s.task_param, s.pinned_worker)));
        let task_rows: Vec<_> = tasks.iter().map(taskmesh_store::models::TaskRow::from).collect();
        repository::tasks::insert_many(&mut *conn, &task_rows).await?;

        Ok(Effect::single(DispatchIntent {
            job: job.clone(),
            instance: retry_instance,
            tasks,
            operation: DispatchOperation::Execute,
        }))
    }

    /// Like [`Self::spawn_retry`], but for a CANCELED workflow node: the new
    /// instance stays attached to `wnstance_id`/`cur_node` and the owning
    /// edge is re-pointed at it rather than finalized, so the node keeps
    /// its place in the DAG instead of short-circuiting the workflow.
    #[allow(clippy::too_many_arguments)]
    async fn spawn_workflow_retry(
        &self,
        conn: &mut sqlx::PgConnection,
        job: &Job,
        prior: &Instance,
        wnstance_id: i64,
        cur_node: &str,
        trigger_time: chrono::DateTime<Utc>,
        specs: Vec<RetryTaskSpec>,
        next_ids: &mut impl FnMut() -> i64,
    ) -> Result<Effect, EngineError> {
        let retry_instance_id = next_ids();
        let retry_instance = Instance {
            instance_id: retry_instance_id,
            job_id: job.job_id,
            rnstance_id: prior.rnstance_id,
            pnstance_id: Some(prior.instance_id),
            wnstance_id: Some(wnstance_id),
            run_type: RunType::Retry,
            trigger_time,
            run_state: RunState::Waiting,
            run_start_time: None,
            run_end_time: None,
            retried_count: prior.retried_count + 1,
            version: 0,
            attach: InstanceAttach { cur_node: Some(cur_node.to_string()), ..InstanceAttach::default() },
        };
        repository::instances::insert(&mut *conn, &taskmesh_store::models::InstanceRow::from(&retry_instance)).await?;

        let task_count = specs.len() as u32;
        let tasks = build_tasks(next_ids, retry_instance_id, task_count, specs.into_iter().map(|s| (s.task_param, s.pinned_worker)));
        let task_rows: Vec<_> = tasks.iter().map(taskmesh_store::models::TaskRow::from).collect();
        repository::tasks::insert_many(&mut *conn, &task_rows).await?;

        let moved = repository::workflow::cas_edge_instance(&mut *conn, wnstance_id, cur_node, prior.instance_id, retry_instance_id).await?;
        if !moved {
            return Err(EngineError::CasConflict(format!("workflow edge '{cur_node}' instance changed under retry")));
        }

        Ok(Effect::single(DispatchIntent {
            job: job.clone(),
            instance: retry_instance,
            tasks,
            operation: DispatchOperation::Execute,
        }))
    }
}

fn build_tasks(
    next_ids: &mut impl FnMut() -> i64,
    instance_id: i64,
    task_count: u32,
    specs: impl Iterator<Item = (Option<String>, Option<ServerEndpoint>)>,
) -> Vec<Task> {
    specs
        .enumerate()
        .map(|(i, (task_param, worker))| Task {
            task_id: next_ids(),
            instance_id,
            task_no: i as u32,
            task_count,
            task_param,
            execute_state: ExecuteState::Waiting,
            worker,
            execute_start_time: None,
            execute_end_time: None,
            execute_snapshot: None,
            dispatch_failed_count: 0,
            error_msg: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecuteState::*;

    fn task(state: crate::model::ExecuteState) -> Task {
        Task {
            task_id: 1,
            instance_id: 1,
            task_no: 0,
            task_count: 1,
            task_param: None,
            execute_state: state,
            worker: None,
            execute_start_time: None,
            execute_end_time: None,
            execute_snapshot: None,
            dispatch_failed_count: 0,
            error_msg: None,
        }
    }

    #[test]
    fn all_completed_finishes() {
        assert_eq!(derive_run_state(&[task(Completed), task(Completed)]), Some(RunState::Finished));
    }

    #[test]
    fn any_failure_cancels() {
        assert_eq!(derive_run_state(&[task(Completed), task(ExecuteFailed)]), Some(RunState::Canceled));
    }

    #[test]
    fn any_runnable_leaves_state_unchanged() {
        assert_eq!(derive_run_state(&[task(Completed), task(Waiting)]), None);
        assert_eq!(derive_run_state(&[task(Completed), task(Executing)]), None);
    }

    #[test]
    fn mixed_terminal_and_paused_pauses() {
        assert_eq!(derive_run_state(&[task(Completed), task(Paused)]), Some(RunState::Paused));
    }

    #[test]
    fn empty_task_set_is_unchanged() {
        assert_eq!(derive_run_state(&[]), None);
    }
}
