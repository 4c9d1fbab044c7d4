//! RunningInstanceScanner — detects and resolves stale RUNNING instances:
//! re-dispatches WAITING tasks pinned to dead workers, finalizes instances
//! whose tasks already settled, and purges zombies with no live work left.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use taskmesh_core::{DispatchIntent, DispatchOperation, Effect, ExecuteState, Instance, Job, SnowflakeGenerator, StateMachine, Task};
use taskmesh_dispatch::Dispatcher;
use taskmesh_registry::{Role, ServiceRegistry};
use taskmesh_store::{repository, DbPool};
use tracing::{instrument, warn};

use super::{Scanner, ScannerConfig};
use crate::cluster_lock::LockKey;
use crate::error::SupervisorError;

pub struct RunningInstanceScanner {
    pool: DbPool,
    state_machine: Arc<StateMachine>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<dyn ServiceRegistry>,
    ids: Arc<SnowflakeGenerator>,
    config: ScannerConfig,
}

impl RunningInstanceScanner {
    pub fn new(
        pool: DbPool,
        state_machine: Arc<StateMachine>,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<dyn ServiceRegistry>,
        ids: Arc<SnowflakeGenerator>,
        config: ScannerConfig,
    ) -> Self {
        Self { pool, state_machine, dispatcher, registry, ids, config }
    }

    async fn reconcile(&self, instance: Instance) -> Result<(), SupervisorError> {
        let task_rows = repository::tasks::list_by_instance(&self.pool, instance.instance_id).await?;
        let tasks: Vec<Task> = task_rows.into_iter().filter_map(|row| Task::try_from(row).ok()).collect();
        let mut next_ids = self.ids.as_next_ids();

        // (b) every task already settled but the instance never advanced.
        if tasks.iter().all(|t| t.execute_state.is_terminal()) {
            let live = self.live_worker_addresses(None).await?;
            let effect = self.state_machine.resettle(instance.instance_id, &mut next_ids, &live).await?;
            self.dispatcher.dispatch(effect, &self.state_machine, &mut next_ids).await;
            return Ok(());
        }

        let Ok(job_row) = repository::jobs::get_job(&self.pool, instance.job_id).await else {
            warn!(instance_id = instance.instance_id, "job missing for running instance, leaving for next sweep");
            return Ok(());
        };
        let job: Job = job_row.try_into()?;
        let candidates = self.registry.discovered_servers(Role::Worker, Some(&job.group)).await?;
        let live_addrs: HashSet<String> = candidates.iter().map(|s| s.address()).collect();

        // (a) WAITING tasks pinned to a worker that's no longer live.
        let orphaned: Vec<Task> = tasks
            .iter()
            .filter(|t| t.execute_state == ExecuteState::Waiting)
            .filter(|t| t.worker.as_ref().is_some_and(|w| !live_addrs.contains(&w.address())))
            .cloned()
            .collect();
        if !orphaned.is_empty() && !candidates.is_empty() {
            self.dispatcher
                .dispatch(
                    Effect::single(DispatchIntent { job, instance: instance.clone(), tasks: orphaned, operation: DispatchOperation::Execute }),
                    &self.state_machine,
                    &mut next_ids,
                )
                .await;
            return Ok(());
        }

        // (c) nothing WAITING and no alive EXECUTING task left — zombie.
        let has_alive_executing = tasks
            .iter()
            .any(|t| t.execute_state == ExecuteState::Executing && t.worker.as_ref().is_some_and(|w| live_addrs.contains(&w.address())));
        let has_waiting = tasks.iter().any(|t| t.execute_state == ExecuteState::Waiting);
        if !has_waiting && !has_alive_executing {
            let live = self.live_worker_addresses(None).await?;
            let effect = self.state_machine.purge(instance.instance_id, &mut next_ids, &live).await?;
            self.dispatcher.dispatch(effect, &self.state_machine, &mut next_ids).await;
        }
        Ok(())
    }

    async fn live_worker_addresses(&self, group: Option<&str>) -> Result<HashSet<String>, SupervisorError> {
        Ok(self.registry.discovered_servers(Role::Worker, group).await?.into_iter().map(|s| s.address()).collect())
    }
}

#[async_trait]
impl Scanner for RunningInstanceScanner {
    fn name(&self) -> &'static str {
        "running"
    }

    fn lock_key(&self) -> LockKey {
        LockKey::Running
    }

    fn config(&self) -> ScannerConfig {
        self.config
    }

    #[instrument(skip(self), name = "running_scanner_sweep")]
    async fn sweep(&self) -> Result<bool, SupervisorError> {
        let threshold = Utc::now() - chrono::Duration::from_std(self.config.threshold).unwrap_or_default();
        let rows = repository::instances::running_older_than(&self.pool, threshold, self.config.batch_size).await?;
        let idle = (rows.len() as i64) < self.config.batch_size;

        for row in rows {
            let instance_id = row.instance_id;
            let instance = match Instance::try_from(row) {
                Ok(instance) => instance,
                Err(err) => {
                    warn!(instance_id, error = %err, "skipping running instance with unreadable row");
                    continue;
                }
            };
            if let Err(err) = self.reconcile(instance).await {
                warn!(instance_id, error = %err, "failed to reconcile running instance");
            }
        }

        Ok(idle)
    }
}
