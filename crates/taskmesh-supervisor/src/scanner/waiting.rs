//! WaitingInstanceScanner — resurrects instances stuck in WAITING: either
//! their tasks already settled (crash before instance-settle) or some of
//! their WAITING tasks were never claimed by a live worker.

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

pub struct WaitingInstanceScanner {
    pool: DbPool,
    state_machine: Arc<StateMachine>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<dyn ServiceRegistry>,
    ids: Arc<SnowflakeGenerator>,
    config: ScannerConfig,
}

impl WaitingInstanceScanner {
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

    async fn resurrect(&self, instance: Instance) -> Result<(), SupervisorError> {
        let task_rows = repository::tasks::list_by_instance(&self.pool, instance.instance_id).await?;
        let tasks: Vec<Task> = task_rows.into_iter().filter_map(|row| Task::try_from(row).ok()).collect();

        let mut next_ids = self.ids.as_next_ids();

        if tasks.iter().all(|t| t.execute_state.is_terminal()) {
            let live = self.live_worker_addresses(None).await?;
            let effect = self.state_machine.resettle(instance.instance_id, &mut next_ids, &live).await?;
            self.dispatcher.dispatch(effect, &self.state_machine, &mut next_ids).await;
            return Ok(());
        }

        let Ok(job_row) = repository::jobs::get_job(&self.pool, instance.job_id).await else {
            warn!(instance_id = instance.instance_id, "job missing for waiting instance, leaving for next sweep");
            return Ok(());
        };
        let job: Job = job_row.try_into()?;

        let candidates = self.registry.discovered_servers(Role::Worker, Some(&job.group)).await?;
        if candidates.is_empty() {
            return Ok(());
        }
        let live_addrs: HashSet<String> = candidates.iter().map(|s| s.address()).collect();

        let unclaimed: Vec<Task> = tasks
            .into_iter()
            .filter(|t| t.execute_state == ExecuteState::Waiting)
            .filter(|t| t.worker.as_ref().map_or(true, |w| !live_addrs.contains(&w.address())))
            .collect();
        if unclaimed.is_empty() {
            return Ok(());
        }

        // Renewal CAS: bumps the instance's version as a concurrency guard so
        // a second scanner replica racing the same stale instance sees its
        // own CAS fail and skips re-dispatching the same tasks twice.
        let renewed = repository::instances::cas_run_state(
            &self.pool,
            instance.instance_id,
            instance.version,
            instance.run_state.as_i16(),
            None,
            None,
            None,
        )
        .await?;
        if !renewed {
            return Ok(());
        }

        self.dispatcher
            .dispatch(
                Effect::single(DispatchIntent { job, instance, tasks: unclaimed, operation: DispatchOperation::Execute }),
                &self.state_machine,
                &mut next_ids,
            )
            .await;
        Ok(())
    }

    async fn live_worker_addresses(&self, group: Option<&str>) -> Result<HashSet<String>, SupervisorError> {
        Ok(self.registry.discovered_servers(Role::Worker, group).await?.into_iter().map(|s| s.address()).collect())
    }
}

#[async_trait]
impl Scanner for WaitingInstanceScanner {
    fn name(&self) -> &'static str {
        "waiting"
    }

    fn lock_key(&self) -> LockKey {
        LockKey::Waiting
    }

    fn config(&self) -> ScannerConfig {
        self.config
    }

    #[instrument(skip(self), name = "waiting_scanner_sweep")]
    async fn sweep(&self) -> Result<bool, SupervisorError> {
        let threshold = Utc::now() - chrono::Duration::from_std(self.config.threshold).unwrap_or_default();
        let rows = repository::instances::waiting_older_than(&self.pool, threshold, self.config.batch_size).await?;
        let idle = (rows.len() as i64) < self.config.batch_size;

        for row in rows {
            let instance_id = row.instance_id;
            let instance = match Instance::try_from(row) {
                Ok(instance) => instance,
                Err(err) => {
                    warn!(instance_id, error = %err, "skipping waiting instance with unreadable row");
                    continue;
                }
            };
            if let Err(err) = self.resurrect(instance).await {
                warn!(instance_id, error = %err, "failed to resurrect waiting instance");
            }
        }

        Ok(idle)
    }
}
