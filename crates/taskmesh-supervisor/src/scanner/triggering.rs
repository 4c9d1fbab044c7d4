//! TriggeringJobScanner — fires jobs whose `nextTriggerTime` has arrived.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use taskmesh_core::{Job, RunType, SnowflakeGenerator, StateMachine};
use taskmesh_dispatch::Dispatcher;
use taskmesh_store::{repository, DbPool};
use tracing::instrument;

use super::{Scanner, ScannerConfig};
use crate::cluster_lock::LockKey;
use crate::error::SupervisorError;

pub struct TriggeringJobScanner {
    pool: DbPool,
    state_machine: Arc<StateMachine>,
    dispatcher: Arc<Dispatcher>,
    ids: Arc<SnowflakeGenerator>,
    config: ScannerConfig,
}

impl TriggeringJobScanner {
    pub fn new(
        pool: DbPool,
        state_machine: Arc<StateMachine>,
        dispatcher: Arc<Dispatcher>,
        ids: Arc<SnowflakeGenerator>,
        config: ScannerConfig,
    ) -> Self {
        Self { pool, state_machine, dispatcher, ids, config }
    }
}

#[async_trait]
impl Scanner for TriggeringJobScanner {
    fn name(&self) -> &'static str {
        "triggering"
    }

    fn lock_key(&self) -> LockKey {
        LockKey::Triggering
    }

    fn config(&self) -> ScannerConfig {
        self.config
    }

    #[instrument(skip(self), name = "triggering_scanner_sweep")]
    async fn sweep(&self) -> Result<bool, SupervisorError> {
        let now = Utc::now();
        let lookahead = chrono::Duration::from_std(self.config.threshold).unwrap_or_default();
        let rows = repository::jobs::due_jobs(&self.pool, now, lookahead, self.config.batch_size).await?;
        let idle = (rows.len() as i64) < self.config.batch_size;

        for row in rows {
            let job: Job = match row.try_into() {
                Ok(job) => job,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping job with unreadable row");
                    continue;
                }
            };
            let trigger_time = match job.next_trigger_time {
                Some(t) => t,
                None => continue,
            };
            let new_next = match taskmesh_core::next_trigger_time(&job, trigger_time) {
                Ok(next) => next,
                Err(err) => {
                    tracing::warn!(job_id = job.job_id, error = %err, "failed to compute next trigger time, disabling reschedule");
                    None
                }
            };

            let mut next_ids = self.ids.as_next_ids();
            match self.state_machine.trigger(&job, RunType::Schedule, trigger_time, new_next, &mut next_ids).await {
                Ok(effect) => {
                    self.dispatcher.dispatch(effect, &self.state_machine, &mut next_ids).await;
                }
                Err(err) => {
                    tracing::error!(job_id = job.job_id, error = %err, "trigger failed");
                }
            }
        }

        Ok(idle)
    }
}
