//! Supervisor-side dispatch: turn an [`Effect`] into `receive` RPCs against
//! the resolved worker(s), per §4.4.
//!
//! Dispatch always runs after the transaction that produced the effect has
//! committed (§5) — callers are expected to call [`Dispatcher::dispatch`]
//! only post-commit, never from inside the owning transaction.

use std::sync::Arc;

use taskmesh_core::{DispatchIntent, DispatchOperation, Effect, ExecuteState, StateMachine, Task};
use taskmesh_registry::{Role, ServerEndpoint, ServiceRegistry};
use taskmesh_rpc::destination::Destination;
use taskmesh_rpc::messages::{DispatchOperationWire, ExecuteTaskParam};
use taskmesh_store::{repository, DbPool};
use tracing::{error, warn};

use crate::error::DispatchError;
use crate::router::Router;

/// Tasks whose `dispatchFailedCount` reaches this value are finalized as
/// `DISPATCH_FAILED` instead of being retried again — an
/// implementation-defined threshold per §4.4.
const DISPATCH_FAILED_THRESHOLD: i32 = 5;

fn to_wire_operation(op: DispatchOperation) -> DispatchOperationWire {
    match op {
        DispatchOperation::Execute => DispatchOperationWire::Execute,
        DispatchOperation::Pause => DispatchOperationWire::Pause,
        DispatchOperation::Cancel => DispatchOperationWire::Cancel,
    }
}

pub struct Dispatcher {
    pool: DbPool,
    registry: Arc<dyn ServiceRegistry>,
    destination: Arc<Destination>,
    router: Router,
    /// This supervisor's own endpoint, for `LOCAL_PRIORITY` routing.
    local_worker: Option<ServerEndpoint>,
}

impl Dispatcher {
    pub fn new(
        pool: DbPool,
        registry: Arc<dyn ServiceRegistry>,
        destination: Arc<Destination>,
        local_worker: Option<ServerEndpoint>,
    ) -> Self {
        Self { pool, registry, destination, router: Router::new(), local_worker }
    }

    /// Execute every intent in `effect`, independently of one another — a
    /// failure dispatching one instance's tasks must not block the rest.
    ///
    /// Finalizing a DISPATCH_FAILED task can itself produce a retry-cascade
    /// effect (§4.1); rather than recurse, those follow-on effects are
    /// queued and drained iteratively so the future this method returns
    /// stays a fixed size.
    pub async fn dispatch(&self, effect: Effect, state_machine: &StateMachine, next_ids: &mut impl FnMut() -> i64) {
        let mut queue = vec![effect];
        while let Some(effect) = queue.pop() {
            for intent in effect.intents {
                match self.dispatch_intent(&intent, state_machine, next_ids).await {
                    Ok(follow_on) => {
                        if !follow_on.is_empty() {
                            queue.push(follow_on);
                        }
                    }
                    Err(err) => {
                        error!(instance_id = intent.instance.instance_id, error = %err, "failed to dispatch intent");
                    }
                }
            }
        }
    }

    async fn dispatch_intent(
        &self,
        intent: &DispatchIntent,
        state_machine: &StateMachine,
        next_ids: &mut impl FnMut() -> i64,
    ) -> Result<Effect, DispatchError> {
        let candidates = self.registry.discovered_servers(Role::Worker, Some(&intent.job.group)).await?;
        let mut follow_on = Effect::none();

        for task in &intent.tasks {
            let Some(worker) = self.resolve_worker(intent, task, &candidates) else {
                warn!(task_id = task.task_id, group = %intent.job.group, "no worker available to dispatch task");
                continue;
            };

            let param = ExecuteTaskParam {
                task_id: task.task_id,
                instance_id: intent.instance.instance_id,
                wnstance_id: intent.instance.wnstance_id,
                job_id: intent.job.job_id,
                trigger_time: intent.instance.trigger_time,
                execute_timeout_ms: None,
                operation: to_wire_operation(intent.operation),
                route_strategy: intent.job.route_strategy,
                worker: worker.clone(),
                job_type: intent.job.job_type,
                job_param: task.task_param.clone(),
            };

            match self.destination.invoke::<_, bool>(&worker, "/worker/rpc/receive", &param).await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    follow_on = follow_on.merge(self.on_dispatch_failure(task, state_machine, next_ids).await?);
                }
            }
        }
        Ok(follow_on)
    }

    /// A task already pinned to a worker (broadcast fan-out, a pinned
    /// retry, or a live EXECUTING task behind a PAUSE/CANCEL intent) always
    /// goes back to that exact worker rather than through routing, which
    /// could resolve a different candidate than the one actually holding
    /// the task.
    fn resolve_worker(&self, intent: &DispatchIntent, task: &Task, candidates: &[ServerEndpoint]) -> Option<ServerEndpoint> {
        if let Some(pinned) = &task.worker {
            return Some(pinned.clone());
        }
        self.router.resolve(intent.job.route_strategy, &intent.job.group, task.task_id, candidates, self.local_worker.as_ref())
    }

    async fn on_dispatch_failure(
        &self,
        task: &Task,
        state_machine: &StateMachine,
        next_ids: &mut impl FnMut() -> i64,
    ) -> Result<Effect, DispatchError> {
        let count = repository::tasks::increment_dispatch_failed_count(&self.pool, task.task_id).await?;
        if count < DISPATCH_FAILED_THRESHOLD {
            warn!(task_id = task.task_id, count, "dispatch failed, will retry on next sweep");
            return Ok(Effect::none());
        }
        warn!(task_id = task.task_id, count, "dispatch failed threshold reached, finalizing as DISPATCH_FAILED");
        let live_workers = self.registry.discovered_servers(Role::Worker, None).await?.into_iter().map(|s| s.to_wire()).collect();
        let effect = state_machine
            .terminate_task(task.task_id, ExecuteState::DispatchFailed, Some("dispatch retries exhausted"), next_ids, &live_workers)
            .await?;
        Ok(effect)
    }
}
