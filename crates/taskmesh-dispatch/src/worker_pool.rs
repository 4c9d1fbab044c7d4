//! Worker-side bounded executor pool — pulls due items off the timing
//! wheel, instantiates the registered job executor, and reports the
//! terminal state back to the supervisor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use taskmesh_core::ExecuteState;
use taskmesh_executor::{ExecutionContext, ExecutorError, JobExecutor, TaskPayload};
use taskmesh_registry::ServerEndpoint;
use taskmesh_rpc::destination::Destination;
use taskmesh_rpc::messages::{DispatchOperationWire, ExecuteTaskParam, StartTaskParam, TerminateTaskParam};

use crate::timing_wheel::TimingWheel;

/// Which out-of-band control request last hit a currently-executing task —
/// decides what terminal state `run_one` reports once the executor future
/// is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Pause,
    Cancel,
}

/// Tracks one in-flight `execute()` call so `/worker/rpc/receive` can
/// interrupt it out of band. Mirrors the execute-timeout path: the executor
/// future is raced against `token.cancelled()` and the loser is dropped,
/// which is exactly the cooperative-cancellation contract `JobExecutor`
/// already documents.
struct Inflight {
    token: CancellationToken,
    signal: std::sync::Mutex<Option<ControlSignal>>,
}

/// What a worker knows about running a given job: which executor
/// implementation to invoke and the opaque identifier (class name, shell
/// command, ...) to pass it. Not part of the wire contract — a worker
/// learns this out of band (deployment config / `/worker/rpc/configure`)
/// since `ExecuteTaskParam` only carries `jobId`.
#[derive(Clone)]
pub struct JobRegistration {
    pub executor_text: String,
    pub executor: Arc<dyn JobExecutor>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<i64, JobRegistration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: i64, registration: JobRegistration) {
        self.jobs.insert(job_id, registration);
    }

    pub fn get(&self, job_id: i64) -> Option<JobRegistration> {
        self.jobs.get(&job_id).map(|r| r.clone())
    }
}

pub struct WorkerPoolConfig {
    pub max_concurrency: usize,
    pub worker: ServerEndpoint,
    /// The supervisor this worker reports `startTask`/`terminateTask` back
    /// to — fixed at construction, since `ExecuteTaskParam` carries no
    /// "reply to" address of its own.
    pub supervisor: ServerEndpoint,
}

/// Bounded pool draining a [`TimingWheel`] and executing tasks through
/// whatever [`JobExecutor`] the job's registration names.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    registry: Arc<JobRegistry>,
    destination: Arc<Destination>,
    config: WorkerPoolConfig,
    current_size: AtomicUsize,
    inflight: Arc<DashMap<i64, Arc<Inflight>>>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, registry: Arc<JobRegistry>, destination: Arc<Destination>) -> Self {
        let current_size = AtomicUsize::new(config.max_concurrency);
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            registry,
            destination,
            config,
            current_size,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// `/worker/rpc/receive` for a PAUSE/CANCEL intent against a task this
    /// worker is currently executing. Returns `false` if the task isn't
    /// actually in flight here (already finished, or dispatched elsewhere)
    /// so the caller can fall back to whatever eviction still applies.
    pub fn signal_executing(&self, task_id: i64, operation: DispatchOperationWire) -> bool {
        let signal = match operation {
            DispatchOperationWire::Pause => ControlSignal::Pause,
            DispatchOperationWire::Cancel => ControlSignal::Cancel,
            DispatchOperationWire::Execute => return false,
        };
        let Some(handle) = self.inflight.get(&task_id) else {
            return false;
        };
        *handle.signal.lock().expect("inflight signal mutex poisoned") = Some(signal);
        handle.token.cancel();
        true
    }

    /// Current concurrency ceiling, for `/worker/rpc/metrics`.
    pub fn pool_size(&self) -> u32 {
        self.current_size.load(Ordering::Relaxed) as u32
    }

    /// Tasks currently holding a permit, for `/worker/rpc/metrics`.
    pub fn active_count(&self) -> u32 {
        self.pool_size().saturating_sub(self.semaphore.available_permits() as u32)
    }

    /// `/worker/rpc/configure`: grow the pool by handing out extra permits.
    /// Shrinking is not supported — `tokio::sync::Semaphore` has no way to
    /// revoke a permit already lent out, so a request to shrink below the
    /// current size is logged and ignored.
    pub fn resize(&self, new_size: u32) {
        let current = self.current_size.load(Ordering::Relaxed) as u32;
        if new_size > current {
            self.semaphore.add_permits((new_size - current) as usize);
            self.current_size.store(new_size as usize, Ordering::Relaxed);
        } else if new_size < current {
            warn!(current, requested = new_size, "shrinking the executor pool is not supported, ignoring");
        }
    }

    /// Run the timing-wheel poller: advance one bucket per `tick_ms` and
    /// hand every due item to the executor pool without blocking the tick.
    pub async fn run_poller(&self, wheel: Arc<TimingWheel>, stopped: Arc<std::sync::atomic::AtomicBool>) {
        let tick = Duration::from_millis(wheel.config().tick_ms as u64);
        let mut interval = tokio::time::interval(tick);
        while !stopped.load(std::sync::atomic::Ordering::Relaxed) {
            interval.tick().await;
            for param in wheel.advance() {
                self.spawn(param);
            }
        }
    }

    fn spawn(&self, param: ExecuteTaskParam) {
        if matches!(param.operation, DispatchOperationWire::Pause | DispatchOperationWire::Cancel) {
            warn!(task_id = param.task_id, "pause/cancel admission is out-of-band and should not reach the timing wheel");
            return;
        }
        let semaphore = self.semaphore.clone();
        let registry = self.registry.clone();
        let destination = self.destination.clone();
        let worker = self.config.worker.clone();
        let supervisor = self.config.supervisor.clone();
        let inflight = self.inflight.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            run_one(param, registry, destination, worker, supervisor, inflight).await;
        });
    }
}

/// Removes a task's [`Inflight`] handle on every exit path out of
/// `run_one`, so a PAUSE/CANCEL arriving after the task has already
/// finished finds nothing to signal.
struct InflightGuard {
    inflight: Arc<DashMap<i64, Arc<Inflight>>>,
    task_id: i64,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.remove(&self.task_id);
    }
}

async fn run_one(
    param: ExecuteTaskParam,
    registry: Arc<JobRegistry>,
    destination: Arc<Destination>,
    worker: ServerEndpoint,
    supervisor: ServerEndpoint,
    inflight: Arc<DashMap<i64, Arc<Inflight>>>,
) {
    let task_id = param.task_id;
    let instance_id = param.instance_id;

    let start_ok = destination
        .invoke::<_, bool>(
            &supervisor,
            "/supervisor/rpc/startTask",
            &StartTaskParam { task_id, instance_id, worker: worker.clone() },
        )
        .await
        .unwrap_or(false);
    if !start_ok {
        info!(task_id, "startTask rejected, task already claimed elsewhere");
        return;
    }

    let handle = Arc::new(Inflight { token: CancellationToken::new(), signal: std::sync::Mutex::new(None) });
    inflight.insert(task_id, handle.clone());
    let _guard = InflightGuard { inflight, task_id };

    let Some(registration) = registry.get(param.job_id) else {
        report_terminal(&destination, &supervisor, task_id, instance_id, param.wnstance_id, ExecuteState::InitException, Some(format!("no executor registered for job {}", param.job_id))).await;
        return;
    };

    let payload = TaskPayload {
        task_id,
        instance_id,
        job_id: param.job_id,
        executor_text: registration.executor_text.clone(),
        job_param: param.job_param.clone(),
        shard_index: 0,
        shard_total: 1,
        retry_count: 0,
    };
    let ctx = ExecutionContext { worker_id: uuid::Uuid::new_v4(), tags: HashMap::new() };
    let execute_fut = registration.executor.execute(payload, &ctx);

    let raced = match param.execute_timeout_ms {
        Some(ms) if ms > 0 => {
            tokio::select! {
                result = tokio::time::timeout(Duration::from_millis(ms as u64), execute_fut) => Some(match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ExecutorError::Timeout(format!("task {task_id} exceeded {ms}ms"))),
                }),
                _ = handle.token.cancelled() => None,
            }
        }
        _ => {
            tokio::select! {
                result = execute_fut => Some(result),
                _ = handle.token.cancelled() => None,
            }
        }
    };

    let Some(outcome) = raced else {
        let signal = handle.signal.lock().expect("inflight signal mutex poisoned").take();
        let to_state = if signal == Some(ControlSignal::Pause) { ExecuteState::Paused } else { ExecuteState::ManualCanceled };
        report_terminal(&destination, &supervisor, task_id, instance_id, param.wnstance_id, to_state, None).await;
        return;
    };

    match outcome {
        Ok(_report) => {
            report_terminal(&destination, &supervisor, task_id, instance_id, param.wnstance_id, ExecuteState::Completed, None).await;
        }
        Err(ExecutorError::Retryable(msg)) => {
            error!(task_id, error = %msg, "task failed retryably");
            report_terminal(&destination, &supervisor, task_id, instance_id, param.wnstance_id, ExecuteState::ExecuteFailed, Some(msg)).await;
        }
        Err(ExecutorError::Fatal(msg)) => {
            error!(task_id, error = %msg, "task failed fatally");
            report_terminal(&destination, &supervisor, task_id, instance_id, param.wnstance_id, ExecuteState::ExecuteException, Some(msg)).await;
        }
        Err(ExecutorError::Timeout(msg)) => {
            error!(task_id, error = %msg, "task timed out");
            report_terminal(&destination, &supervisor, task_id, instance_id, param.wnstance_id, ExecuteState::ExecuteTimeout, Some(msg)).await;
        }
    }
}

async fn report_terminal(
    destination: &Destination,
    supervisor: &ServerEndpoint,
    task_id: i64,
    instance_id: i64,
    wnstance_id: Option<i64>,
    to_state: ExecuteState,
    error_msg: Option<String>,
) {
    let body = TerminateTaskParam {
        task_id,
        instance_id,
        wnstance_id,
        to_state,
        error_msg,
        operation: DispatchOperationWire::Execute,
    };
    if let Err(err) = destination
        .invoke::<_, bool>(supervisor, "/supervisor/rpc/terminateTask", &body)
        .await
    {
        error!(task_id, error = %err, "failed to report terminal task state to supervisor");
    }
}
