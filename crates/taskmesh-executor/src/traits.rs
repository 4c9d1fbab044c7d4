//! The `JobExecutor` trait — the contract every task handler must fulfil.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::ExecutorError;

/// The data a worker hands to an executor for a single task attempt.
///
/// Defined here (in the executor crate) so both the dispatch crate and
/// individual executor implementations can import it without a circular
/// dependency back to `taskmesh-core`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskPayload {
    pub task_id: i64,
    pub instance_id: i64,
    pub job_id: i64,
    /// The job's configured executor identifier (class name, shell command,
    /// HTTP URL, ...) — interpretation is up to the concrete executor.
    pub executor_text: String,
    /// The job's static parameters, merged with any instance-specific
    /// override supplied at trigger time.
    pub job_param: Option<String>,
    /// This task's shard index and total shard count, for jobs split across
    /// multiple workers (shard 0 of 1 for unsplit jobs).
    pub shard_index: u32,
    pub shard_total: u32,
    /// Which attempt this is (0 for the first try, incremented per retry).
    pub retry_count: u32,
}

/// Shared context passed to every executor during execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub worker_id: Uuid,
    /// Arbitrary environment tags the executor may use to branch behaviour
    /// (e.g. a worker's configured groups).
    pub tags: HashMap<String, String>,
}

/// The outcome of a successful task execution.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TaskReport {
    /// Free-form output surfaced in the task's log / result record.
    pub output: Option<Value>,
    /// Opaque progress snapshot an executor can use across retries (e.g. an
    /// offset into a file being processed).
    pub snapshot: Option<Value>,
}

/// The core executor trait.
///
/// All built-in executors (shell, HTTP callback, JVM-style class dispatch
/// analogues) and any embedder-supplied executor must implement this.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one task attempt to completion.
    ///
    /// Implementations that perform long-running work should poll
    /// `ctx` / external cancellation signals cooperatively; the worker does
    /// not forcibly kill the future, it only stops awaiting it past the
    /// timeout and reports `ExecutorError::Timeout`.
    async fn execute(
        &self,
        payload: TaskPayload,
        ctx: &ExecutionContext,
    ) -> Result<TaskReport, ExecutorError>;
}
