//! Executor-level error type.

use thiserror::Error;

/// Errors returned by a [`crate::JobExecutor`]'s `execute` method.
///
/// The worker's execute pool (`taskmesh-dispatch`) uses the variant to pick
/// the terminal execute-state reported back to the supervisor:
/// - `Retryable` — the supervisor's retry cascade decides whether to retry,
///   per the job's configured retry policy.
/// - `Fatal` — unconditionally terminal, no retry regardless of policy.
/// - `Timeout` — the executor did not report within `executeTimeoutMs`.
#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    #[error("retryable executor error: {0}")]
    Retryable(String),

    #[error("fatal executor error: {0}")]
    Fatal(String),

    #[error("executor timed out: {0}")]
    Timeout(String),
}
