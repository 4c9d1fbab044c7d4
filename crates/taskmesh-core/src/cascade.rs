//! Retry and dependency cascades — the pure decision logic behind §4.1's
//! "Retry cascade" and "Dependency cascade" rules.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use taskmesh_registry::ServerEndpoint;

use crate::model::{Job, RetryType, Task};
use crate::split::split;
use crate::EngineError;

/// Whether a CANCELED instance is eligible for a retry instance at all.
pub fn should_retry(job: &Job, retried_count: u32) -> bool {
    job.retry_type != RetryType::None && retried_count < job.retry_count
}

/// Exponential backoff multiplier applied to `retryInterval`. Mirrors the
/// `base_delay * 2^attempt` shape used for retryable executor failures.
pub fn retry_backoff_multiplier(retried_count: u32) -> i64 {
    1i64 << retried_count.min(16)
}

/// `now + retryInterval * f(retriedCount)`.
pub fn compute_retry_trigger_time(now: DateTime<Utc>, job: &Job, retried_count: u32) -> DateTime<Utc> {
    now + Duration::milliseconds(job.retry_interval_ms * retry_backoff_multiplier(retried_count))
}

/// One task to materialize under the retry instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTaskSpec {
    pub task_param: Option<String>,
    /// `Some` only for a cloned BROADCAST task still pinned to a live worker.
    pub pinned_worker: Option<ServerEndpoint>,
}

/// Decide which tasks a retry instance should carry.
///
/// `ALL` re-splits from `jobParam` (fresh, unpinned tasks). `FAILED` clones
/// only the previously-failed tasks, dropping any that were pinned to a
/// worker no longer present in `live_workers` (by wire address) — per §8
/// scenario 6, a fully-dead broadcast retry set yields zero tasks and the
/// caller must abandon the retry rather than create an empty instance.
pub fn select_retry_tasks(
    job: &Job,
    tasks: &[Task],
    live_workers: &HashSet<String>,
) -> Result<Vec<RetryTaskSpec>, EngineError> {
    match job.retry_type {
        RetryType::None => Ok(Vec::new()),
        RetryType::All => Ok(split(job.job_id, job.job_param.as_deref())?
            .into_iter()
            .map(|task_param| RetryTaskSpec { task_param, pinned_worker: None })
            .collect()),
        RetryType::Failed => Ok(tasks
            .iter()
            .filter(|t| t.execute_state.is_failure())
            .filter(|t| match &t.worker {
                Some(w) => live_workers.contains(&w.to_wire()),
                None => true,
            })
            .map(|t| RetryTaskSpec { task_param: t.task_param.clone(), pinned_worker: t.worker.clone() })
            .collect()),
    }
}

/// `unixMs + depend.sequence` — staggers dependents of the same parent so
/// they never collide on `(jobId, triggerTime, runType)`.
pub fn dependency_trigger_time(now: DateTime<Utc>, sequence: u32) -> DateTime<Utc> {
    now + Duration::milliseconds(sequence as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollisionStrategy, ExecuteState, JobState, JobType, RouteStrategy, TriggerType};

    fn job(retry_type: RetryType, retry_count: u32) -> Job {
        Job {
            job_id: 1,
            group: "default".into(),
            job_type: JobType::Normal,
            job_state: JobState::Enable,
            trigger_type: TriggerType::Cron,
            trigger_value: "* * * * * *".into(),
            route_strategy: RouteStrategy::RoundRobin,
            retry_type,
            retry_count,
            retry_interval_ms: 1000,
            collision_strategy: CollisionStrategy::Concurrent,
            executor_text: "demo".into(),
            job_param: Some("a,b".into()),
            next_trigger_time: None,
            last_trigger_time: None,
        }
    }

    fn task(id: i64, state: ExecuteState, worker: Option<ServerEndpoint>) -> Task {
        Task {
            task_id: id,
            instance_id: 1,
            task_no: 0,
            task_count: 1,
            task_param: None,
            execute_state: state,
            worker,
            execute_start_time: None,
            execute_end_time: None,
            execute_snapshot: None,
            dispatch_failed_count: 0,
            error_msg: None,
        }
    }

    #[test]
    fn should_retry_respects_type_and_count() {
        assert!(!should_retry(&job(RetryType::None, 5), 0));
        assert!(should_retry(&job(RetryType::All, 3), 0));
        assert!(!should_retry(&job(RetryType::All, 3), 3));
    }

    #[test]
    fn backoff_multiplier_doubles_each_attempt() {
        assert_eq!(retry_backoff_multiplier(0), 1);
        assert_eq!(retry_backoff_multiplier(1), 2);
        assert_eq!(retry_backoff_multiplier(3), 8);
    }

    #[test]
    fn select_retry_tasks_all_resplits_job_param() {
        let j = job(RetryType::All, 3);
        let specs = select_retry_tasks(&j, &[], &HashSet::new()).unwrap();
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| s.pinned_worker.is_none()));
    }

    #[test]
    fn select_retry_tasks_failed_drops_dead_broadcast_workers() {
        let j = job(RetryType::Failed, 1);
        let alive = ServerEndpoint::new(taskmesh_registry::Role::Worker, "10.0.0.1", 9000);
        let dead = ServerEndpoint::new(taskmesh_registry::Role::Worker, "10.0.0.2", 9000);
        let tasks = vec![
            task(1, ExecuteState::ExecuteFailed, Some(alive.clone())),
            task(2, ExecuteState::ExecuteFailed, Some(dead.clone())),
            task(3, ExecuteState::Completed, Some(alive.clone())),
        ];
        let mut live = HashSet::new();
        live.insert(alive.to_wire());

        let specs = select_retry_tasks(&j, &tasks, &live).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].pinned_worker, Some(alive));
    }

    #[test]
    fn select_retry_tasks_failed_all_dead_yields_empty() {
        let j = job(RetryType::Failed, 1);
        let dead = ServerEndpoint::new(taskmesh_registry::Role::Worker, "10.0.0.2", 9000);
        let tasks = vec![task(1, ExecuteState::ExecuteFailed, Some(dead))];
        let specs = select_retry_tasks(&j, &tasks, &HashSet::new()).unwrap();
        assert!(specs.is_empty());
    }

    #[test]
    fn dependency_trigger_time_staggers_by_sequence() {
        let now = Utc::now();
        assert_eq!(dependency_trigger_time(now, 0), now);
        assert_eq!(dependency_trigger_time(now, 50), now + Duration::milliseconds(50));
    }
}
