//! Computes a job's next `nextTriggerTime` from its `triggerType`/`triggerValue`.
//!
//! Cron/DAG expression parsing is an external collaborator the core only
//! consumes the interface of; this wraps the `cron` crate the way
//! `openobserve-swisspipe` does for its own pipeline scheduler.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::model::{Job, TriggerType};
use crate::EngineError;

/// Compute the next fire time strictly after `after`, or `None` if the job
/// should not be rescheduled (a one-shot that already fired, or a
/// dependency-only job).
pub fn next_trigger_time(job: &Job, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, EngineError> {
    match job.trigger_type {
        TriggerType::Cron => {
            let schedule = Schedule::from_str(&job.trigger_value).map_err(|err| EngineError::InvalidTriggerValue {
                job_id: job.job_id,
                trigger_type: job.trigger_type,
                reason: err.to_string(),
            })?;
            Ok(schedule.after(&after).next())
        }
        TriggerType::Once => {
            let millis: i64 = job.trigger_value.trim().parse().map_err(|_| EngineError::InvalidTriggerValue {
                job_id: job.job_id,
                trigger_type: job.trigger_type,
                reason: format!("'{}' is not an epoch-millis integer", job.trigger_value),
            })?;
            let fire_at = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| EngineError::InvalidTriggerValue {
                job_id: job.job_id,
                trigger_type: job.trigger_type,
                reason: format!("'{millis}' is out of range"),
            })?;
            // Already fired (or about to, in this same sweep) -> never again.
            Ok(if fire_at > after { Some(fire_at) } else { None })
        }
        // PERIOD and FIXED_RATE both compute from the time that just fired,
        // giving a fixed cadence independent of how long the instance took
        // to run. FIXED_DELAY would properly compute from the instance's
        // completion time, which the scanner (trigger-time-only) doesn't
        // have visibility into — treated the same as PERIOD/FIXED_RATE here,
        // a documented simplification.
        TriggerType::Period | TriggerType::FixedRate | TriggerType::FixedDelay => {
            let millis = parse_interval_millis(job)?;
            Ok(after.checked_add_signed(chrono::Duration::milliseconds(millis)))
        }
        TriggerType::Depend => Ok(None),
    }
}

fn parse_interval_millis(job: &Job) -> Result<i64, EngineError> {
    job.trigger_value.trim().parse().map_err(|_| EngineError::InvalidTriggerValue {
        job_id: job.job_id,
        trigger_type: job.trigger_type,
        reason: format!("'{}' is not a millisecond interval", job.trigger_value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollisionStrategy, JobState, JobType, RetryType, RouteStrategy};

    fn job(trigger_type: TriggerType, trigger_value: &str) -> Job {
        Job {
            job_id: 1,
            group: "default".into(),
            job_type: JobType::Normal,
            job_state: JobState::Enable,
            trigger_type,
            trigger_value: trigger_value.to_owned(),
            route_strategy: RouteStrategy::RoundRobin,
            retry_type: RetryType::None,
            retry_count: 0,
            retry_interval_ms: 0,
            collision_strategy: CollisionStrategy::Concurrent,
            executor_text: "noop".into(),
            job_param: None,
            next_trigger_time: None,
            last_trigger_time: None,
        }
    }

    #[test]
    fn period_advances_by_interval() {
        let j = job(TriggerType::Period, "5000");
        let now = Utc::now();
        let next = next_trigger_time(&j, now).unwrap().unwrap();
        assert_eq!((next - now).num_milliseconds(), 5000);
    }

    #[test]
    fn once_fires_exactly_once() {
        let now = Utc::now();
        let fire_at = now + chrono::Duration::seconds(10);
        let j = job(TriggerType::Once, &fire_at.timestamp_millis().to_string());
        assert!(next_trigger_time(&j, now).unwrap().is_some());
        assert!(next_trigger_time(&j, fire_at).unwrap().is_none());
    }

    #[test]
    fn depend_never_self_schedules() {
        let j = job(TriggerType::Depend, "");
        assert_eq!(next_trigger_time(&j, Utc::now()).unwrap(), None);
    }

    #[test]
    fn cron_computes_next_occurrence() {
        let j = job(TriggerType::Cron, "0 * * * * * *");
        let now = Utc::now();
        let next = next_trigger_time(&j, now).unwrap().unwrap();
        assert!(next > now);
    }

    #[test]
    fn malformed_cron_is_rejected() {
        let j = job(TriggerType::Cron, "not a cron expression");
        assert!(next_trigger_time(&j, Utc::now()).is_err());
    }
}
