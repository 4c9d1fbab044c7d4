//! Worker-side timing wheel — a bounded-delay FIFO bucketed by `tickMs`
//! with `ringSize` buckets (§4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use taskmesh_registry::ServerEndpoint;
use taskmesh_rpc::messages::ExecuteTaskParam;

#[derive(Debug, Clone, Copy)]
pub struct TimingWheelConfig {
    pub tick_ms: i64,
    pub ring_size: usize,
    /// Max items a single bucket may hold before `offer` reports overflow.
    pub bucket_capacity: usize,
}

impl Default for TimingWheelConfig {
    fn default() -> Self {
        Self { tick_ms: 1_000, ring_size: 60, bucket_capacity: 4_096 }
    }
}

/// Why an `offer` was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferRejection {
    WrongWorker,
    BucketFull,
    DuplicateTaskId,
}

struct Bucket {
    items: Mutex<HashMap<i64, ExecuteTaskParam>>,
}

impl Bucket {
    fn new() -> Self {
        Self { items: Mutex::new(HashMap::new()) }
    }
}

/// A single worker's admission queue. One instance per worker process.
pub struct TimingWheel {
    config: TimingWheelConfig,
    this_worker: ServerEndpoint,
    buckets: Vec<Bucket>,
    cursor: AtomicUsize,
}

impl TimingWheel {
    pub fn new(config: TimingWheelConfig, this_worker: ServerEndpoint) -> Self {
        let buckets = (0..config.ring_size).map(|_| Bucket::new()).collect();
        Self { config, this_worker, buckets, cursor: AtomicUsize::new(0) }
    }

    fn bucket_index(&self, trigger_time_millis: i64) -> usize {
        let slot = trigger_time_millis / self.config.tick_ms;
        (slot.rem_euclid(self.config.ring_size as i64)) as usize
    }

    /// Admit `param`. Rejects a mismatched worker, a duplicate `taskId`
    /// already pending in the same bucket, or a full bucket.
    pub fn offer(&self, param: ExecuteTaskParam) -> Result<(), OfferRejection> {
        if param.worker.address() != self.this_worker.address() {
            return Err(OfferRejection::WrongWorker);
        }
        let index = self.bucket_index(param.trigger_time.timestamp_millis());
        let mut items = self.buckets[index].items.lock().unwrap();
        if items.contains_key(&param.task_id) {
            return Err(OfferRejection::DuplicateTaskId);
        }
        if items.len() >= self.config.bucket_capacity {
            return Err(OfferRejection::BucketFull);
        }
        items.insert(param.task_id, param);
        Ok(())
    }

    /// Drop a pending item before it comes due — used when a PAUSE/CANCEL
    /// intent reaches a task that's still admitted but not yet executing.
    /// Returns `false` if the task already came due (or was never offered).
    pub fn remove(&self, task_id: i64, trigger_time_millis: i64) -> bool {
        let index = self.bucket_index(trigger_time_millis);
        self.buckets[index].items.lock().unwrap().remove(&task_id).is_some()
    }

    /// Advance one tick and return everything due in the bucket the cursor
    /// now points at, in arbitrary order. The poller calls this once per
    /// `tick_ms`.
    pub fn advance(&self) -> Vec<ExecuteTaskParam> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.config.ring_size;
        let mut items = self.buckets[index].items.lock().unwrap();
        items.drain().map(|(_, v)| v).collect()
    }

    pub fn config(&self) -> TimingWheelConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn endpoint() -> ServerEndpoint {
        ServerEndpoint::new(taskmesh_registry::Role::Worker, "127.0.0.1", 9000)
    }

    fn param(task_id: i64, worker: ServerEndpoint) -> ExecuteTaskParam {
        ExecuteTaskParam {
            task_id,
            instance_id: 1,
            wnstance_id: None,
            job_id: 1,
            trigger_time: Utc::now(),
            execute_timeout_ms: None,
            operation: taskmesh_rpc::messages::DispatchOperationWire::Execute,
            route_strategy: taskmesh_core::RouteStrategy::RoundRobin,
            worker,
            job_type: taskmesh_core::JobType::Normal,
            job_param: None,
        }
    }

    #[test]
    fn offer_rejects_wrong_worker() {
        let wheel = TimingWheel::new(TimingWheelConfig::default(), endpoint());
        let other = ServerEndpoint::new(taskmesh_registry::Role::Worker, "10.0.0.2", 9001);
        assert_eq!(wheel.offer(param(1, other)), Err(OfferRejection::WrongWorker));
    }

    #[test]
    fn offer_rejects_duplicate_task_id_in_same_bucket() {
        let wheel = TimingWheel::new(TimingWheelConfig { tick_ms: 60_000, ring_size: 4, bucket_capacity: 10 }, endpoint());
        assert!(wheel.offer(param(1, endpoint())).is_ok());
        assert_eq!(wheel.offer(param(1, endpoint())), Err(OfferRejection::DuplicateTaskId));
    }

    #[test]
    fn offer_rejects_when_bucket_full() {
        let wheel = TimingWheel::new(TimingWheelConfig { tick_ms: 60_000, ring_size: 1, bucket_capacity: 1 }, endpoint());
        assert!(wheel.offer(param(1, endpoint())).is_ok());
        assert_eq!(wheel.offer(param(2, endpoint())), Err(OfferRejection::BucketFull));
    }

    #[test]
    fn advance_drains_exactly_one_bucket_per_call() {
        let wheel = TimingWheel::new(TimingWheelConfig { tick_ms: 60_000, ring_size: 2, bucket_capacity: 10 }, endpoint());
        assert!(wheel.offer(param(1, endpoint())).is_ok());
        let first = wheel.advance();
        let second = wheel.advance();
        assert_eq!(first.len() + second.len(), 1);
    }
}
