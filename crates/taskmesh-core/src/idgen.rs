//! Distributed id generation for instances and tasks.
//!
//! Every [`crate::machine::StateMachine`] method takes `next_ids: &mut impl
//! FnMut() -> i64` rather than generating ids itself, so callers can plug in
//! whatever scheme fits their deployment (a single-process counter in
//! tests, a snowflake-style generator across a supervisor cluster). This
//! module provides the latter.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bits reserved for the sequence counter within one millisecond. 4096
/// ids/ms/worker is generous headroom for instance/task creation, which
/// only happens on scanner sweeps and terminal transitions.
const SEQUENCE_BITS: u32 = 12;
const WORKER_ID_BITS: u32 = 10;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;

/// A Twitter-Snowflake-style id generator: `[timestamp_ms | worker_id |
/// sequence]`, monotonically increasing within one process and collision-free
/// across a cluster as long as every supervisor is assigned a distinct
/// `worker_id`.
pub struct SnowflakeGenerator {
    worker_id: i64,
    state: AtomicI64,
}

impl SnowflakeGenerator {
    /// `worker_id` must be unique across every supervisor in the cluster and
    /// fit in [`WORKER_ID_BITS`] bits.
    pub fn new(worker_id: i64) -> Self {
        assert!(worker_id >= 0 && worker_id <= MAX_WORKER_ID, "worker_id out of range");
        Self { worker_id, state: AtomicI64::new(0) }
    }

    pub fn next_id(&self) -> i64 {
        loop {
            let now = now_millis();
            let prev = self.state.load(Ordering::Relaxed);
            let (prev_ms, prev_seq) = unpack(prev);

            let (ms, seq) = if now > prev_ms {
                (now, 0)
            } else {
                (prev_ms, (prev_seq + 1) & SEQUENCE_MASK)
                    .pipe(|(ms, seq)| if seq == 0 { (prev_ms + 1, 0) } else { (ms, seq) })
            };

            let packed = pack(ms, seq);
            if self.state.compare_exchange_weak(prev, packed, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
                return (ms << (WORKER_ID_BITS + SEQUENCE_BITS)) | (self.worker_id << SEQUENCE_BITS) | seq;
            }
        }
    }

    /// A `FnMut() -> i64` closure bound to this generator, for direct use
    /// as the `next_ids` argument of `StateMachine` methods.
    pub fn as_next_ids(&self) -> impl FnMut() -> i64 + '_ {
        move || self.next_id()
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn pack(ms: i64, seq: i64) -> i64 {
    (ms << SEQUENCE_BITS) | seq
}

fn unpack(packed: i64) -> (i64, i64) {
    (packed >> SEQUENCE_BITS, packed & SEQUENCE_MASK)
}

trait Pipe: Sized {
    fn pipe<T>(self, f: impl FnOnce(Self) -> T) -> T {
        f(self)
    }
}
impl<T> Pipe for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_strictly_increasing_ids() {
        let gen = SnowflakeGenerator::new(1);
        let mut last = gen.next_id();
        for _ in 0..1000 {
            let id = gen.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn distinct_worker_ids_never_collide_within_the_same_millisecond() {
        let a = SnowflakeGenerator::new(1);
        let b = SnowflakeGenerator::new(2);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            assert!(seen.insert(a.next_id()));
            assert!(seen.insert(b.next_id()));
        }
    }

    #[test]
    fn as_next_ids_is_usable_as_a_fn_mut_closure() {
        let gen = SnowflakeGenerator::new(3);
        let mut next = gen.as_next_ids();
        let a = next();
        let b = next();
        assert!(b > a);
    }
}
