//! Supervisor-side route resolution: turn `(RouteStrategy, candidates)` into
//! one concrete worker per task.
//!
//! `BROADCAST` never reaches this module — broadcast tasks already carry
//! their pinned worker from `materialize_broadcast` (§4.1). Everything else
//! picks one of the job group's currently discovered workers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use taskmesh_registry::ServerEndpoint;
use taskmesh_core::RouteStrategy;

const HASH_RING_VIRTUAL_NODES: u32 = 100;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Stateful router: holds the round-robin cursor per group and the
/// least-recently-used timestamps per worker address, both of which must
/// survive across calls to behave as their names promise.
#[derive(Default)]
pub struct Router {
    round_robin_cursors: DashMap<String, AtomicU64>,
    last_used: DashMap<String, i64>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve one worker for `task_key` (used to seed deterministic
    /// strategies) among `candidates`, which must already be the
    /// group-filtered, sorted discovery snapshot.
    pub fn resolve(
        &self,
        strategy: RouteStrategy,
        group: &str,
        task_key: i64,
        candidates: &[ServerEndpoint],
        local_worker: Option<&ServerEndpoint>,
    ) -> Option<ServerEndpoint> {
        if candidates.is_empty() {
            return None;
        }
        match strategy {
            RouteStrategy::Broadcast => None,
            RouteStrategy::RoundRobin => self.round_robin(group, candidates),
            RouteStrategy::Random => self.random(candidates),
            RouteStrategy::LeastRecentlyUsed => self.least_recently_used(candidates),
            RouteStrategy::ConsistentHash => self.consistent_hash(task_key, candidates),
            RouteStrategy::LocalPriority => self.local_priority(group, candidates, local_worker),
        }
    }

    fn round_robin(&self, group: &str, candidates: &[ServerEndpoint]) -> Option<ServerEndpoint> {
        let cursor = self
            .round_robin_cursors
            .entry(group.to_owned())
            .or_insert_with(|| AtomicU64::new(0));
        let index = cursor.fetch_add(1, Ordering::Relaxed) as usize % candidates.len();
        let chosen = candidates[index].clone();
        self.touch(&chosen);
        Some(chosen)
    }

    fn random(&self, candidates: &[ServerEndpoint]) -> Option<ServerEndpoint> {
        let index = rand::random::<usize>() % candidates.len();
        let chosen = candidates[index].clone();
        self.touch(&chosen);
        Some(chosen)
    }

    fn least_recently_used(&self, candidates: &[ServerEndpoint]) -> Option<ServerEndpoint> {
        let chosen = candidates
            .iter()
            .min_by_key(|c| self.last_used.get(&c.address()).map(|v| *v).unwrap_or(0))
            .cloned()?;
        self.touch(&chosen);
        Some(chosen)
    }

    /// A small hash ring with `HASH_RING_VIRTUAL_NODES` virtual nodes per
    /// worker, so the same `task_key` lands on the same worker across calls
    /// as long as the candidate set is unchanged, and only a fraction of
    /// keys move when a worker joins or leaves.
    fn consistent_hash(&self, task_key: i64, candidates: &[ServerEndpoint]) -> Option<ServerEndpoint> {
        let mut ring: BTreeMap<u64, &ServerEndpoint> = BTreeMap::new();
        for candidate in candidates {
            for vnode in 0..HASH_RING_VIRTUAL_NODES {
                let key = format!("{}#{vnode}", candidate.address());
                ring.insert(fnv1a(key.as_bytes()), candidate);
            }
        }
        let hash = fnv1a(task_key.to_string().as_bytes());
        let chosen = ring
            .range(hash..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, s)| (*s).clone())?;
        self.touch(&chosen);
        Some(chosen)
    }

    fn local_priority(
        &self,
        group: &str,
        candidates: &[ServerEndpoint],
        local_worker: Option<&ServerEndpoint>,
    ) -> Option<ServerEndpoint> {
        if let Some(local) = local_worker {
            if candidates.iter().any(|c| c.address() == local.address()) {
                self.touch(local);
                return Some(local.clone());
            }
        }
        self.round_robin(group, candidates)
    }

    fn touch(&self, server: &ServerEndpoint) {
        self.last_used.insert(server.address(), now_millis());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmesh_registry::Role;

    fn workers(n: usize) -> Vec<ServerEndpoint> {
        (0..n)
            .map(|i| ServerEndpoint::new(Role::Worker, "127.0.0.1", 9000 + i as u16).with_group("g"))
            .collect()
    }

    #[test]
    fn round_robin_cycles_through_all_candidates() {
        let router = Router::new();
        let candidates = workers(3);
        let picks: Vec<_> = (0..6)
            .map(|i| router.resolve(RouteStrategy::RoundRobin, "g", i, &candidates, None).unwrap())
            .collect();
        assert_eq!(picks[0].port, picks[3].port);
        assert_eq!(picks[1].port, picks[4].port);
        assert_eq!(picks[2].port, picks[5].port);
    }

    #[test]
    fn consistent_hash_is_stable_for_same_key() {
        let router = Router::new();
        let candidates = workers(5);
        let first = router.resolve(RouteStrategy::ConsistentHash, "g", 42, &candidates, None).unwrap();
        let second = router.resolve(RouteStrategy::ConsistentHash, "g", 42, &candidates, None).unwrap();
        assert_eq!(first.port, second.port);
    }

    #[test]
    fn least_recently_used_prefers_untouched_worker() {
        let router = Router::new();
        let candidates = workers(2);
        let first = router.resolve(RouteStrategy::LeastRecentlyUsed, "g", 0, &candidates, None).unwrap();
        let second = router.resolve(RouteStrategy::LeastRecentlyUsed, "g", 0, &candidates, None).unwrap();
        assert_ne!(first.port, second.port, "LRU should not pick the just-touched worker again");
    }

    #[test]
    fn local_priority_prefers_colocated_worker_when_discovered() {
        let router = Router::new();
        let candidates = workers(3);
        let local = candidates[1].clone();
        let chosen = router
            .resolve(RouteStrategy::LocalPriority, "g", 0, &candidates, Some(&local))
            .unwrap();
        assert_eq!(chosen.port, local.port);
    }

    #[test]
    fn local_priority_falls_back_when_local_worker_not_discovered() {
        let router = Router::new();
        let candidates = workers(2);
        let local = ServerEndpoint::new(Role::Worker, "10.0.0.1", 1234).with_group("g");
        let chosen = router
            .resolve(RouteStrategy::LocalPriority, "g", 0, &candidates, Some(&local))
            .unwrap();
        assert!(candidates.iter().any(|c| c.port == chosen.port));
    }

    #[test]
    fn empty_candidates_resolve_to_none() {
        let router = Router::new();
        assert!(router.resolve(RouteStrategy::RoundRobin, "g", 0, &[], None).is_none());
    }
}
