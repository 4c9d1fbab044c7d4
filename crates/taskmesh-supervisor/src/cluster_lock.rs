//! Cluster-wide lock for a scanner's sweep (§4.3, §5).
//!
//! Each scanner holds one of these for the duration of a sweep so that two
//! supervisor replicas never process the same batch twice. Backed by a
//! Postgres session-level advisory lock — cheap, self-releasing if the
//! holding connection dies, and needs no extra schema or TTL bookkeeping
//! the way a Redis/Consul-backed lock would.

use sqlx::PgPool;

use crate::error::SupervisorError;

/// One advisory lock key per scanner, chosen arbitrarily but distinctly so
/// the three scanners never contend with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKey {
    Triggering,
    Waiting,
    Running,
}

impl LockKey {
    fn as_i64(self) -> i64 {
        match self {
            Self::Triggering => 0x7a5b_0001,
            Self::Waiting => 0x7a5b_0002,
            Self::Running => 0x7a5b_0003,
        }
    }
}

/// Holds a dedicated pooled connection for the lifetime of the lock — a
/// session-level advisory lock is tied to the connection that took it, so
/// releasing it correctly requires releasing on that same connection.
pub struct ClusterLock {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    key: LockKey,
}

impl ClusterLock {
    /// Try to acquire `key` without blocking. Returns `None` if another
    /// replica currently holds it — the caller should skip this sweep.
    pub async fn try_acquire(pool: &PgPool, key: LockKey) -> Result<Option<Self>, SupervisorError> {
        let mut conn = pool.acquire().await?;
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(key.as_i64())
            .fetch_one(&mut *conn)
            .await?;
        if !acquired {
            return Ok(None);
        }
        Ok(Some(Self { conn, key }))
    }

    pub async fn release(mut self) -> Result<(), SupervisorError> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key.as_i64())
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_pairwise_distinct() {
        let keys = [LockKey::Triggering, LockKey::Waiting, LockKey::Running];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a.as_i64(), b.as_i64());
            }
        }
    }
}
