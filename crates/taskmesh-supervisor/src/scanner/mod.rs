//! The three scanner loops (§4.3): shared heartbeat-thread shape, each
//! implementation living in its own module.

mod running;
mod triggering;
mod waiting;

pub use running::RunningInstanceScanner;
pub use triggering::TriggeringJobScanner;
pub use waiting::WaitingInstanceScanner;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cluster_lock::{ClusterLock, LockKey};
use crate::error::SupervisorError;

/// Tuning knobs shared by every scanner, with the spec's defaults.
#[derive(Debug, Clone, Copy)]
pub struct ScannerConfig {
    pub period: Duration,
    /// WAITING/RUNNING: how stale an instance must be to be picked up.
    /// TRIGGERING: the lookahead window added to `now`.
    pub threshold: Duration,
    pub batch_size: i64,
}

impl ScannerConfig {
    pub fn triggering() -> Self {
        Self { period: Duration::from_secs(3), threshold: Duration::from_secs(3), batch_size: 100 }
    }

    pub fn waiting() -> Self {
        Self { period: Duration::from_secs(15), threshold: Duration::from_secs(15 * 8), batch_size: 100 }
    }

    pub fn running() -> Self {
        Self { period: Duration::from_secs(30), threshold: Duration::from_secs(30 * 8), batch_size: 100 }
    }
}

/// One sweep of a scanner: process up to `batch_size` candidates and report
/// whether the batch was idle (fewer than `batch_size` candidates existed,
/// so the scanner can wait a full period) or busy (the batch was full, so
/// there's likely more backlog and the scanner should sweep again sooner).
#[async_trait]
pub trait Scanner: Send + Sync {
    fn name(&self) -> &'static str;
    fn lock_key(&self) -> LockKey;
    fn config(&self) -> ScannerConfig;
    async fn sweep(&self) -> Result<bool, SupervisorError>;
}

/// Run `scanner`'s heartbeat loop until `cancel` fires.
///
/// Each iteration: try the cluster lock (skip this tick if another replica
/// holds it), sweep, release, then sleep a full period if the sweep was
/// idle or only until the next period boundary if it was busy — see §4.3's
/// "return true if batch < N (idle), else false" contract.
pub async fn run_loop(scanner: &(dyn Scanner), pool: &sqlx::PgPool, cancel: CancellationToken) {
    let config = scanner.config();
    while !cancel.is_cancelled() {
        match ClusterLock::try_acquire(pool, scanner.lock_key()).await {
            Ok(Some(lock)) => {
                let result = scanner.sweep().await;
                if let Err(err) = lock.release().await {
                    warn!(scanner = scanner.name(), error = %err, "failed to release cluster lock");
                }
                match result {
                    Ok(idle) => {
                        debug!(scanner = scanner.name(), idle, "sweep complete");
                        sleep_after_sweep(idle, config.period, &cancel).await;
                        continue;
                    }
                    Err(err) => {
                        error!(scanner = scanner.name(), error = %err, "sweep failed");
                    }
                }
            }
            Ok(None) => {
                debug!(scanner = scanner.name(), "cluster lock held elsewhere, skipping this tick");
            }
            Err(err) => {
                error!(scanner = scanner.name(), error = %err, "failed to acquire cluster lock");
            }
        }
        wait(config.period, &cancel).await;
    }
}

async fn sleep_after_sweep(idle: bool, period: Duration, cancel: &CancellationToken) {
    let delay = if idle { period } else { busy_delay(period) };
    wait(delay, cancel).await;
}

/// `period - (now mod period)` — how long until the next period boundary,
/// so a busy scanner catches up without drifting off the period grid.
fn busy_delay(period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1) as i64;
    let now_ms = Utc::now().timestamp_millis();
    let remainder = now_ms.rem_euclid(period_ms);
    Duration::from_millis((period_ms - remainder) as u64)
}

async fn wait(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_delay_never_exceeds_the_period() {
        let period = Duration::from_secs(30);
        assert!(busy_delay(period) <= period);
    }

    #[test]
    fn waiting_and_running_thresholds_are_looser_than_triggering() {
        let triggering = ScannerConfig::triggering();
        let waiting = ScannerConfig::waiting();
        let running = ScannerConfig::running();
        assert!(waiting.threshold > triggering.threshold);
        assert!(running.threshold > waiting.threshold);
    }
}
