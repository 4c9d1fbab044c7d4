//! The supervisor role: the three scanner loops (§4.3) plus the cluster
//! lock they share, wired to `taskmesh-core`'s state machine and
//! `taskmesh-dispatch`'s dispatcher.

pub mod cluster_lock;
pub mod error;
pub mod scanner;

use std::sync::Arc;

use taskmesh_core::{SnowflakeGenerator, StateMachine};
use taskmesh_dispatch::Dispatcher;
use taskmesh_registry::{ServerEndpoint, ServiceRegistry};
use taskmesh_rpc::destination::Destination;
use taskmesh_store::DbPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanner::{RunningInstanceScanner, Scanner, ScannerConfig, TriggeringJobScanner, WaitingInstanceScanner};

/// A running supervisor: three scanner loops driving the shared state
/// machine. Dropping this without calling [`Supervisor::shutdown`] leaves
/// the loops running in the background until the process exits.
pub struct Supervisor {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Build the scanner trio and spawn their heartbeat loops.
    ///
    /// `worker_id` seeds this supervisor's slice of the id space (§ids are
    /// snowflake-style, unique per `(worker_id, millisecond, sequence)`).
    /// `local_worker` is this process's own worker endpoint when it's also
    /// running a worker role in-process, for `LOCAL_PRIORITY` routing; pass
    /// `None` for a supervisor-only deployment.
    pub fn spawn(
        pool: DbPool,
        registry: Arc<dyn ServiceRegistry>,
        destination: Arc<Destination>,
        worker_id: i64,
        local_worker: Option<ServerEndpoint>,
    ) -> Self {
        let state_machine = Arc::new(StateMachine::new(pool.clone(), registry.clone()));
        let dispatcher = Arc::new(Dispatcher::new(pool.clone(), registry.clone(), destination, local_worker));
        let ids = Arc::new(SnowflakeGenerator::new(worker_id));
        let cancel = CancellationToken::new();

        let triggering = TriggeringJobScanner::new(
            pool.clone(),
            state_machine.clone(),
            dispatcher.clone(),
            ids.clone(),
            ScannerConfig::triggering(),
        );
        let waiting = WaitingInstanceScanner::new(
            pool.clone(),
            state_machine.clone(),
            dispatcher.clone(),
            registry.clone(),
            ids.clone(),
            ScannerConfig::waiting(),
        );
        let running = RunningInstanceScanner::new(
            pool.clone(),
            state_machine,
            dispatcher,
            registry,
            ids,
            ScannerConfig::running(),
        );

        let handles = vec![
            spawn_loop(triggering, pool.clone(), cancel.clone()),
            spawn_loop(waiting, pool.clone(), cancel.clone()),
            spawn_loop(running, pool, cancel.clone()),
        ];

        Self { cancel, handles }
    }

    /// Signal every scanner loop to stop and wait for them to drain their
    /// current sweep.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "scanner task panicked during shutdown");
            }
        }
    }
}

fn spawn_loop<S: Scanner + 'static>(scanner: S, pool: DbPool, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        scanner::run_loop(&scanner, &pool, cancel).await;
    })
}
