//! `taskmesh` CLI entry-point.
//!
//! Available sub-commands:
//! - `supervisor` — start a supervisor node (scanners + admin/RPC API).
//! - `worker`     — start a worker node (timing wheel + executor pool + RPC API).
//! - `migrate`    — run pending database migrations.
//! - `validate`   — validate a workflow DAG JSON file.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use taskmesh_core::WorkflowEdge;
use taskmesh_dispatch::{Dispatcher, JobRegistry, TimingWheel, TimingWheelConfig, WorkerPool, WorkerPoolConfig};
use taskmesh_registry::{ConsulRegistry, MemoryRegistry, RedisRegistry, Role, ServerEndpoint, ServiceRegistry};
use taskmesh_rpc::destination::{CallerIdentity, Destination};
use taskmesh_rpc::transport::{RetryPolicy, Transport};
use taskmesh_supervisor::Supervisor;

use config::{RegistryConfig, SchedulerConfig};

#[derive(Parser)]
#[command(name = "taskmesh", about = "Distributed job scheduler", version)]
struct Cli {
    /// Path to a `taskmesh.toml` config file (overlaid by `TASKMESH_*` env vars).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a supervisor node: the three scanner loops plus the admin and
    /// worker-callback HTTP API.
    Supervisor,
    /// Start a worker node: the timing wheel, executor pool, and the
    /// supervisor-facing RPC API.
    Worker,
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Validate a workflow DAG definition (a JSON array of edges) and print
    /// its topological execution order.
    Validate {
        /// Path to the workflow edges JSON file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Supervisor => run_supervisor(cfg).await,
        Command::Worker => run_worker(cfg).await,
        Command::Migrate { database_url } => {
            let database_url = database_url.unwrap_or(cfg.database_url);
            let pool = taskmesh_store::pool::create_pool(&database_url, 2).await.context("failed to connect to database")?;
            taskmesh_store::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("migrations applied successfully");
            Ok(())
        }
        Command::Validate { path } => {
            let content = std::fs::read_to_string(&path).with_context(|| format!("cannot read file {}", path.display()))?;
            let edges: Vec<WorkflowEdge> = serde_json::from_str(&content).context("invalid JSON")?;
            match taskmesh_core::dag::validate_workflow_dag(&edges) {
                Ok(order) => {
                    println!("workflow is valid, execution order: {order:?}");
                    Ok(())
                }
                Err(err) => {
                    eprintln!("validation failed: {err}");
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn build_registry(cfg: &SchedulerConfig) -> anyhow::Result<Arc<dyn ServiceRegistry>> {
    let ttl = Duration::from_secs(cfg.session_ttl_secs);
    let registry: Arc<dyn ServiceRegistry> = match &cfg.registry {
        RegistryConfig::Memory => Arc::new(MemoryRegistry::new(ttl)),
        RegistryConfig::Redis { url } => Arc::new(RedisRegistry::connect(url, ttl).await.context("failed to connect to redis")?),
        RegistryConfig::Consul { url } => Arc::new(ConsulRegistry::new(url.clone(), ttl)),
    };
    Ok(registry)
}

async fn run_supervisor(cfg: SchedulerConfig) -> anyhow::Result<()> {
    let pool = taskmesh_store::pool::create_pool(&cfg.database_url, cfg.db_pool_size).await.context("failed to connect to database")?;
    taskmesh_store::pool::run_migrations(&pool).await.context("migration failed")?;

    let registry = build_registry(&cfg).await?;
    let this_server = ServerEndpoint::new(Role::Supervisor, cfg.advertise_host.clone(), cfg.advertise_port);
    registry.register(&this_server).await.context("failed to register with service registry")?;

    let transport = Transport::new(RetryPolicy::default());
    let destination = Arc::new(Destination::new(transport, None));

    let supervisor = Supervisor::spawn(pool.clone(), registry.clone(), destination.clone(), cfg.worker_id, None);

    let state = taskmesh_api::SupervisorState {
        state_machine: Arc::new(taskmesh_core::StateMachine::new(pool.clone(), registry.clone())),
        dispatcher: Arc::new(Dispatcher::new(pool.clone(), registry.clone(), destination, None)),
        pool,
        registry: registry.clone(),
        ids: Arc::new(taskmesh_core::SnowflakeGenerator::new(cfg.worker_id)),
        worker_token: cfg.worker_token.clone(),
    };

    let router = taskmesh_api::supervisor_router(state);
    let bind = cfg.bind.clone();
    let serve = tokio::spawn(async move { taskmesh_api::serve(&bind, router).await });

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down supervisor");
    supervisor.shutdown().await;
    registry.deregister(&this_server).await.ok();
    serve.abort();
    Ok(())
}

async fn run_worker(cfg: SchedulerConfig) -> anyhow::Result<()> {
    let this_worker = ServerEndpoint::new(Role::Worker, cfg.advertise_host.clone(), cfg.advertise_port)
        .with_group(cfg.group.clone());
    let supervisor = ServerEndpoint::new(Role::Supervisor, cfg.supervisor_host.clone(), cfg.supervisor_port);

    let registry = build_registry(&cfg).await?;
    registry.register(&this_worker).await.context("failed to register with service registry")?;

    let transport = Transport::new(RetryPolicy::default());
    let caller = CallerIdentity { role: Role::Worker, group: cfg.group.clone(), worker_token: cfg.worker_token.clone() };
    let destination = Arc::new(Destination::new(transport, Some(caller)));

    // A freshly started worker knows no jobs until they're registered —
    // there is no wire method for that yet, so an embedder wires up
    // `JobRegistry::register` calls (with a `ShellExecutor` or its own
    // `JobExecutor`) before handing this registry to `WorkerState`.
    let job_registry = Arc::new(JobRegistry::new());

    let wheel = Arc::new(TimingWheel::new(
        TimingWheelConfig { tick_ms: cfg.timing_wheel_tick_ms, ring_size: cfg.timing_wheel_ring_size, ..Default::default() },
        this_worker.clone(),
    ));
    let pool = Arc::new(WorkerPool::new(
        WorkerPoolConfig { max_concurrency: cfg.executor_pool_size, worker: this_worker.clone(), supervisor },
        job_registry.clone(),
        destination,
    ));

    let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let poller = {
        let pool = pool.clone();
        let wheel = wheel.clone();
        let stopped = stopped.clone();
        tokio::spawn(async move { pool.run_poller(wheel, stopped).await })
    };

    let state = taskmesh_api::WorkerState { this_worker: this_worker.clone(), wheel, pool, job_registry };
    let router = taskmesh_api::worker_router(state);
    let bind = cfg.bind.clone();
    let serve = tokio::spawn(async move { taskmesh_api::serve(&bind, router).await });

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down worker");
    stopped.store(true, std::sync::atomic::Ordering::Relaxed);
    poller.abort();
    registry.deregister(&this_worker).await.ok();
    serve.abort();
    Ok(())
}
