//! `taskmesh-api` — the HTTP surface of both node roles.
//!
//! A supervisor process serves [`supervisor::router`]: job/instance
//! administration plus the `/supervisor/rpc/*` callbacks workers use to
//! report task lifecycle events. A worker process serves [`worker::router`]:
//! `/worker/rpc/*`, the admission and inspection surface a supervisor calls
//! on it.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod supervisor;
pub mod worker;

pub use supervisor::{router as supervisor_router, SupervisorState};
pub use worker::{router as worker_router, WorkerState};

/// Bind and serve `router` until the process is killed.
pub async fn serve(bind: &str, router: axum::Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await
}
