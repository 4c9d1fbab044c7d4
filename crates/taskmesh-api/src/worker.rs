//! A worker's HTTP surface: `/worker/rpc/*`, the admission/inspection
//! endpoints a supervisor calls on a worker it has routed tasks to (§4.6).

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use taskmesh_dispatch::{JobRegistry, TimingWheel, WorkerPool};
use taskmesh_registry::ServerEndpoint;

use crate::handlers::worker_rpc;

#[derive(Clone)]
pub struct WorkerState {
    pub this_worker: ServerEndpoint,
    pub wheel: Arc<TimingWheel>,
    pub pool: Arc<WorkerPool>,
    pub job_registry: Arc<JobRegistry>,
}

pub fn router(state: WorkerState) -> Router {
    let rpc = Router::new()
        .route("/receive", post(worker_rpc::receive))
        .route("/verify", post(worker_rpc::verify))
        .route("/split", post(worker_rpc::split))
        .route("/metrics", get(worker_rpc::metrics))
        .route("/configure", post(worker_rpc::configure));

    Router::new()
        .nest("/worker/rpc", rpc)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
