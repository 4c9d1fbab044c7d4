//! The supervisor's HTTP surface: job/instance administration under
//! `/api/v1/*` plus the `/supervisor/rpc/*` callbacks workers use to report
//! task lifecycle events (§4.6).

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use taskmesh_core::{SnowflakeGenerator, StateMachine};
use taskmesh_dispatch::Dispatcher;
use taskmesh_registry::ServiceRegistry;
use taskmesh_store::DbPool;

use crate::auth;
use crate::handlers::{instances, jobs, supervisor_rpc};

#[derive(Clone)]
pub struct SupervisorState {
    pub pool: DbPool,
    pub state_machine: Arc<StateMachine>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub ids: Arc<SnowflakeGenerator>,
    /// Shared secret every worker in the cluster signs its calls with.
    ///
    /// The real system scopes a token per `group` (a worker only needs to
    /// authenticate as a member of its own group); this deployment uses one
    /// cluster-wide token, which is enough to repel an unauthenticated
    /// caller but not to isolate a compromised group from another.
    pub worker_token: String,
}

pub fn router(state: SupervisorState) -> Router {
    let rpc = Router::new()
        .route("/startTask", post(supervisor_rpc::start_task))
        .route("/terminateTask", post(supervisor_rpc::terminate_task))
        .route("/updateTaskWorker", post(supervisor_rpc::update_task_worker))
        .route("/checkpoint", post(supervisor_rpc::checkpoint))
        .route("/pauseInstance", post(supervisor_rpc::pause_instance))
        .route("/cancelInstance", post(supervisor_rpc::cancel_instance))
        .route("/subscribeEvent", post(supervisor_rpc::subscribe_event))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_worker_signature));

    let api = Router::new()
        .route("/jobs", get(jobs::list).post(jobs::create))
        .route("/jobs/:job_id", get(jobs::get).delete(jobs::delete))
        .route("/jobs/:job_id/enable", post(jobs::set_enabled))
        .route("/instances/:instance_id/pause", post(instances::pause))
        .route("/instances/:instance_id/cancel", post(instances::cancel))
        .route("/instances/:instance_id/resume", post(instances::resume));

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .nest("/api/v1", api)
        .nest("/supervisor/rpc", rpc)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
