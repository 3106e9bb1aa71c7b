//! quotawatch-api: REST API for quotawatch.
//!
//! Provides axum route handlers for the department, node and cluster usage
//! views, the quota admission check, and Prometheus exposition.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/informer/v1/resource/dept` | Department usage view |
//! | GET | `/informer/v1/resource/node` | Node usage view |
//! | GET | `/informer/v1/resource/cluster` | Allocatable capacity per class |
//! | POST | `/informer/v1/resource/dept/checkLimit` | Quota admission check |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |
//!
//! Read endpoints accept `refresh` and `maxAge` query parameters and set
//! the `X-Cache` and `X-Generated-At` response headers.

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use quotawatch_engine::Engine;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Engine,
}

/// Build the complete API router.
pub fn build_router(engine: Engine) -> Router {
    let api_state = ApiState { engine };

    let resource_routes = Router::new()
        .route("/dept", get(handlers::list_departments))
        .route("/dept/checkLimit", post(handlers::check_limit))
        .route("/node", get(handlers::list_nodes))
        .route("/cluster", get(handlers::cluster_capacity))
        .with_state(api_state.clone());

    Router::new()
        .nest("/informer/v1/resource", resource_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
        .route("/healthz", get(handlers::healthz))
}
