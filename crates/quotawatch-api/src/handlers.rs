//! REST API handlers.
//!
//! Read handlers go through the engine's response caches and report cache
//! status in headers. The admission handler always answers with
//! `{success, reason}`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quotawatch_engine::{
    AdmissionError, AdmissionRequest, CachedRead, EngineError, ReadOptions, parse_duration,
};
use quotawatch_metrics::{MetricsInput, render_prometheus};
use quotawatch_state::ClusterView;

use crate::ApiState;

pub const HEADER_CACHE: &str = "x-cache";
pub const HEADER_GENERATED_AT: &str = "x-generated-at";

/// Admission outcome, also used for every error body.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckLimitResponse {
    pub success: bool,
    pub reason: String,
}

fn error_response(reason: &str, status: StatusCode) -> Response {
    (
        status,
        Json(CheckLimitResponse {
            success: false,
            reason: reason.to_string(),
        }),
    )
        .into_response()
}

// ── Cached reads ───────────────────────────────────────────────

/// Query parameters accepted by every read endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadQuery {
    pub refresh: Option<String>,
    pub max_age: Option<String>,
}

impl ReadQuery {
    fn options(&self) -> Result<ReadOptions, String> {
        let refresh = match self.refresh.as_deref().map(str::trim) {
            None | Some("") | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => return Err(format!("invalid refresh value {other:?}")),
        };
        let max_age = self
            .max_age
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|e| format!("invalid maxAge: {e}"))?;
        Ok(ReadOptions { refresh, max_age })
    }
}

fn read_options(query: Result<Query<ReadQuery>, QueryRejection>) -> Result<ReadOptions, Response> {
    let Query(query) = query.map_err(|e| error_response(&e.body_text(), StatusCode::BAD_REQUEST))?;
    query
        .options()
        .map_err(|reason| error_response(&reason, StatusCode::BAD_REQUEST))
}

/// Attach cache headers to a body derived from a cached read.
fn cached_response<T, B: Serialize>(read: &CachedRead<T>, body: B) -> Response {
    (
        [
            (HEADER_CACHE, read.status.as_str().to_string()),
            (HEADER_GENERATED_AT, read.snapshot.generated_at_rfc3339()),
        ],
        Json(body),
    )
        .into_response()
}

/// GET /informer/v1/resource/dept
pub async fn list_departments(
    State(state): State<ApiState>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Response {
    let options = match read_options(query) {
        Ok(options) => options,
        Err(resp) => return resp,
    };
    let read = state.engine.departments(&options).await;
    debug!(cache = read.status.as_str(), rows = read.snapshot.payload.len(), "department view");
    cached_response(&read, &read.snapshot.payload)
}

/// GET /informer/v1/resource/node
pub async fn list_nodes(
    State(state): State<ApiState>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Response {
    let options = match read_options(query) {
        Ok(options) => options,
        Err(resp) => return resp,
    };
    let read = state.engine.nodes(&options).await;
    debug!(cache = read.status.as_str(), rows = read.snapshot.payload.len(), "node view");
    cached_response(&read, &read.snapshot.payload)
}

/// GET /informer/v1/resource/cluster
pub async fn cluster_capacity(
    State(state): State<ApiState>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Response {
    let options = match read_options(query) {
        Ok(options) => options,
        Err(resp) => return resp,
    };
    let read = state.engine.nodes(&options).await;
    let cluster = ClusterView::from_nodes(&read.snapshot.payload);
    cached_response(&read, cluster)
}

// ── Admission ──────────────────────────────────────────────────

/// Admission request body.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CheckLimitRequest {
    #[serde(default)]
    pub dept: String,
    #[serde(default, rename = "requestNonXcMemory")]
    pub request_non_xc_memory: String,
    #[serde(default, rename = "requestKylinArmMemory")]
    pub request_kylin_arm_memory: String,
    #[serde(default, rename = "requestKylinHgMemory")]
    pub request_kylin_hg_memory: String,
}

/// POST /informer/v1/resource/dept/checkLimit
pub async fn check_limit(
    State(state): State<ApiState>,
    payload: Result<Json<CheckLimitRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(e) => return error_response(&e.body_text(), StatusCode::BAD_REQUEST),
    };

    let request = match AdmissionRequest::parse(
        &req.dept,
        &req.request_non_xc_memory,
        &req.request_kylin_arm_memory,
        &req.request_kylin_hg_memory,
    ) {
        Ok(request) => request,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };

    match state.engine.check_admission(&request).await {
        Ok(()) => Json(CheckLimitResponse {
            success: true,
            reason: String::new(),
        })
        .into_response(),
        Err(EngineError::Admission(e @ AdmissionError::QuotaNotFound(_))) => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND)
        }
        Err(EngineError::Admission(e)) => {
            debug!(department = %request.department, reason = %e, "reservation denied");
            error_response(&e.to_string(), StatusCode::BAD_REQUEST)
        }
        Err(EngineError::Feed(e)) => {
            warn!(department = %request.department, error = %e, "quota lookup failed");
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let departments = state.engine.departments(&ReadOptions::default()).await;
    let usage = state.engine.department_usage().await;
    let nodes = state.engine.nodes(&ReadOptions::default()).await;

    let body = render_prometheus(&MetricsInput {
        departments: &departments.snapshot.payload,
        usage: &usage,
        nodes: &nodes.snapshot.payload,
    });
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}
