//! Pulse HTTP surface (spec.md §6.2): read-only introspection over
//! `PipelineRun`/`PipelineEvent`/`ProviderCall`/`DeadLetterQueue` rows held
//! in [`crate::store::PulseStore`].
//!
//! - `GET /pulse/stats`
//! - `GET /pulse/pipeline-runs`
//! - `GET /pulse/pipeline-runs/:run_id`
//! - `GET /pulse/provider-calls`
//! - `GET /pulse/dlq`
//! - `GET /pulse/latency-series`
//!
//! Gated behind `require_pulse_token` when `AppState::pulse_token_hash` is
//! set; open in dev mode otherwise.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use tf_protocol::http::{
    DlqQuery, DlqResponse, LatencySeriesBucket, LatencySeriesQuery, LatencySeriesResponse,
    PipelineRunDetailResponse, PipelineRunsQuery, PipelineRunsResponse, ProviderCallsQuery,
    ProviderCallsResponse, StatsQuery, StatsResponse,
};

use crate::state::AppState;

pub async fn require_pulse_token(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let Some(expected_hash) = &state.pulse_token_hash else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": "invalid or missing pulse token" })))
            .into_response();
    }

    next.run(req).await
}

async fn stats(State(state): State<AppState>, Query(q): Query<StatsQuery>) -> impl IntoResponse {
    let (success_rate, p50_latency_ms, p95_latency_ms, total_tokens, total_cost_cents, dlq_count) =
        state.pulse.stats(q.hours, q.org_id);
    Json(StatsResponse { success_rate, p50_latency_ms, p95_latency_ms, total_tokens, total_cost_cents, dlq_count })
}

async fn pipeline_runs(State(state): State<AppState>, Query(q): Query<PipelineRunsQuery>) -> impl IntoResponse {
    let limit = q.limit.min(200) as usize;
    let (runs, total) = state.pulse.list_runs(
        q.hours,
        q.service.as_deref(),
        q.success,
        q.org_id,
        q.session_id,
        limit,
        q.offset as usize,
    );
    Json(PipelineRunsResponse { runs, total })
}

async fn pipeline_run_detail(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    match state.pulse.get_run(run_id) {
        Some(run) => {
            let events = state.pulse.events_for_run(run_id);
            Json(PipelineRunDetailResponse { run, events }).into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "run not found" }))).into_response(),
    }
}

async fn provider_calls(State(state): State<AppState>, Query(q): Query<ProviderCallsQuery>) -> impl IntoResponse {
    let limit = q.limit.min(200) as usize;
    let (calls, total) =
        state.pulse.list_provider_calls(q.hours, q.provider.as_deref(), q.session_id, limit, q.offset as usize);
    Json(ProviderCallsResponse { calls, total })
}

async fn dlq(State(state): State<AppState>, Query(q): Query<DlqQuery>) -> impl IntoResponse {
    let limit = q.limit.min(200) as usize;
    let (items, total) = state.pulse.list_dlq(q.status, limit, q.offset as usize);
    Json(DlqResponse { items, total })
}

async fn latency_series(State(state): State<AppState>, Query(q): Query<LatencySeriesQuery>) -> impl IntoResponse {
    let buckets = state
        .pulse
        .latency_series(q.hours, q.service.as_deref())
        .into_iter()
        .map(|(hour, p50_ms, p95_ms, count)| LatencySeriesBucket { hour, p50_ms, p95_ms, count })
        .collect();
    Json(LatencySeriesResponse { buckets })
}

/// Build the `/pulse/*` router, gated behind [`require_pulse_token`].
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/pulse/stats", get(stats))
        .route("/pulse/pipeline-runs", get(pipeline_runs))
        .route("/pulse/pipeline-runs/:run_id", get(pipeline_run_detail))
        .route("/pulse/provider-calls", get(provider_calls))
        .route("/pulse/dlq", get(dlq))
        .route("/pulse/latency-series", get(latency_series))
        .route_layer(middleware::from_fn_with_state(state, require_pulse_token))
}
