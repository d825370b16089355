// =============================================================================
// HTTP Endpoints — Axum 0.7
// =============================================================================
//
// `/` serves the board page, `/chart.svg` runs one poll cycle and returns the
// rendered chart. JSON views of the same state live under `/api/v1/`.
//
// With background polling enabled the chart route only assembles and renders;
// ingestion happens on the background cadence instead.
//
// CORS is configured permissively; the board is read-only.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::cycle::{poll_and_render, render_current, PollSchedule};
use crate::ingest_counters::CounterSnapshot;
use crate::render::page::index_html;
use crate::render::ChartRenderer;
use crate::rit::TickSource;
use crate::runtime_config::RuntimeConfig;
use crate::session_state::SessionState;
use crate::types::SimPhase;

/// Everything a request handler needs.
pub struct AppContext<S> {
    pub state: Arc<SessionState>,
    pub source: Arc<S>,
    pub schedule: Arc<PollSchedule>,
    pub renderer: ChartRenderer,
    pub refresh_ms: u64,
    /// Ingestion runs on its own task; handlers must not poll.
    pub background: bool,
}

impl<S: TickSource> AppContext<S> {
    pub fn new(
        state: Arc<SessionState>,
        source: Arc<S>,
        schedule: Arc<PollSchedule>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            state,
            source,
            schedule,
            renderer: ChartRenderer::new(config.chart.clone()),
            refresh_ms: config.refresh_ms,
            background: config.background_poll_ms.is_some(),
        }
    }
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the router with CORS middleware and shared context.
pub fn router<S: TickSource + 'static>(ctx: Arc<AppContext<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Board ───────────────────────────────────────────────────
        .route("/", get(index::<S>))
        .route("/chart.svg", get(chart_svg::<S>))
        // ── JSON ────────────────────────────────────────────────────
        .route("/api/v1/health", get(health::<S>))
        .route("/api/v1/snapshot", get(snapshot::<S>))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(ctx)
}

// =============================================================================
// Board
// =============================================================================

async fn index<S: TickSource>(State(ctx): State<Arc<AppContext<S>>>) -> Html<String> {
    let title = match ctx.state.ticker() {
        Some(t) => format!("{t} Candles"),
        None => "Candle Board".to_string(),
    };
    Html(index_html(&title, ctx.refresh_ms))
}

async fn chart_svg<S: TickSource>(State(ctx): State<Arc<AppContext<S>>>) -> Response {
    let rendered = if ctx.background {
        render_current(&ctx.state, &ctx.renderer)
    } else {
        poll_and_render(&ctx.state, ctx.source.as_ref(), &ctx.schedule, &ctx.renderer).await
    };

    match rendered {
        Ok((_, chart)) => (
            [
                (header::CONTENT_TYPE, chart.content_type),
                (header::CACHE_CONTROL, "no-store"),
            ],
            chart.bytes,
        )
            .into_response(),
        Err(e) => {
            error!(error = %format!("{e:#}"), "chart render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "chart render failed").into_response()
        }
    }
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
    phase: SimPhase,
    finished: bool,
    counters: CounterSnapshot,
}

async fn health<S: TickSource>(State(ctx): State<Arc<AppContext<S>>>) -> impl IntoResponse {
    let status = ctx.state.derive_status();
    Json(HealthResponse {
        status: "ok",
        state_version: ctx.state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
        phase: status.phase,
        finished: status.finished,
        counters: ctx.state.counters.snapshot(),
    })
}

// =============================================================================
// Snapshot
// =============================================================================

async fn snapshot<S: TickSource>(State(ctx): State<Arc<AppContext<S>>>) -> impl IntoResponse {
    Json(ctx.state.assemble())
}
