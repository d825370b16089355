// =============================================================================
// Candle Board — Main Entry Point
// =============================================================================
//
// Polls a trading-simulation REST API, aggregates the index price into
// fixed-interval candles and serves an auto-refreshing chart with the latest
// two headlines and the time remaining.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod cycle;
mod error;
mod ingest_counters;
mod market_data;
mod news;
mod render;
mod rit;
mod runtime_config;
mod session_state;
mod snapshot;
mod status_monitor;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::rest::AppContext;
use crate::cycle::PollSchedule;
use crate::rit::RitClient;
use crate::runtime_config::RuntimeConfig;
use crate::session_state::SessionState;

const DEFAULT_CONFIG_PATH: &str = "candle_board.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Candle Board starting up");

    let config_path = std::env::var("CANDLE_BOARD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = match RuntimeConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Failed to load config, using defaults");
            let defaults = RuntimeConfig::default();
            if !config_path.exists() {
                if let Err(e) = defaults.save(&config_path) {
                    warn!(error = %e, "Could not write default config");
                }
            }
            defaults
        }
    };

    // Env overrides are never persisted.
    config.apply_env_overrides();
    config.validate();

    info!(
        api = %config.api_base_url,
        ticker = ?config.ticker,
        time_basis = %config.time_basis,
        candle_interval = config.candle_interval,
        late_tick_policy = ?config.late_tick_policy,
        background_poll_ms = ?config.background_poll_ms,
        "Board configured"
    );

    // ── 2. Shared state & upstream client ────────────────────────────────
    let state = Arc::new(SessionState::new(&config));
    let source = Arc::new(RitClient::new(&config).context("failed to build API client")?);
    let schedule = Arc::new(PollSchedule::from_config(&config));

    // ── 3. Optional background ingestion ─────────────────────────────────
    if let Some(every_ms) = config.background_poll_ms {
        let bg_state = state.clone();
        let bg_source = source.clone();
        let bg_schedule = schedule.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(every_ms.max(50)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let report =
                    cycle::poll_once(&bg_state, bg_source.as_ref(), &bg_schedule).await;
                if !report.fetch_errors.is_empty() {
                    warn!(errors = ?report.fetch_errors, "Background poll had upstream errors");
                }
            }
        });
        info!(every_ms, "Background polling enabled");
    }

    // ── 4. Start the HTTP server ─────────────────────────────────────────
    let ctx = Arc::new(AppContext::new(state.clone(), source, schedule, &config));
    let app = api::rest::router(ctx);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Board listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server failed");
        }
    });

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    let counters = state.counters.snapshot();
    info!(
        ticks = counters.ticks_accepted,
        candles = state.history_snapshot().len(),
        cycles = counters.cycles,
        "Candle Board shut down"
    );
    Ok(())
}
