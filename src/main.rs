// =============================================================================
// Aurora Recommendation Engine — Main Entry Point
// =============================================================================
//
// Wires the clock, gateway, cooldown gate, strategy controller, tracker, and
// broadcaster together, then serves the HTTP/WS API until Ctrl-C. Shutdown
// cancels scopes in dependency order: strategy trigger -> recommendation
// ingest -> evaluation loop (max 10s grace) -> broadcaster (2s drain) ->
// gateway (abort in-flight).
// =============================================================================

mod api;
mod app_state;
mod binance;
mod broadcaster;
mod clock;
mod config;
mod cooldown;
mod error;
mod futures_intel;
mod indicators;
mod market_data;
mod recommendation;
mod strategy_controller;
mod strategy_engine;
mod tracker;
mod trailing;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::BinanceClient;
use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::market_data::candle_buffer::run_kline_stream;
use crate::recommendation::RecommendationStore;
use crate::types::TradingMode;

const RUNTIME_CONFIG_PATH: &str = "runtime_config.json";
const RECOMMENDATION_STORE_PATH: &str = "recommendations.json";
const STRATEGY_TICK: Duration = Duration::from_secs(5);
const EVALUATION_TICK: Duration = Duration::from_secs(5);
const STREAM_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("aurora-reco starting up");

    // ── 1. Configuration ─────────────────────────────────────────────────
    let mut config = RuntimeConfig::load(RUNTIME_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "no runtime config found, starting from defaults");
        RuntimeConfig::default()
    });

    // Safety: always start paused regardless of what was persisted.
    config.trading_mode = TradingMode::Paused;

    if let Ok(symbols_env) = std::env::var("AURORA_SYMBOLS") {
        config.symbols = symbols_env.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect();
    }

    info!(symbols = ?config.symbols, trading_mode = %config.trading_mode, "configuration loaded");

    let clock = Clock::new();
    let root_scope = clock.scope();

    let binance_client = Arc::new(BinanceClient::new());
    let store = Arc::new(RecommendationStore::load(RECOMMENDATION_STORE_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load recommendation store, starting empty");
        RecommendationStore::new()
    }));
    let state = Arc::new(AppState::with_store(config, binance_client, store));

    // ── 2. Market data streams ───────────────────────────────────────────
    let symbols = state.config.read().await.symbols.clone();
    for symbol in &symbols {
        for interval in ["1m", "5m"] {
            let buffer = state.candle_buffer.clone();
            let symbol = symbol.clone();
            let interval = interval.to_string();
            let scope = root_scope.child();
            tokio::spawn(async move {
                loop {
                    if scope.is_cancelled() {
                        break;
                    }
                    if let Err(e) = run_kline_stream(&symbol, &interval, &buffer).await {
                        error!(symbol, interval, error = %e, "kline stream disconnected, reconnecting");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(STREAM_RECONNECT_DELAY) => {}
                        _ = scope.cancelled() => break,
                    }
                }
            });
        }
    }

    // ── 3. HTTP/WS API server ────────────────────────────────────────────
    let bind_addr = std::env::var("AURORA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind_addr, "API server listening");
    let server_scope = root_scope.child();
    let server_handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_scope.cancelled().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "API server exited with error");
        }
    });

    // ── 4. Strategy trigger controller (C4) ──────────────────────────────
    // Manual invocations are ingested inline by `api::rest::strategy_trigger`;
    // the scheduled loop below ingests its own candidates as it runs.
    let strategy_scope = root_scope.child();
    {
        let controller = state.controller.clone();
        let symbols = symbols.clone();
        let tracker = state.tracker.clone();
        let config = state.config.clone();
        let scope = strategy_scope.clone();
        tokio::spawn(async move {
            controller.run_scheduled(clock, scope, symbols, tracker, config, STRATEGY_TICK).await;
        });
    }

    // ── 5. Evaluation loop (C5) ───────────────────────────────────────────
    let evaluation_scope = root_scope.child();
    {
        let tracker = state.tracker.clone();
        let config = state.config.clone();
        let scope = evaluation_scope.clone();
        let clock = Clock::new();
        tokio::spawn(async move {
            tracker.run_evaluation_loop(clock, scope, EVALUATION_TICK, config).await;
        });
    }

    info!("all subsystems started");

    // ── 6. Shutdown sequencing ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining subsystems");

    strategy_scope.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;

    evaluation_scope.cancel();
    tokio::time::timeout(Duration::from_secs(10), async {
        while state.controller.is_running() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }).await.ok();

    tokio::time::sleep(Duration::from_secs(2)).await;

    root_scope.cancel();
    server_handle.abort();

    {
        let cfg = state.config.read().await;
        if let Err(e) = cfg.save(RUNTIME_CONFIG_PATH) {
            warn!(error = %e, "failed to persist configuration on shutdown");
        }
    }

    if let Err(e) = state.store.save(RECOMMENDATION_STORE_PATH) {
        warn!(error = %e, "failed to persist recommendation store on shutdown");
    }

    info!("shutdown complete");
    Ok(())
}
