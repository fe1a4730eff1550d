// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Every endpoint is public — dashboard auth was dropped (see DESIGN.md for
// the rationale). All responses share the envelope `{success, data?, error?,
// timestamp}` so every handler returns a uniform JSON shape.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::broadcaster::Topic;
use crate::market_data::gateway::PermissionDenied;
use crate::recommendation::CandidateSignal;

// =============================================================================
// Response envelope
// =============================================================================

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    warnings: Vec<String>,
    timestamp: i64,
}

fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    Json(Envelope { success: true, data: Some(data), error: None, warnings: Vec::new(), timestamp: chrono::Utc::now().timestamp_millis() })
}

fn ok_with_warnings<T: Serialize>(data: T, warnings: Vec<String>) -> impl IntoResponse {
    Json(Envelope { success: true, data: Some(data), error: None, warnings, timestamp: chrono::Utc::now().timestamp_millis() })
}

fn fail(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Envelope<()>>) {
    (status, Json(Envelope { success: false, data: None, error: Some(message.into()), warnings: Vec::new(), timestamp: chrono::Utc::now().timestamp_millis() }))
}

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/strategy/status", get(strategy_status))
        .route("/api/strategy/analysis", get(strategy_analysis))
        .route("/api/strategy/analysis/trigger", post(strategy_trigger))
        .route("/api/strategy/progress", get(strategy_progress))
        .route("/api/market/ticker", get(market_ticker))
        .route("/api/market/kline", get(market_kline))
        .route("/api/market/funding-rate", get(market_funding_rate))
        .route("/api/sentiment/fgi", get(sentiment_fgi))
        .route("/api/config", get(get_config))
        .route("/api/config", post(post_config))
        .route("/api/testing/price-override", post(set_price_override))
        .route("/api/testing/price-override/clear", post(clear_price_override))
        .route("/api/testing/fgi-override", post(set_fgi_override))
        .route("/api/testing/fgi-override/clear", post(clear_fgi_override))
        .route("/api/testing/funding-override", post(set_funding_override))
        .route("/api/testing/funding-override/clear", post(clear_funding_override))
        .route("/api/recommendations", post(create_recommendation))
        .route("/api/recommendations/active", get(list_active))
        .route("/api/recommendations/history", get(list_history))
        .route("/api/recommendations/:id/close", post(close_recommendation))
        .route("/api/recommendations/stats", get(recommendation_stats))
        .route("/api/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_seconds: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ok(HealthResponse { status: "ok", state_version: state.current_state_version(), uptime_seconds: state.uptime_seconds() })
}

// =============================================================================
// Strategy
// =============================================================================

#[derive(Serialize)]
struct StrategyStatusResponse {
    running: bool,
    symbols: Vec<String>,
    signal_threshold: f64,
}

async fn strategy_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cfg = state.config.read().await;
    ok(StrategyStatusResponse {
        running: state.controller.is_running(),
        symbols: cfg.symbols.clone(),
        signal_threshold: cfg.strategy.signal_threshold,
    })
}

async fn strategy_analysis(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cfg = state.config.read().await;
    let symbol = cfg.symbols.first().cloned().unwrap_or_else(|| "BTCUSDT".to_string());
    let threshold = cfg.strategy.signal_threshold;
    drop(cfg);

    let signal = state.strategy_engine.evaluate_symbol(&symbol, threshold).await;
    ok(serde_json::json!({ "symbol": symbol, "signal": signal }))
}

#[derive(Deserialize)]
struct TriggerRequest {
    #[serde(default)]
    symbols: Option<Vec<String>>,
}

fn too_many_requests(reason: String, retry_after: std::time::Duration) -> axum::response::Response {
    let mut headers = HeaderMap::new();
    if let Ok(val) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
        headers.insert("Retry-After", val);
    }
    (StatusCode::TOO_MANY_REQUESTS, headers, Json(Envelope::<()> { success: false, data: None, error: Some(reason), warnings: Vec::new(), timestamp: chrono::Utc::now().timestamp_millis() })).into_response()
}

async fn strategy_trigger(State(state): State<Arc<AppState>>, body: Option<Json<TriggerRequest>>) -> impl IntoResponse {
    let cfg = state.config.read().await.clone();
    let symbols = body.and_then(|Json(r)| r.symbols).unwrap_or_else(|| cfg.symbols.clone());
    let threshold = cfg.strategy.signal_threshold;
    let now = crate::clock::Clock::new().now();

    match state.controller.try_trigger_manual(&symbols, threshold, &cfg.strategy, now).await {
        Ok(result) => {
            for candidate in &result.candidates {
                let cfg = state.config.read().await.clone();
                match state.tracker.ingest(candidate.clone(), &cfg).await {
                    crate::tracker::IngestOutcome::GateDenied { reason, retry_after: Some(retry_after) } => {
                        return too_many_requests(reason, retry_after);
                    }
                    _ => {}
                }
            }
            ok(result).into_response()
        }
        Err(crate::types::Admission::Deny { reason, retry_after }) => too_many_requests(reason, retry_after),
        Err(crate::types::Admission::Admit) => unreachable!(),
    }
}

async fn strategy_progress(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ok(serde_json::json!({ "running": state.controller.is_running() }))
}

// =============================================================================
// Market data
// =============================================================================

#[derive(Deserialize)]
struct SymbolQuery {
    symbol: String,
}

async fn market_ticker(State(state): State<Arc<AppState>>, Query(q): Query<SymbolQuery>) -> impl IntoResponse {
    match state.gateway.get_ticker(&q.symbol).await {
        Some(ticker) => ok(ticker).into_response(),
        None => fail(StatusCode::NOT_FOUND, "no ticker data available").into_response(),
    }
}

#[derive(Deserialize)]
struct KlineQuery {
    symbol: String,
    #[serde(default = "default_interval")]
    interval: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_interval() -> String {
    "5m".to_string()
}

fn default_limit() -> usize {
    100
}

async fn market_kline(State(state): State<Arc<AppState>>, Query(q): Query<KlineQuery>) -> impl IntoResponse {
    let candles = state.gateway.get_klines(&q.symbol, &q.interval, q.limit).await;
    ok(candles)
}

async fn market_funding_rate(State(state): State<Arc<AppState>>, Query(q): Query<SymbolQuery>) -> impl IntoResponse {
    match state.gateway.get_funding_rate(&q.symbol).await {
        Some(rate) => ok(serde_json::json!({ "symbol": q.symbol, "funding_rate": rate })).into_response(),
        None => fail(StatusCode::NOT_FOUND, "no funding rate data available").into_response(),
    }
}

async fn sentiment_fgi(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.gateway.get_sentiment_index().await {
        Some(s) => ok(s).into_response(),
        None => fail(StatusCode::NOT_FOUND, "no sentiment data available").into_response(),
    }
}

// =============================================================================
// Configuration
// =============================================================================

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cfg = state.config.read().await;
    ok(cfg.clone())
}

async fn post_config(State(state): State<Arc<AppState>>, Json(patch): Json<serde_json::Value>) -> impl IntoResponse {
    let mut cfg = state.config.write().await;
    let warnings = cfg.apply_partial_update(&patch);
    let updated = cfg.clone();
    drop(cfg);

    if let Err(e) = updated.save("runtime_config.json") {
        warn!(error = %e, "failed to persist configuration update");
    }
    state.increment_version();
    info!(?warnings, "configuration updated via API");
    ok_with_warnings(updated, warnings)
}

// =============================================================================
// Testing overrides
// =============================================================================

#[derive(Deserialize)]
struct PriceOverrideRequest {
    symbol: String,
    price: f64,
    #[serde(default = "default_override_ttl_ms")]
    ttl_ms: u64,
}

#[derive(Deserialize)]
struct FundingOverrideRequest {
    symbol: String,
    funding_rate: f64,
    #[serde(default = "default_override_ttl_ms")]
    ttl_ms: u64,
}

#[derive(Deserialize)]
struct FgiOverrideRequest {
    value: f64,
    #[serde(default)]
    classification: Option<String>,
    #[serde(default = "default_override_ttl_ms")]
    ttl_ms: u64,
}

#[derive(Deserialize, Default)]
struct ClearOverrideRequest {
    #[serde(default)]
    symbol: Option<String>,
}

fn default_override_ttl_ms() -> u64 {
    60_000
}

fn permission_response(r: Result<(), PermissionDenied>) -> impl IntoResponse {
    match r {
        Ok(()) => ok(serde_json::json!({ "applied": true })).into_response(),
        Err(PermissionDenied) => fail(StatusCode::FORBIDDEN, "override not permitted by current configuration").into_response(),
    }
}

async fn set_price_override(State(state): State<Arc<AppState>>, Json(req): Json<PriceOverrideRequest>) -> impl IntoResponse {
    permission_response(state.gateway.set_price_override(&req.symbol, req.price, std::time::Duration::from_millis(req.ttl_ms)))
}

async fn clear_price_override(State(state): State<Arc<AppState>>, body: Option<Json<ClearOverrideRequest>>) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    permission_response(state.gateway.clear_price_override(req.symbol.as_deref()))
}

async fn set_funding_override(State(state): State<Arc<AppState>>, Json(req): Json<FundingOverrideRequest>) -> impl IntoResponse {
    permission_response(state.gateway.set_funding_override(&req.symbol, req.funding_rate, std::time::Duration::from_millis(req.ttl_ms)))
}

async fn clear_funding_override(State(state): State<Arc<AppState>>, body: Option<Json<ClearOverrideRequest>>) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    permission_response(state.gateway.clear_funding_override(req.symbol.as_deref()))
}

async fn set_fgi_override(State(state): State<Arc<AppState>>, Json(req): Json<FgiOverrideRequest>) -> impl IntoResponse {
    let state_value = crate::market_data::sentiment::SentimentState {
        value: req.value,
        classification: req.classification.unwrap_or_else(|| "OVERRIDE".to_string()),
        source: "override".to_string(),
    };
    permission_response(state.gateway.set_sentiment_override(state_value, std::time::Duration::from_millis(req.ttl_ms)))
}

async fn clear_fgi_override(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    permission_response(state.gateway.clear_sentiment_override())
}

// =============================================================================
// Recommendations
// =============================================================================

async fn create_recommendation(State(state): State<Arc<AppState>>, Json(candidate): Json<CandidateSignal>) -> impl IntoResponse {
    let cfg = state.config.read().await.clone();
    match state.tracker.ingest(candidate, &cfg).await {
        crate::tracker::IngestOutcome::Created(id) => {
            state.increment_version();
            ok(serde_json::json!({ "id": id })).into_response()
        }
        crate::tracker::IngestOutcome::GateDenied { reason, .. } => fail(StatusCode::OK, reason).into_response(),
        crate::tracker::IngestOutcome::InvariantViolation(reason) => fail(StatusCode::BAD_REQUEST, reason).into_response(),
    }
}

async fn list_active(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ok(state.store.list_active())
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn list_history(State(state): State<Arc<AppState>>, Query(q): Query<HistoryQuery>) -> impl IntoResponse {
    ok(state.store.list_history(q.limit))
}

async fn close_recommendation(State(state): State<Arc<AppState>>, Path(id): Path<uuid::Uuid>) -> impl IntoResponse {
    let Some(snapshot) = state.store.get_snapshot(id) else {
        return fail(StatusCode::NOT_FOUND, "recommendation not found").into_response();
    };
    if !snapshot.is_active() {
        return fail(StatusCode::BAD_REQUEST, "recommendation already closed").into_response();
    }
    let Some(ticker) = state.gateway.get_ticker(&snapshot.symbol).await else {
        return fail(StatusCode::SERVICE_UNAVAILABLE, "no price available to close at").into_response();
    };
    let now = chrono::Utc::now();
    let closed = state.store.with_mut(id, |r| {
        r.close(ticker.price, crate::types::ExitReason::Timeout, now);
        r.clone()
    });
    if let Some(reco) = closed {
        if let Some(result) = reco.result {
            state.store.record_close(result, reco.pnl_amount.unwrap_or(0.0));
        }
        let payload = serde_json::to_value(&reco).unwrap_or_default();
        state.broadcaster.publish("recommendation-result", &format!("{}:{}", reco.symbol, reco.direction), payload, Topic::Recommendations).await;
        ok(reco).into_response()
    } else {
        fail(StatusCode::NOT_FOUND, "recommendation disappeared concurrently").into_response()
    }
}

async fn recommendation_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.store.statistics();
    ok(serde_json::json!({
        "wins": stats.wins,
        "losses": stats.losses,
        "breakevens": stats.breakevens,
        "win_rate": stats.win_rate(),
        "cumulative_pnl": stats.cumulative_pnl,
        "max_drawdown": stats.max_drawdown,
    }))
}
