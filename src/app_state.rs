// =============================================================================
// AppState — shared application state (C7's view of C2..C6)
// =============================================================================
//
// The state_version/atomics and ring-buffer-of-recent-errors idiom carry the
// shared-state pattern; the domain fields are the gateway, cooldown gate,
// controller, tracker, and broadcaster this service is built from.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::RwLock as AsyncRwLock;

use crate::broadcaster::Broadcaster;
use crate::config::RuntimeConfig;
use crate::cooldown::CooldownGate;
use crate::market_data::{CandleBuffer, MarketDataGateway};
use crate::recommendation::RecommendationStore;
use crate::strategy_controller::StrategyController;
use crate::strategy_engine::StrategyEngine;
use crate::tracker::Tracker;

const MAX_RECENT_ERRORS: usize = 50;

pub struct AppState {
    pub config: Arc<AsyncRwLock<RuntimeConfig>>,
    pub candle_buffer: Arc<CandleBuffer>,
    pub gateway: Arc<MarketDataGateway>,
    pub cooldown: Arc<CooldownGate>,
    pub strategy_engine: Arc<StrategyEngine>,
    pub controller: Arc<StrategyController>,
    pub store: Arc<RecommendationStore>,
    pub tracker: Arc<Tracker>,
    pub broadcaster: Arc<Broadcaster>,

    state_version: AtomicU64,
    start_time: chrono::DateTime<Utc>,
    recent_errors: RwLock<Vec<ErrorRecord>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub ts: chrono::DateTime<Utc>,
    pub context: String,
    pub message: String,
}

impl AppState {
    pub fn new(config: RuntimeConfig, binance_client: Arc<crate::binance::BinanceClient>) -> Self {
        Self::with_store(config, binance_client, Arc::new(RecommendationStore::new()))
    }

    /// Like `new`, but takes an already-constructed store — used at startup
    /// to inject one restored from disk via `RecommendationStore::load`.
    pub fn with_store(config: RuntimeConfig, binance_client: Arc<crate::binance::BinanceClient>, store: Arc<RecommendationStore>) -> Self {
        let clock = crate::clock::Clock::new();
        let candle_buffer = Arc::new(CandleBuffer::new(500));
        let gateway = Arc::new(MarketDataGateway::new(
            candle_buffer.clone(),
            binance_client,
            config.testing.allow_price_override,
            config.testing.allow_fgi_override,
            config.testing.allow_funding_override,
        ));
        let cooldown = Arc::new(CooldownGate::new());
        let strategy_engine = Arc::new(StrategyEngine::new(gateway.clone()));
        let controller = Arc::new(StrategyController::new(strategy_engine.clone(), cooldown.clone()));
        let broadcaster = Arc::new(Broadcaster::new(&config.realtime, clock.clone()));
        let tracker = Arc::new(Tracker::new(store.clone(), gateway.clone(), cooldown.clone(), broadcaster.clone(), clock));

        Self {
            config: Arc::new(AsyncRwLock::new(config)),
            candle_buffer,
            gateway,
            cooldown,
            strategy_engine,
            controller,
            store,
            tracker,
            broadcaster,
            state_version: AtomicU64::new(0),
            start_time: Utc::now(),
            recent_errors: RwLock::new(Vec::new()),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    pub fn push_error(&self, context: &str, message: String) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord { ts: Utc::now(), context: context.to_string(), message });
        if errors.len() > MAX_RECENT_ERRORS {
            let overflow = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(0..overflow);
        }
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.read().clone()
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("state_version", &self.current_state_version())
            .field("uptime_seconds", &self.uptime_seconds())
            .finish()
    }
}
