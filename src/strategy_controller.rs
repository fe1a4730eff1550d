// =============================================================================
// Strategy Trigger Controller (C4)
// =============================================================================
//
// Two invocation modes share one code path: `run_once`. Scheduled invocation
// is a ticker that skips a tick if the previous run is still in flight
// (self-pausing, no queued invocations); manual invocation goes through C3's
// single-flight guard first.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{CancelScope, Clock};
use crate::config::{RuntimeConfig, StrategyConfig};
use crate::cooldown::CooldownGate;
use crate::recommendation::CandidateSignal;
use crate::strategy_engine::StrategyEngine;
use crate::tracker::Tracker;
use crate::types::Admission;

/// Result of one controller invocation, reported up to C7 and broadcast as
/// progress events.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyResult {
    pub symbols_evaluated: usize,
    pub candidates: Vec<CandidateSignal>,
}

pub struct StrategyController {
    engine: Arc<StrategyEngine>,
    cooldown: Arc<CooldownGate>,
    running: AtomicBool,
}

impl StrategyController {
    pub fn new(engine: Arc<StrategyEngine>, cooldown: Arc<CooldownGate>) -> Self {
        Self {
            engine,
            cooldown,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Evaluate every configured symbol once. Manual callers must acquire
    /// the cooldown gate's single-flight lock before calling this; scheduled
    /// callers skip the tick entirely if a run is already in progress.
    async fn run_once(&self, symbols: &[String], signal_threshold: f64) -> StrategyResult {
        self.running.store(true, Ordering::Release);
        let mut candidates = Vec::new();
        for symbol in symbols {
            if let Some(signal) = self.engine.evaluate_symbol(symbol, signal_threshold).await {
                candidates.push(signal);
            }
        }
        self.running.store(false, Ordering::Release);
        StrategyResult {
            symbols_evaluated: symbols.len(),
            candidates,
        }
    }

    /// Manual trigger entry point. Callers are expected to have already
    /// checked `CooldownGate::try_acquire_manual`; this method releases the
    /// lock unconditionally on return.
    pub async fn trigger_manual(&self, symbols: &[String], signal_threshold: f64) -> StrategyResult {
        let result = self.run_once(symbols, signal_threshold).await;
        self.cooldown.release_manual();
        result
    }

    /// Acquire the manual single-flight lock and the manual-rate window in
    /// one call, then run, mirroring the HTTP adapter's 429-on-deny
    /// contract (single-flight-busy, manual-rate-window, or any cooldown
    /// denial surfaced later during ingest).
    pub async fn try_trigger_manual(
        &self,
        symbols: &[String],
        signal_threshold: f64,
        cfg: &StrategyConfig,
        now: tokio::time::Instant,
    ) -> Result<StrategyResult, Admission> {
        match self.cooldown.acquire_manual(cfg, now) {
            Admission::Admit => Ok(self.trigger_manual(symbols, signal_threshold).await),
            deny => Err(deny),
        }
    }

    /// Scheduled invocation loop. Skips a tick (no queueing) if the previous
    /// run is still in flight. Every candidate surfaced by a run is handed to
    /// `tracker.ingest`, re-reading `config` each tick so live config edits
    /// take effect on the next cycle. Runs until `scope` is cancelled.
    pub async fn run_scheduled(
        self: Arc<Self>,
        clock: Clock,
        scope: CancelScope,
        symbols: Vec<String>,
        tracker: Arc<Tracker>,
        config: Arc<tokio::sync::RwLock<RuntimeConfig>>,
        period: std::time::Duration,
    ) {
        let mut ticker = clock.ticker(period);
        info!(period_ms = period.as_millis(), "strategy trigger controller started");
        while ticker.tick(&scope).await.is_some() {
            if self.is_running() {
                warn!("scheduled strategy tick skipped: previous invocation still running");
                continue;
            }
            let cfg = config.read().await.clone();
            let result = self.run_once(&symbols, cfg.strategy.signal_threshold).await;
            for candidate in &result.candidates {
                let _ = tracker.ingest(candidate.clone(), &cfg).await;
            }
            info!(candidates = result.candidates.len(), "scheduled strategy evaluation complete");
        }
        info!("strategy trigger controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::BinanceClient;
    use crate::market_data::{CandleBuffer, MarketDataGateway};

    fn controller() -> StrategyController {
        let buffer = Arc::new(CandleBuffer::new(200));
        let gateway = Arc::new(MarketDataGateway::new(buffer, Arc::new(BinanceClient::new()), true, true, true));
        let engine = Arc::new(StrategyEngine::new(gateway));
        let cooldown = Arc::new(CooldownGate::new());
        StrategyController::new(engine, cooldown)
    }

    #[tokio::test]
    async fn run_once_returns_empty_on_no_history() {
        let controller = controller();
        let result = controller.run_once(&["BTCUSDT".to_string()], 0.5).await;
        assert_eq!(result.symbols_evaluated, 1);
        assert!(result.candidates.is_empty());
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn manual_trigger_releases_single_flight_lock_on_completion() {
        let controller = controller();
        let cfg = RuntimeConfig::default().strategy;
        let now = tokio::time::Instant::now();
        let first = controller.try_trigger_manual(&["BTCUSDT".to_string()], 0.5, &cfg, now).await;
        assert!(first.is_ok());
        // Lock was released after the first call completed, so a second
        // manual trigger should be admitted rather than denied.
        let second = controller.try_trigger_manual(&["BTCUSDT".to_string()], 0.5, &cfg, now).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn concurrent_manual_trigger_denied_while_locked() {
        let controller = controller();
        let acquired = controller.cooldown.try_acquire_manual();
        assert!(acquired.is_admit());
        let denied = controller.cooldown.try_acquire_manual();
        assert!(!denied.is_admit());
        controller.cooldown.release_manual();
    }
}
