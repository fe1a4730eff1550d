// =============================================================================
// Recommendation Tracker (C5) — ingest gates + evaluation loop
// =============================================================================
//
// Periodic exit monitor and triple-barrier close rules applied to the
// recommendation model: no order is ever placed, only simulated entry/exit
// bookkeeping driven by C2 prices.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, Topic};
use crate::clock::{CancelScope, Clock};
use crate::config::{MarketRegimeConfig, RuntimeConfig};
use crate::cooldown::{AdmitRequest, CooldownGate};
use crate::indicators::ema::ema_trend_aligned;
use crate::market_data::MarketDataGateway;
use crate::recommendation::{dedupe_key, normalize_direction, CandidateSignal, Recommendation, RecommendationStore};
use crate::types::{Admission, Direction, ExitReason, RecommendationStatus};

pub struct Tracker {
    store: Arc<RecommendationStore>,
    gateway: Arc<MarketDataGateway>,
    cooldown: Arc<CooldownGate>,
    broadcaster: Arc<Broadcaster>,
    clock: Clock,
}

/// Why a candidate signal never became a recommendation. Surfaced only in
/// logs; the ingest path is fire-and-forget from the controller's view.
#[derive(Debug)]
pub enum IngestOutcome {
    Created(uuid::Uuid),
    InvariantViolation(String),
    /// `retry_after` is `Some` only for time-gated denials (C3's cooldown/
    /// rate/duplicate gate); the market-regime, entry-strength, and MTF
    /// gates aren't time-gated so carry `None`.
    GateDenied { reason: String, retry_after: Option<Duration> },
}

impl Tracker {
    pub fn new(store: Arc<RecommendationStore>, gateway: Arc<MarketDataGateway>, cooldown: Arc<CooldownGate>, broadcaster: Arc<Broadcaster>, clock: Clock) -> Self {
        Self { store, gateway, cooldown, broadcaster, clock }
    }

    /// Ingest one candidate signal: normalize, validate, gate, persist.
    pub async fn ingest(&self, candidate: CandidateSignal, cfg: &RuntimeConfig) -> IngestOutcome {
        let Some(direction) = normalize_direction(&candidate.direction) else {
            let msg = format!("unrecognised direction '{}'", candidate.direction);
            warn!(symbol = candidate.symbol, direction = candidate.direction, "recommendation ingest rejected: {msg}");
            return IngestOutcome::InvariantViolation(msg);
        };

        if let Some(reason) = self.check_market_regime(&candidate.symbol, &cfg.strategy.market_regime).await {
            return IngestOutcome::GateDenied { reason, retry_after: None };
        }

        let min_strength = match direction {
            Direction::Long => cfg.strategy.entry_filters.min_combined_strength_long,
            Direction::Short => cfg.strategy.entry_filters.min_combined_strength_short,
        };
        if candidate.confidence_score < min_strength {
            return IngestOutcome::GateDenied { reason: "entry-strength gate".to_string(), retry_after: None };
        }

        if let Some(reason) = self.check_mtf_alignment(&candidate.symbol, direction, cfg.strategy.entry_filters.enable_mtf).await {
            return IngestOutcome::GateDenied { reason, retry_after: None };
        }

        let now = self.clock.now();
        let active = self.store.active_for(&candidate.symbol, direction);
        let nearest_active_price = active.iter().map(|r| r.entry_price).next();

        let admit_req = AdmitRequest {
            symbol: &candidate.symbol,
            direction,
            confidence: candidate.confidence_score,
            entry_price: candidate.entry_price,
            manual: false,
            active_same_key: nearest_active_price,
        };
        match self.cooldown.admit(&admit_req, &cfg.strategy, now) {
            Admission::Deny { reason, retry_after } => return IngestOutcome::GateDenied { reason, retry_after: Some(retry_after) },
            Admission::Admit => {}
        }

        let reco = match Recommendation::new(
            candidate.symbol.clone(),
            direction,
            candidate.entry_price,
            candidate.leverage,
            candidate.take_profit_price,
            candidate.stop_loss_price,
            candidate.confidence_score,
            candidate.position_size,
            candidate.strategy_type.clone(),
            candidate.source.clone(),
        ) {
            Ok(r) => r,
            Err(e) => {
                warn!(symbol = candidate.symbol, "recommendation ingest rejected: {e}");
                return IngestOutcome::InvariantViolation(e.0);
            }
        };

        let key = dedupe_key(reco.created_at, &reco.symbol, reco.direction, reco.entry_price, reco.take_profit_price, reco.stop_loss_price);
        let id = reco.id;
        let payload = serde_json::to_value(&reco).unwrap_or_default();
        self.store.insert(reco);

        info!(id = %id, symbol = candidate.symbol, direction = %direction, key, "recommendation created");
        self.broadcaster.publish("recommendation-created", &format!("{}:{}", candidate.symbol, direction), payload, Topic::Recommendations).await;

        IngestOutcome::Created(id)
    }

    /// Market-regime gate: blocks entry during configured sentiment/funding
    /// extremes. Permissive (`None`) whenever the gateway has no reading
    /// cached yet, matching the strategy engine's treatment of thin data.
    async fn check_market_regime(&self, symbol: &str, cfg: &MarketRegimeConfig) -> Option<String> {
        if cfg.avoid_extreme_sentiment {
            if let Some(sentiment) = self.gateway.get_sentiment_index().await {
                if sentiment.value <= cfg.extreme_sentiment_low || sentiment.value >= cfg.extreme_sentiment_high {
                    return Some("market-regime gate: extreme sentiment".to_string());
                }
            }
        }

        if cfg.avoid_high_funding {
            if let Some(funding) = self.gateway.get_funding_rate(symbol).await {
                if funding.abs() >= cfg.high_funding_abs {
                    return Some("market-regime gate: extreme funding rate".to_string());
                }
            }
        }

        None
    }

    /// Multi-timeframe alignment gate: when enabled, requires the 1h EMA
    /// stack to agree with the candidate's direction. No-op when disabled or
    /// when there isn't enough 1h history to judge alignment.
    async fn check_mtf_alignment(&self, symbol: &str, direction: Direction, enabled: bool) -> Option<String> {
        if !enabled {
            return None;
        }

        let candles = self.gateway.get_klines(symbol, "1h", 100).await;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let Some((bullish, _strength)) = ema_trend_aligned(&closes) else {
            return None;
        };

        let aligned = match direction {
            Direction::Long => bullish,
            Direction::Short => !bullish,
        };
        if aligned {
            None
        } else {
            Some("multi-timeframe alignment gate".to_string())
        }
    }

    /// One evaluation pass over all active recommendations.
    pub async fn evaluate_once(&self, cfg: &RuntimeConfig) {
        let ids = self.store.ids();
        for id in ids {
            self.evaluate_one(id, cfg).await;
        }
    }

    async fn evaluate_one(&self, id: uuid::Uuid, cfg: &RuntimeConfig) {
        let Some(snapshot) = self.store.get_snapshot(id) else { return };
        if !snapshot.is_active() {
            return;
        }

        let Some(ticker) = self.gateway.get_ticker(&snapshot.symbol).await else {
            debug!(id = %id, symbol = snapshot.symbol, "no price available this tick, skipping");
            return;
        };
        let current_price = ticker.price;
        let now = Utc::now();

        let age_hours = (now - snapshot.created_at).num_seconds() as f64 / 3600.0;

        let close_decision = self.store.with_mut(id, |reco| {
            reco.current_price = current_price;
            reco.updated_at = now;

            if let Some(reason) = check_stop_and_target(reco, current_price) {
                return Some(reason);
            }

            if cfg.recommendation.trailing.enabled
                && reco.trailing.update(reco.direction, reco.entry_price, current_price, &cfg.recommendation.trailing)
            {
                return Some(ExitReason::Trailing);
            }

            if age_hours >= cfg.recommendation.max_holding_hours {
                return Some(ExitReason::Timeout);
            }

            None
        });

        if let Some(Some(reason)) = close_decision {
            let closed = self.store.with_mut(id, |reco| {
                reco.close(current_price, reason, now);
                reco.clone()
            });
            if let Some(reco) = closed {
                if let Some(result) = reco.result {
                    self.store.record_close(result, reco.pnl_amount.unwrap_or(0.0));
                }
                info!(id = %id, symbol = reco.symbol, ?reason, result = ?reco.result, exit_price = current_price, "recommendation closed");
                let payload = serde_json::to_value(&reco).unwrap_or_default();
                self.broadcaster.publish("recommendation-result", &format!("{}:{}", reco.symbol, reco.direction), payload, Topic::Recommendations).await;
            }
        }
    }

    /// Periodic evaluation loop, run until `scope` is cancelled.
    pub async fn run_evaluation_loop(self: Arc<Self>, clock: Clock, scope: CancelScope, period: Duration, config: Arc<tokio::sync::RwLock<RuntimeConfig>>) {
        let mut ticker = clock.ticker(period);
        info!(period_ms = period.as_millis(), "recommendation evaluation loop started");
        while ticker.tick(&scope).await.is_some() {
            let cfg = config.read().await.clone();
            self.evaluate_once(&cfg).await;
        }
        info!("recommendation evaluation loop stopped");
    }
}

/// Stop-loss then take-profit, in priority order per §4.5 step 3.
fn check_stop_and_target(reco: &Recommendation, current_price: f64) -> Option<ExitReason> {
    let sl = reco.stop_loss_price;
    let tp = reco.take_profit_price;

    let sl_hit = sl.is_some_and(|sl| match reco.direction {
        Direction::Long => current_price <= sl,
        Direction::Short => current_price >= sl,
    });
    if sl_hit {
        return Some(ExitReason::StopLoss);
    }

    let tp_hit = tp.is_some_and(|tp| match reco.direction {
        Direction::Long => current_price >= tp,
        Direction::Short => current_price <= tp,
    });
    if tp_hit {
        return Some(ExitReason::TakeProfit);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::BinanceClient;
    use crate::config::RealtimeConfig;
    use crate::market_data::CandleBuffer;

    fn harness() -> (Arc<Tracker>, Arc<RecommendationStore>) {
        let store = Arc::new(RecommendationStore::new());
        let buffer = Arc::new(CandleBuffer::new(200));
        let gateway = Arc::new(MarketDataGateway::new(buffer, Arc::new(BinanceClient::new()), true, true, true));
        let cooldown = Arc::new(CooldownGate::new());
        let broadcaster = Arc::new(Broadcaster::new(&RealtimeConfig { dedupe_enabled: false, dedupe_window_ms: 0, jitter_enabled: false, jitter_max_ms: 0, snapshot_enabled: false, snapshot_dir: "snapshots".into() }, Clock::new()));
        let tracker = Arc::new(Tracker::new(store.clone(), gateway, cooldown, broadcaster, Clock::new()));
        (tracker, store)
    }

    #[test]
    fn stop_loss_hit_at_equality_for_long() {
        let reco = Recommendation::new("ETHUSDT".into(), Direction::Long, 3000.0, 1.0, Some(3060.0), Some(2970.0), 0.8, Some(1000.0), None, None).unwrap();
        assert_eq!(check_stop_and_target(&reco, 2970.0), Some(ExitReason::StopLoss));
    }

    #[test]
    fn take_profit_hit_on_third_tick_sequence() {
        let reco = Recommendation::new("ETHUSDT".into(), Direction::Long, 3000.0, 1.0, Some(3060.0), Some(2970.0), 0.8, Some(1000.0), None, None).unwrap();
        assert_eq!(check_stop_and_target(&reco, 3010.0), None);
        assert_eq!(check_stop_and_target(&reco, 3055.0), None);
        assert_eq!(check_stop_and_target(&reco, 3061.0), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn stop_loss_hit_at_equality_for_short() {
        let reco = Recommendation::new("ETHUSDT".into(), Direction::Short, 3000.0, 1.0, Some(2940.0), Some(3030.0), 0.8, Some(1000.0), None, None).unwrap();
        assert_eq!(check_stop_and_target(&reco, 3030.0), Some(ExitReason::StopLoss));
    }

    #[tokio::test]
    async fn ingest_rejects_unrecognised_direction() {
        let (tracker, _store) = harness();
        let cfg = RuntimeConfig::default();
        let candidate = CandidateSignal {
            symbol: "BTCUSDT".into(),
            direction: "SIDEWAYS".into(),
            entry_price: 100.0,
            confidence_score: 0.9,
            take_profit_price: None,
            stop_loss_price: None,
            leverage: 1.0,
            position_size: None,
            strategy_type: None,
            source: None,
        };
        let outcome = tracker.ingest(candidate, &cfg).await;
        assert!(matches!(outcome, IngestOutcome::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn market_regime_gate_blocks_extreme_sentiment() {
        let (tracker, _store) = harness();
        let mut cfg = RuntimeConfig::default();
        cfg.strategy.entry_filters.min_combined_strength_long = 0.0;
        cfg.strategy.entry_filters.enable_mtf = false;
        cfg.strategy.global_min_interval_ms = 0;
        cfg.strategy.market_regime.avoid_extreme_sentiment = true;
        tracker
            .gateway
            .set_sentiment_override(
                crate::market_data::sentiment::SentimentState { value: 95.0, classification: "Extreme Greed".into(), source: "test".into() },
                Duration::from_secs(60),
            )
            .unwrap();

        let candidate = CandidateSignal {
            symbol: "BTCUSDT".into(),
            direction: "LONG".into(),
            entry_price: 100.0,
            confidence_score: 0.9,
            take_profit_price: Some(110.0),
            stop_loss_price: Some(90.0),
            leverage: 1.0,
            position_size: Some(100.0),
            strategy_type: None,
            source: None,
        };
        let outcome = tracker.ingest(candidate, &cfg).await;
        match outcome {
            IngestOutcome::GateDenied { reason, retry_after } => {
                assert!(reason.contains("market-regime"));
                assert!(retry_after.is_none());
            }
            other => panic!("expected market-regime gate denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn market_regime_gate_permissive_when_disabled() {
        let (tracker, _store) = harness();
        let mut cfg = RuntimeConfig::default();
        cfg.strategy.entry_filters.min_combined_strength_long = 0.0;
        cfg.strategy.entry_filters.enable_mtf = false;
        cfg.strategy.global_min_interval_ms = 0;
        tracker
            .gateway
            .set_sentiment_override(
                crate::market_data::sentiment::SentimentState { value: 95.0, classification: "Extreme Greed".into(), source: "test".into() },
                Duration::from_secs(60),
            )
            .unwrap();

        let candidate = CandidateSignal {
            symbol: "BTCUSDT".into(),
            direction: "LONG".into(),
            entry_price: 100.0,
            confidence_score: 0.9,
            take_profit_price: Some(110.0),
            stop_loss_price: Some(90.0),
            leverage: 1.0,
            position_size: Some(100.0),
            strategy_type: None,
            source: None,
        };
        let outcome = tracker.ingest(candidate, &cfg).await;
        assert!(matches!(outcome, IngestOutcome::Created(_)));
    }

    #[tokio::test]
    async fn mtf_gate_permissive_without_enough_kline_history() {
        let (tracker, _store) = harness();
        let mut cfg = RuntimeConfig::default();
        cfg.strategy.entry_filters.min_combined_strength_long = 0.0;
        cfg.strategy.global_min_interval_ms = 0;
        assert!(cfg.strategy.entry_filters.enable_mtf);

        let candidate = CandidateSignal {
            symbol: "BTCUSDT".into(),
            direction: "LONG".into(),
            entry_price: 100.0,
            confidence_score: 0.9,
            take_profit_price: Some(110.0),
            stop_loss_price: Some(90.0),
            leverage: 1.0,
            position_size: Some(100.0),
            strategy_type: None,
            source: None,
        };
        // No kline history is buffered in the harness, so the gate is
        // permissive rather than blocking entry on insufficient data.
        let outcome = tracker.ingest(candidate, &cfg).await;
        assert!(matches!(outcome, IngestOutcome::Created(_)));
    }

    #[tokio::test]
    async fn ingest_creates_recommendation_when_gates_pass() {
        let (tracker, store) = harness();
        let mut cfg = RuntimeConfig::default();
        cfg.strategy.entry_filters.min_combined_strength_long = 0.0;
        cfg.strategy.global_min_interval_ms = 0;
        let candidate = CandidateSignal {
            symbol: "BTCUSDT".into(),
            direction: "LONG".into(),
            entry_price: 100.0,
            confidence_score: 0.9,
            take_profit_price: Some(110.0),
            stop_loss_price: Some(90.0),
            leverage: 1.0,
            position_size: Some(100.0),
            strategy_type: None,
            source: None,
        };
        let outcome = tracker.ingest(candidate, &cfg).await;
        assert!(matches!(outcome, IngestOutcome::Created(_)));
        assert_eq!(store.list_active().len(), 1);
    }
}
