// =============================================================================
// Strategy Engine (stand-in) — not the subject of this repo
// =============================================================================
//
// C4 invokes "the strategy engine (external)"; this module is a thin, real
// producer of candidate signals so the orchestration components (cooldown
// gate, tracker, broadcaster) have something genuine to drive them. It reads
// recent candles through the gateway and combines RSI + EMA-trend + ATR into
// a single strength score.
// =============================================================================

use std::sync::Arc;

use tracing::debug;

use crate::indicators::atr::calculate_atr;
use crate::indicators::ema::ema_trend_aligned;
use crate::indicators::rsi::current_rsi;
use crate::market_data::MarketDataGateway;
use crate::recommendation::CandidateSignal;
use crate::types::Direction;

pub struct StrategyEngine {
    gateway: Arc<MarketDataGateway>,
}

impl StrategyEngine {
    pub fn new(gateway: Arc<MarketDataGateway>) -> Self {
        Self { gateway }
    }

    /// Evaluate one symbol and return a candidate signal if the combined
    /// strength score crosses `signal_threshold`.
    pub async fn evaluate_symbol(&self, symbol: &str, signal_threshold: f64) -> Option<CandidateSignal> {
        let candles = self.gateway.get_klines(symbol, "5m", 100).await;
        if candles.len() < 55 {
            debug!(symbol, count = candles.len(), "insufficient candle history for evaluation");
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let (rsi_value, _) = current_rsi(&closes, 14)?;
        let (bullish, ema_strength) = ema_trend_aligned(&closes)?;
        let atr = calculate_atr(&candles, 14)?;

        let direction = if bullish { Direction::Long } else { Direction::Short };

        // RSI component: distance from neutral (50), penalized when RSI
        // contradicts the EMA-implied direction (overbought longs, oversold
        // shorts are weaker signals, not stronger ones).
        let rsi_component = match direction {
            Direction::Long if rsi_value >= 70.0 => (100.0 - rsi_value) / 100.0,
            Direction::Short if rsi_value <= 30.0 => rsi_value / 100.0,
            Direction::Long => (rsi_value - 50.0).max(0.0) / 50.0,
            Direction::Short => (50.0 - rsi_value).max(0.0) / 50.0,
        };

        let ema_component = ema_strength.min(1.0);
        let score = (rsi_component * 0.4 + ema_component * 0.6).clamp(0.0, 1.0);

        debug!(symbol, %direction, rsi_value, ema_strength, atr, score, "strategy evaluation");

        if score < signal_threshold {
            return None;
        }

        let entry_price = *closes.last()?;
        let (take_profit_price, stop_loss_price) = match direction {
            Direction::Long => (Some(entry_price + atr * 2.0), Some(entry_price - atr * 1.0)),
            Direction::Short => (Some(entry_price - atr * 2.0), Some(entry_price + atr * 1.0)),
        };

        Some(CandidateSignal {
            symbol: symbol.to_string(),
            direction: direction.to_string(),
            entry_price,
            confidence_score: score,
            take_profit_price,
            stop_loss_price,
            leverage: 1.0,
            position_size: None,
            strategy_type: Some("rsi_ema_atr_v1".to_string()),
            source: Some("strategy_engine".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::BinanceClient;
    use crate::market_data::{Candle, CandleBuffer};

    fn flat_gateway() -> MarketDataGateway {
        let buffer = Arc::new(CandleBuffer::new(200));
        MarketDataGateway::new(buffer, Arc::new(BinanceClient::new()), true, true, true)
    }

    #[tokio::test]
    async fn evaluate_returns_none_on_thin_history() {
        let gateway = Arc::new(flat_gateway());
        let engine = StrategyEngine::new(gateway);
        let result = engine.evaluate_symbol("BTCUSDT", 0.5).await;
        assert!(result.is_none());
    }

    #[test]
    fn rejects_direction_wire_format_roundtrip() {
        assert_eq!(Direction::Long.to_string(), "LONG");
        assert_eq!(Direction::Short.to_string(), "SHORT");
    }
}
