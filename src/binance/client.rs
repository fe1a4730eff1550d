// =============================================================================
// Binance REST API Client — public market-data endpoints only
// =============================================================================
//
// This orchestration service never places orders, so the client carries no
// API key/secret and signs nothing. It exists purely as C2's cold-start
// fallback for `get_klines` when the candle buffer hasn't accumulated enough
// history from the websocket stream yet.
// =============================================================================

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::market_data::Candle;

/// Public Binance REST client, timeout-bound per call.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(12))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceClient initialised (base_url=https://api.binance.com)");

        Self {
            base_url: "https://api.binance.com".to_string(),
            client,
        }
    }

    /// GET /api/v3/klines (public — no signature required).
    ///
    /// Array indices: [0] openTime, [1] open, [2] high, [3] low, [4] close,
    /// [5] volume, [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades,
    /// [9] takerBuyBaseVolume, [10] takerBuyQuoteVolume
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/klines returned {}: {}", status, body);
        }

        let raw = body.as_array().context("klines response is not an array")?;
        let mut candles = Vec::with_capacity(raw.len());

        for entry in raw {
            let arr = entry.as_array().context("kline entry is not an array")?;
            if arr.len() < 11 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }

            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = Self::parse_str_f64(&arr[1])?;
            let high = Self::parse_str_f64(&arr[2])?;
            let low = Self::parse_str_f64(&arr[3])?;
            let close = Self::parse_str_f64(&arr[4])?;
            let volume = Self::parse_str_f64(&arr[5])?;
            let close_time = arr[6].as_i64().unwrap_or(0);

            candles.push(Candle {
                open_time,
                close_time,
                open,
                high,
                low,
                close,
                volume,
                quote_volume: 0.0,
                trades_count: 0,
                taker_buy_volume: 0.0,
                taker_buy_quote_volume: 0.0,
                is_closed: true,
            });
        }

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>().with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient").field("base_url", &self.base_url).finish()
    }
}
