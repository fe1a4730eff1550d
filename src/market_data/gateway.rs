// =============================================================================
// Market Data Gateway — cached, rate-limited, override-capable market data
// =============================================================================
//
// Single entry point for ticker, kline, funding-rate, and sentiment reads.
// Caches per key with TTL, coalesces concurrent identical upstream calls
// through a per-key exclusive section (the "per-key promise map" of a
// single-flight cache, realised here as a map of key-scoped mutexes), and
// opens a per-endpoint circuit breaker on persistent upstream failure.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::binance::client::BinanceClient;
use crate::error::{ErrorKind, GatewayError};
use crate::futures_intel::funding_rate::FundingRateMonitor;
use crate::market_data::sentiment::{SentimentMonitor, SentimentState};
use crate::market_data::{Candle, CandleBuffer, CandleKey};

const MAX_RETRIES: u32 = 3;
const BACKOFF_CEILING: Duration = Duration::from_secs(4);
const CIRCUIT_OPEN_COOLDOWN: Duration = Duration::from_secs(30);
const STALE_WHILE_ERROR: Duration = Duration::from_secs(120);

/// A value injected by the testing surface, read-through-wins over any live
/// value while `expires_at` has not passed.
#[derive(Debug, Clone)]
pub struct OverrideValue<T> {
    pub value: T,
    pub expires_at: Instant,
}

impl<T: Clone> OverrideValue<T> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: f64,
    pub volume_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub change_24h: f64,
    pub timestamp: i64,
}

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
    cached_at: Instant,
}

/// Per-endpoint circuit breaker state.
struct CircuitState {
    open_until: Option<Instant>,
    consecutive_failures: u32,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self { open_until: None, consecutive_failures: 0 }
    }
}

/// Returned when an override mutation is attempted without the corresponding
/// `testing.allow*Override` flag enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionDenied;

pub struct MarketDataGateway {
    candle_buffer: Arc<CandleBuffer>,
    binance_client: Arc<BinanceClient>,
    funding_monitor: FundingRateMonitor,
    sentiment_monitor: SentimentMonitor,

    ticker_cache: DashMap<String, CacheEntry<Ticker>>,
    kline_cache: DashMap<CandleKey, CacheEntry<Vec<Candle>>>,
    funding_cache: DashMap<String, CacheEntry<f64>>,
    sentiment_cache: RwLock<Option<CacheEntry<SentimentState>>>,

    price_overrides: DashMap<String, OverrideValue<f64>>,
    funding_overrides: DashMap<String, OverrideValue<f64>>,
    sentiment_override: RwLock<Option<OverrideValue<SentimentState>>>,

    single_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    circuits: DashMap<String, CircuitState>,

    allow_price_override: bool,
    allow_fgi_override: bool,
    allow_funding_override: bool,
}

impl MarketDataGateway {
    pub fn new(
        candle_buffer: Arc<CandleBuffer>,
        binance_client: Arc<BinanceClient>,
        allow_price_override: bool,
        allow_fgi_override: bool,
        allow_funding_override: bool,
    ) -> Self {
        Self {
            candle_buffer,
            binance_client,
            funding_monitor: FundingRateMonitor::new(),
            sentiment_monitor: SentimentMonitor::new(),
            ticker_cache: DashMap::new(),
            kline_cache: DashMap::new(),
            funding_cache: DashMap::new(),
            sentiment_cache: RwLock::new(None),
            price_overrides: DashMap::new(),
            funding_overrides: DashMap::new(),
            sentiment_override: RwLock::new(None),
            single_flight: DashMap::new(),
            circuits: DashMap::new(),
            allow_price_override,
            allow_fgi_override,
            allow_funding_override,
        }
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.single_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn circuit_is_open(&self, endpoint: &str, now: Instant) -> bool {
        self.circuits
            .get(endpoint)
            .and_then(|c| c.open_until)
            .map(|until| now < until)
            .unwrap_or(false)
    }

    fn record_failure(&self, endpoint: &str, now: Instant) {
        let mut entry = self.circuits.entry(endpoint.to_string()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= MAX_RETRIES {
            entry.open_until = Some(now + CIRCUIT_OPEN_COOLDOWN);
            warn!(endpoint, "circuit opened after repeated upstream failures");
        }
    }

    fn record_success(&self, endpoint: &str) {
        if let Some(mut entry) = self.circuits.get_mut(endpoint) {
            entry.consecutive_failures = 0;
            entry.open_until = None;
        }
    }

    /// Retry an upstream call with exponential backoff + jitter. Only
    /// retryable `ErrorKind`s are retried; others return immediately.
    async fn with_retry<T, F, Fut>(&self, endpoint: &str, mut f: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => {
                    self.record_success(endpoint);
                    return Ok(v);
                }
                Err(e) if e.kind().is_retryable() && attempt + 1 < MAX_RETRIES => {
                    attempt += 1;
                    let base = e.kind().base_backoff();
                    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
                    let backoff = (base * 2u32.pow(attempt - 1) + Duration::from_millis(jitter_ms))
                        .min(BACKOFF_CEILING);
                    debug!(endpoint, attempt, backoff_ms = backoff.as_millis() as u64, "retrying after backoff");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.record_failure(endpoint, Instant::now());
                    return Err(e);
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // Ticker
    // -------------------------------------------------------------------

    pub async fn get_ticker(&self, symbol: &str) -> Option<Ticker> {
        self.get_ticker_at(symbol, Instant::now()).await
    }

    async fn get_ticker_at(&self, symbol: &str, now: Instant) -> Option<Ticker> {
        if let Some(ov) = self.price_overrides.get(symbol) {
            if ov.is_live(now) {
                return Some(Ticker {
                    symbol: symbol.to_string(),
                    price: ov.value,
                    volume_24h: 0.0,
                    high_24h: ov.value,
                    low_24h: ov.value,
                    change_24h: 0.0,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                });
            }
        }

        if let Some(entry) = self.ticker_cache.get(symbol) {
            if now < entry.expires_at {
                return Some(entry.value.clone());
            }
        }

        // Fall back to a synthetic ticker built from the most recent 1m close.
        let key = CandleKey { symbol: symbol.to_string(), interval: "1m".to_string() };
        if let Some(close) = self.candle_buffer.last_close(&key) {
            let ticker = Ticker {
                symbol: symbol.to_string(),
                price: close,
                volume_24h: 0.0,
                high_24h: close,
                low_24h: close,
                change_24h: 0.0,
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            self.ticker_cache.insert(
                symbol.to_string(),
                CacheEntry { value: ticker.clone(), expires_at: now + Duration::from_secs(2), cached_at: now },
            );
            return Some(ticker);
        }

        if let Some(entry) = self.ticker_cache.get(symbol) {
            if now.saturating_duration_since(entry.cached_at) <= STALE_WHILE_ERROR {
                return Some(entry.value.clone());
            }
        }

        None
    }

    // -------------------------------------------------------------------
    // Klines
    // -------------------------------------------------------------------

    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Vec<Candle> {
        let key = CandleKey { symbol: symbol.to_string(), interval: interval.to_string() };
        let buffered = self.candle_buffer.get_closed(&key, limit);
        if buffered.len() >= limit || !buffered.is_empty() {
            return buffered;
        }

        let now = Instant::now();
        if let Some(entry) = self.kline_cache.get(&key) {
            if now < entry.expires_at {
                return entry.value.clone();
            }
        }

        if self.circuit_is_open("klines", now) {
            return self
                .kline_cache
                .get(&key)
                .filter(|e| now.saturating_duration_since(e.cached_at) <= STALE_WHILE_ERROR)
                .map(|e| e.value.clone())
                .unwrap_or_default();
        }

        let lock = self.lock_for(&format!("klines:{key}"));
        let _guard = lock.lock().await;

        if let Some(entry) = self.kline_cache.get(&key) {
            if Instant::now() < entry.expires_at {
                return entry.value.clone();
            }
        }

        let client = self.binance_client.clone();
        let sym = symbol.to_string();
        let iv = interval.to_string();
        let result = self
            .with_retry("klines", || {
                let client = client.clone();
                let sym = sym.clone();
                let iv = iv.clone();
                async move {
                    client
                        .get_klines(&sym, &iv, limit as u32)
                        .await
                        .map_err(|e| GatewayError::new(ErrorKind::Network, "klines", e.to_string()))
                }
            })
            .await;

        match result {
            Ok(candles) => {
                let ttl = ttl_for_interval(interval);
                self.kline_cache.insert(
                    key,
                    CacheEntry { value: candles.clone(), expires_at: Instant::now() + ttl, cached_at: Instant::now() },
                );
                candles
            }
            Err(e) => {
                warn!(symbol, interval, error = %e, "kline fetch failed, serving stale cache if available");
                let now = Instant::now();
                self.kline_cache
                    .get(&key)
                    .filter(|e| now.saturating_duration_since(e.cached_at) <= STALE_WHILE_ERROR)
                    .map(|e| e.value.clone())
                    .unwrap_or_default()
            }
        }
    }

    // -------------------------------------------------------------------
    // Funding rate
    // -------------------------------------------------------------------

    pub async fn get_funding_rate(&self, symbol: &str) -> Option<f64> {
        let now = Instant::now();
        if let Some(ov) = self.funding_overrides.get(symbol) {
            if ov.is_live(now) {
                return Some(ov.value);
            }
        }

        if let Some(entry) = self.funding_cache.get(symbol) {
            if now < entry.expires_at {
                return Some(entry.value);
            }
        }

        if self.circuit_is_open("funding", now) {
            return self
                .funding_cache
                .get(symbol)
                .filter(|e| now.saturating_duration_since(e.cached_at) <= STALE_WHILE_ERROR)
                .map(|e| e.value);
        }

        let lock = self.lock_for(&format!("funding:{symbol}"));
        let _guard = lock.lock().await;

        if let Some(entry) = self.funding_cache.get(symbol) {
            if Instant::now() < entry.expires_at {
                return Some(entry.value);
            }
        }

        let sym = symbol.to_string();
        let result = self
            .with_retry("funding", || {
                let sym = sym.clone();
                async move {
                    self.funding_monitor
                        .fetch(&sym)
                        .await
                        .map_err(|e| GatewayError::new(ErrorKind::Network, "funding", e.to_string()))
                }
            })
            .await;

        match result {
            Ok(state) => {
                self.funding_cache.insert(
                    symbol.to_string(),
                    CacheEntry { value: state.rate, expires_at: Instant::now() + Duration::from_secs(300), cached_at: Instant::now() },
                );
                Some(state.rate)
            }
            Err(e) => {
                warn!(symbol, error = %e, "funding rate fetch failed, serving stale cache if available");
                let now = Instant::now();
                self.funding_cache
                    .get(symbol)
                    .filter(|e| now.saturating_duration_since(e.cached_at) <= STALE_WHILE_ERROR)
                    .map(|e| e.value)
            }
        }
    }

    // -------------------------------------------------------------------
    // Sentiment (Fear & Greed Index)
    // -------------------------------------------------------------------

    pub async fn get_sentiment_index(&self) -> Option<SentimentState> {
        let now = Instant::now();
        if let Some(ov) = self.sentiment_override.read().as_ref() {
            if ov.is_live(now) {
                return Some(ov.value.clone());
            }
        }

        if let Some(entry) = self.sentiment_cache.read().as_ref() {
            if now < entry.expires_at {
                return Some(entry.value.clone());
            }
        }

        if self.circuit_is_open("sentiment", now) {
            return self
                .sentiment_cache
                .read()
                .as_ref()
                .filter(|e| now.saturating_duration_since(e.cached_at) <= STALE_WHILE_ERROR)
                .map(|e| e.value.clone());
        }

        let lock = self.lock_for("sentiment");
        let _guard = lock.lock().await;

        if let Some(entry) = self.sentiment_cache.read().as_ref() {
            if Instant::now() < entry.expires_at {
                return Some(entry.value.clone());
            }
        }

        let result = self
            .with_retry("sentiment", || async {
                self.sentiment_monitor
                    .fetch()
                    .await
                    .map_err(|e| GatewayError::new(ErrorKind::Network, "sentiment", e.to_string()))
            })
            .await;

        match result {
            Ok(state) => {
                *self.sentiment_cache.write() = Some(CacheEntry {
                    value: state.clone(),
                    expires_at: Instant::now() + Duration::from_secs(300),
                    cached_at: Instant::now(),
                });
                Some(state)
            }
            Err(e) => {
                warn!(error = %e, "sentiment fetch failed, serving stale cache if available");
                let now = Instant::now();
                self.sentiment_cache
                    .read()
                    .as_ref()
                    .filter(|e| now.saturating_duration_since(e.cached_at) <= STALE_WHILE_ERROR)
                    .map(|e| e.value.clone())
            }
        }
    }

    // -------------------------------------------------------------------
    // Testing overrides
    // -------------------------------------------------------------------

    pub fn set_price_override(&self, symbol: &str, price: f64, ttl: Duration) -> Result<(), PermissionDenied> {
        if !self.allow_price_override {
            return Err(PermissionDenied);
        }
        self.price_overrides.insert(
            symbol.to_string(),
            OverrideValue { value: price, expires_at: Instant::now() + ttl },
        );
        info!(symbol, price, "price override set");
        Ok(())
    }

    pub fn clear_price_override(&self, symbol: Option<&str>) -> Result<(), PermissionDenied> {
        if !self.allow_price_override {
            return Err(PermissionDenied);
        }
        match symbol {
            Some(s) => { self.price_overrides.remove(s); }
            None => self.price_overrides.clear(),
        }
        Ok(())
    }

    pub fn set_funding_override(&self, symbol: &str, rate: f64, ttl: Duration) -> Result<(), PermissionDenied> {
        if !self.allow_funding_override {
            return Err(PermissionDenied);
        }
        self.funding_overrides.insert(
            symbol.to_string(),
            OverrideValue { value: rate, expires_at: Instant::now() + ttl },
        );
        Ok(())
    }

    pub fn clear_funding_override(&self, symbol: Option<&str>) -> Result<(), PermissionDenied> {
        if !self.allow_funding_override {
            return Err(PermissionDenied);
        }
        match symbol {
            Some(s) => { self.funding_overrides.remove(s); }
            None => self.funding_overrides.clear(),
        }
        Ok(())
    }

    pub fn set_sentiment_override(&self, state: SentimentState, ttl: Duration) -> Result<(), PermissionDenied> {
        if !self.allow_fgi_override {
            return Err(PermissionDenied);
        }
        *self.sentiment_override.write() = Some(OverrideValue { value: state, expires_at: Instant::now() + ttl });
        Ok(())
    }

    pub fn clear_sentiment_override(&self) -> Result<(), PermissionDenied> {
        if !self.allow_fgi_override {
            return Err(PermissionDenied);
        }
        *self.sentiment_override.write() = None;
        Ok(())
    }
}

fn ttl_for_interval(interval: &str) -> Duration {
    match interval {
        "1m" => Duration::from_secs(2),
        "5m" => Duration::from_secs(10),
        "15m" => Duration::from_secs(20),
        "1h" => Duration::from_secs(30),
        _ => Duration::from_secs(5),
    }
}
