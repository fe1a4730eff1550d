// =============================================================================
// Recommendation — central entity of the tracker (C5)
// =============================================================================
//
// Adapted from a position/position-manager model to a recommendation model:
// no order is ever placed, but the lifecycle bookkeeping — entry/exit
// prices, PnL, trailing state, open/closed partitioning — follows the same
// shape an executed-trade position would.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::trailing::TrailingState;
use crate::types::{Direction, ExitReason, RecommendationStatus, TradeResult};

/// Coerces direction aliases seen from external callers (`BUY`/`SELL`,
/// case-insensitive) to the canonical `Direction`. Returns `None` for
/// anything else, which the ingest path treats as an invariant violation.
pub fn normalize_direction(raw: &str) -> Option<Direction> {
    match raw.to_ascii_uppercase().as_str() {
        "LONG" | "BUY" => Some(Direction::Long),
        "SHORT" | "SELL" => Some(Direction::Short),
        _ => None,
    }
}

/// A raw candidate signal as produced by the strategy engine, before
/// normalization and gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub symbol: String,
    pub direction: String,
    pub entry_price: f64,
    pub confidence_score: f64,
    pub take_profit_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub leverage: f64,
    pub position_size: Option<f64>,
    pub strategy_type: Option<String>,
    pub source: Option<String>,
}

/// Bucket `created_at` to a 5-second window and fold in the rounded price
/// legs, matching the dedupe key described for C5 ingest.
pub fn dedupe_key(created_at: DateTime<Utc>, symbol: &str, direction: Direction, entry_price: f64, tp: Option<f64>, sl: Option<f64>) -> String {
    let bucket = created_at.timestamp() / 5;
    format!(
        "{bucket}:{symbol}:{direction}:{:.2}:{:.2}:{:.2}",
        entry_price,
        tp.unwrap_or(0.0),
        sl.unwrap_or(0.0)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub symbol: String,
    pub direction: Direction,

    pub entry_price: f64,
    pub leverage: f64,
    pub take_profit_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub confidence_score: f64,
    pub position_size: Option<f64>,
    pub strategy_type: Option<String>,
    pub source: Option<String>,

    pub status: RecommendationStatus,
    pub current_price: f64,

    pub result: Option<TradeResult>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub pnl_amount: Option<f64>,
    pub pnl_percent: Option<f64>,

    #[serde(default)]
    pub trailing: TrailingState,
}

/// Validation failure for a would-be recommendation. Carries a human-readable
/// reason; the ingest path drops the candidate and logs rather than surfacing
/// this to callers as anything other than a no-op.
#[derive(Debug, Clone)]
pub struct InvariantViolation(pub String);

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Recommendation {
    pub fn new(
        symbol: String,
        direction: Direction,
        entry_price: f64,
        leverage: f64,
        take_profit_price: Option<f64>,
        stop_loss_price: Option<f64>,
        confidence_score: f64,
        position_size: Option<f64>,
        strategy_type: Option<String>,
        source: Option<String>,
    ) -> Result<Self, InvariantViolation> {
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(InvariantViolation("entry_price must be finite and positive".into()));
        }
        if !confidence_score.is_finite() || !(0.0..=1.0).contains(&confidence_score) {
            return Err(InvariantViolation("confidence_score must be in [0,1]".into()));
        }
        if let (Some(tp), Some(sl)) = (take_profit_price, stop_loss_price) {
            let ordered_ok = match direction {
                Direction::Long => sl < entry_price && entry_price < tp,
                Direction::Short => tp < entry_price && entry_price < sl,
            };
            if !ordered_ok {
                return Err(InvariantViolation(format!(
                    "{direction} recommendation has inconsistent entry/tp/sl ordering (entry={entry_price}, tp={tp}, sl={sl})"
                )));
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            symbol,
            direction,
            entry_price,
            leverage,
            take_profit_price,
            stop_loss_price,
            confidence_score,
            position_size,
            strategy_type,
            source,
            status: RecommendationStatus::Active,
            current_price: entry_price,
            result: None,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            pnl_amount: None,
            pnl_percent: None,
            trailing: TrailingState::new(entry_price),
        })
    }

    pub fn dedupe_key(&self) -> String {
        dedupe_key(self.created_at, &self.symbol, self.direction, self.entry_price, self.take_profit_price, self.stop_loss_price)
    }

    pub fn close(&mut self, exit_price: f64, exit_reason: ExitReason, now: DateTime<Utc>) {
        let direction_sign = match self.direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        };
        let pnl_percent = direction_sign * (exit_price - self.entry_price) / self.entry_price * 100.0;
        let leveraged_pct = pnl_percent * self.leverage;
        let pnl_amount = self.position_size.unwrap_or(0.0) * leveraged_pct / 100.0;

        // Stop-loss and take-profit exits are deterministic by construction
        // (the barrier was crossed, full stop); only a timeout exit can land
        // close enough to entry to be a genuine breakeven.
        const EPSILON_PCT: f64 = 0.01;
        let result = match exit_reason {
            ExitReason::StopLoss => TradeResult::Loss,
            ExitReason::TakeProfit => TradeResult::Win,
            ExitReason::Timeout => {
                if pnl_percent.abs() <= EPSILON_PCT {
                    TradeResult::Breakeven
                } else if pnl_percent > 0.0 {
                    TradeResult::Win
                } else {
                    TradeResult::Loss
                }
            }
            ExitReason::Trailing => {
                if pnl_percent > 0.0 {
                    TradeResult::Win
                } else {
                    TradeResult::Loss
                }
            }
        };

        self.status = RecommendationStatus::Closed;
        self.current_price = exit_price;
        self.exit_price = Some(exit_price);
        self.exit_time = Some(now);
        self.exit_reason = Some(exit_reason);
        self.result = Some(result);
        self.pnl_percent = Some(leveraged_pct);
        self.pnl_amount = Some(pnl_amount);
        self.updated_at = now;
    }

    pub fn is_active(&self) -> bool {
        self.status == RecommendationStatus::Active
    }
}

/// Aggregate counters maintained alongside the store, exposed to C7's
/// statistics endpoints.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub wins: u64,
    pub losses: u64,
    pub breakevens: u64,
    pub cumulative_pnl: f64,
    pub peak_cumulative_pnl: f64,
    pub max_drawdown: f64,
}

impl Statistics {
    fn record_close(&mut self, result: TradeResult, pnl_amount: f64) {
        match result {
            TradeResult::Win => self.wins += 1,
            TradeResult::Loss => self.losses += 1,
            TradeResult::Breakeven => self.breakevens += 1,
        }
        self.cumulative_pnl += pnl_amount;
        if self.cumulative_pnl > self.peak_cumulative_pnl {
            self.peak_cumulative_pnl = self.cumulative_pnl;
        }
        let drawdown = self.peak_cumulative_pnl - self.cumulative_pnl;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
    }

    pub fn win_rate(&self) -> f64 {
        let closed = self.wins + self.losses + self.breakevens;
        if closed == 0 {
            0.0
        } else {
            self.wins as f64 / closed as f64
        }
    }
}

/// The recommendation store. Exclusive access is per-id (`RwLock` inside the
/// `DashMap` entry); the evaluation loop may walk distinct ids concurrently
/// but never touches the same id from two tasks at once.
pub struct RecommendationStore {
    entries: DashMap<Uuid, RwLock<Recommendation>>,
    stats: RwLock<Statistics>,
}

impl RecommendationStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            stats: RwLock::new(Statistics::default()),
        }
    }

    pub fn insert(&self, reco: Recommendation) -> Uuid {
        let id = reco.id;
        self.entries.insert(id, RwLock::new(reco));
        id
    }

    pub fn get_snapshot(&self, id: Uuid) -> Option<Recommendation> {
        self.entries.get(&id).map(|entry| entry.read().clone())
    }

    /// Active recommendations matching `(symbol, direction)`, used for the
    /// duplicate-window and concurrency-count gates.
    pub fn active_for(&self, symbol: &str, direction: Direction) -> Vec<Recommendation> {
        self.entries
            .iter()
            .filter_map(|e| {
                let r = e.value().read();
                (r.is_active() && r.symbol == symbol && r.direction == direction).then(|| r.clone())
            })
            .collect()
    }

    pub fn active_count_for_direction(&self, direction: Direction) -> usize {
        self.entries.iter().filter(|e| {
            let r = e.value().read();
            r.is_active() && r.direction == direction
        }).count()
    }

    pub fn list_active(&self) -> Vec<Recommendation> {
        self.entries
            .iter()
            .filter_map(|e| {
                let r = e.value().read();
                r.is_active().then(|| r.clone())
            })
            .collect()
    }

    pub fn list_history(&self, limit: usize) -> Vec<Recommendation> {
        let mut closed: Vec<Recommendation> = self
            .entries
            .iter()
            .filter_map(|e| {
                let r = e.value().read();
                (!r.is_active()).then(|| r.clone())
            })
            .collect();
        closed.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        closed.truncate(limit);
        closed
    }

    /// Apply `f` to the recommendation under its own lock, without holding
    /// any store-wide lock across the mutation. Returns `None` if `id` is
    /// absent (e.g. pruned concurrently).
    pub fn with_mut<R>(&self, id: Uuid, f: impl FnOnce(&mut Recommendation) -> R) -> Option<R> {
        let entry = self.entries.get(&id)?;
        let mut guard = entry.write();
        Some(f(&mut guard))
    }

    pub fn record_close(&self, result: TradeResult, pnl_amount: f64) {
        self.stats.write().record_close(result, pnl_amount);
    }

    pub fn statistics(&self) -> Statistics {
        self.stats.read().clone()
    }

    /// Drop closed recommendations older than `max_age_hours`, keeping
    /// statistics intact (they were already folded in at close time).
    pub fn prune_closed_older_than(&self, max_age_hours: f64, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::milliseconds((max_age_hours * 3_600_000.0) as i64);
        let stale: Vec<Uuid> = self
            .entries
            .iter()
            .filter_map(|e| {
                let r = e.value().read();
                (!r.is_active() && r.exit_time.is_some_and(|t| t < cutoff)).then(|| *e.key())
            })
            .collect();
        let count = stale.len();
        for id in stale {
            self.entries.remove(&id);
        }
        count
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Persist every recommendation plus aggregate statistics, using the
    /// same atomic tmp-file-then-rename pattern as `RuntimeConfig::save`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = StoreSnapshot {
            recommendations: self.entries.iter().map(|e| e.value().read().clone()).collect(),
            statistics: self.statistics(),
        };

        let content = serde_json::to_string_pretty(&snapshot).context("failed to serialise recommendation store to JSON")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content).with_context(|| format!("failed to write tmp recommendation snapshot to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path).with_context(|| format!("failed to rename tmp recommendation snapshot to {}", path.display()))?;

        info!(path = %path.display(), count = snapshot.recommendations.len(), "recommendation store saved (atomic)");
        Ok(())
    }

    /// Load a previously-saved store, restoring both entries and statistics.
    /// Returns an empty store if `path` does not exist — this is the normal
    /// cold-start case, not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path).with_context(|| format!("failed to read recommendation snapshot from {}", path.display()))?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content).with_context(|| format!("failed to parse recommendation snapshot from {}", path.display()))?;

        let store = Self::new();
        for reco in snapshot.recommendations {
            store.entries.insert(reco.id, RwLock::new(reco));
        }
        *store.stats.write() = snapshot.statistics;

        info!(path = %path.display(), count = store.entries.len(), "recommendation store loaded");
        Ok(store)
    }
}

/// On-disk shape for `RecommendationStore::save`/`load`.
#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    recommendations: Vec<Recommendation>,
    statistics: Statistics,
}

impl Default for RecommendationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_direction_coerces_aliases() {
        assert_eq!(normalize_direction("buy"), Some(Direction::Long));
        assert_eq!(normalize_direction("SELL"), Some(Direction::Short));
        assert_eq!(normalize_direction("long"), Some(Direction::Long));
        assert_eq!(normalize_direction("garbage"), None);
    }

    #[test]
    fn rejects_inverted_long_levels() {
        let err = Recommendation::new(
            "BTCUSDT".into(), Direction::Long, 100.0, 1.0,
            Some(90.0), Some(110.0), 0.8, None, None, None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn accepts_ordered_short_levels() {
        let reco = Recommendation::new(
            "BTCUSDT".into(), Direction::Short, 100.0, 1.0,
            Some(90.0), Some(110.0), 0.8, None, None, None,
        ).unwrap();
        assert_eq!(reco.status, RecommendationStatus::Active);
    }

    #[test]
    fn rejects_non_finite_confidence() {
        let err = Recommendation::new(
            "BTCUSDT".into(), Direction::Long, 100.0, 1.0,
            None, None, 1.5, None, None, None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn close_computes_win_for_favorable_long_exit() {
        let mut reco = Recommendation::new(
            "BTCUSDT".into(), Direction::Long, 100.0, 1.0,
            Some(110.0), Some(90.0), 0.8, Some(1000.0), None, None,
        ).unwrap();
        reco.close(105.0, ExitReason::TakeProfit, Utc::now());
        assert_eq!(reco.result, Some(TradeResult::Win));
        assert_eq!(reco.status, RecommendationStatus::Closed);
    }

    #[test]
    fn close_computes_loss_for_adverse_short_exit() {
        let mut reco = Recommendation::new(
            "BTCUSDT".into(), Direction::Short, 100.0, 1.0,
            Some(90.0), Some(110.0), 0.8, Some(1000.0), None, None,
        ).unwrap();
        reco.close(108.0, ExitReason::StopLoss, Utc::now());
        assert_eq!(reco.result, Some(TradeResult::Loss));
    }

    #[test]
    fn stop_loss_exit_is_deterministic_loss_even_within_epsilon() {
        // A stop-loss exit this close to entry would fall inside the
        // breakeven epsilon if treated like a timeout; it must still be a
        // loss since the barrier itself was crossed.
        let mut reco = Recommendation::new(
            "BTCUSDT".into(), Direction::Long, 100.0, 1.0,
            Some(110.0), Some(99.995), 0.8, Some(1000.0), None, None,
        ).unwrap();
        reco.close(99.995, ExitReason::StopLoss, Utc::now());
        assert_eq!(reco.result, Some(TradeResult::Loss));
    }

    #[test]
    fn timeout_exit_within_epsilon_is_breakeven() {
        let mut reco = Recommendation::new(
            "BTCUSDT".into(), Direction::Long, 100.0, 1.0,
            Some(110.0), Some(90.0), 0.8, Some(1000.0), None, None,
        ).unwrap();
        reco.close(100.005, ExitReason::Timeout, Utc::now());
        assert_eq!(reco.result, Some(TradeResult::Breakeven));
    }

    #[test]
    fn store_tracks_active_and_history_separately() {
        let store = RecommendationStore::new();
        let reco = Recommendation::new(
            "BTCUSDT".into(), Direction::Long, 100.0, 1.0,
            Some(110.0), Some(90.0), 0.8, Some(100.0), None, None,
        ).unwrap();
        let id = store.insert(reco);
        assert_eq!(store.list_active().len(), 1);
        assert_eq!(store.list_history(10).len(), 0);

        store.with_mut(id, |r| r.close(105.0, ExitReason::TakeProfit, Utc::now()));
        assert_eq!(store.list_active().len(), 0);
        assert_eq!(store.list_history(10).len(), 1);
    }

    #[test]
    fn statistics_track_win_rate_and_drawdown() {
        let store = RecommendationStore::new();
        store.record_close(TradeResult::Win, 100.0);
        store.record_close(TradeResult::Loss, -40.0);
        let stats = store.statistics();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert!((stats.win_rate() - 0.5).abs() < 1e-9);
        assert!((stats.max_drawdown - 40.0).abs() < 1e-9);
    }

    #[test]
    fn save_and_load_roundtrips_entries_and_statistics() {
        let store = RecommendationStore::new();
        let reco = Recommendation::new(
            "BTCUSDT".into(), Direction::Long, 100.0, 1.0,
            Some(110.0), Some(90.0), 0.8, Some(100.0), None, None,
        ).unwrap();
        store.insert(reco);
        store.record_close(TradeResult::Win, 50.0);

        let path = std::env::temp_dir().join(format!("aurora_reco_store_test_{}.json", std::process::id()));
        store.save(&path).unwrap();

        let loaded = RecommendationStore::load(&path).unwrap();
        assert_eq!(loaded.list_active().len(), store.list_active().len());
        assert_eq!(loaded.statistics().wins, store.statistics().wins);
        assert!((loaded.statistics().max_drawdown - store.statistics().max_drawdown).abs() < 1e-9);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_missing_path_returns_empty_store() {
        let path = std::env::temp_dir().join(format!("aurora_reco_store_missing_{}.json", std::process::id()));
        std::fs::remove_file(&path).ok();
        let store = RecommendationStore::load(&path).unwrap();
        assert!(store.list_active().is_empty());
        assert!(store.list_history(10).is_empty());
    }
}
