// =============================================================================
// Cooldown & Rate Gate
// =============================================================================
//
// Stateful admission decision for would-be recommendation creations. All
// timestamps are monotonic (`tokio::time::Instant`) — cooldown math never
// touches wall-clock time, which can jump backwards under NTP correction.
// =============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::StrategyConfig;
use crate::types::{Admission, Direction};

/// A single admission request evaluated by [`CooldownGate::admit`].
pub struct AdmitRequest<'a> {
    pub symbol: &'a str,
    pub direction: Direction,
    pub confidence: f64,
    pub entry_price: f64,
    pub manual: bool,
    pub active_same_key: Option<f64>, // entry price of an existing active recommendation, if any
}

/// Tracks last-fire timestamps per `(symbol, direction, kind)` plus the
/// global and manual-trigger rate state. Keyed internally by a string hash
/// since `DashMap` needs `Hash + Eq` keys and symbols are short-lived &str.
pub struct CooldownGate {
    same_dir: DashMap<(String, Direction), Instant>,
    opposite: DashMap<(String, Direction), Instant>,
    global_last: Mutex<Option<Instant>>,
    manual_window: Mutex<VecDeque<Instant>>,
    manual_in_flight: Mutex<bool>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self {
            same_dir: DashMap::new(),
            opposite: DashMap::new(),
            global_last: Mutex::new(None),
            manual_window: Mutex::new(VecDeque::new()),
            manual_in_flight: Mutex::new(false),
        }
    }

    /// Acquire the single-flight manual-trigger lock. Returns `Deny` with a
    /// 1s retry hint if another manual trigger is already running.
    pub fn try_acquire_manual(&self) -> Admission {
        let mut in_flight = self.manual_in_flight.lock();
        if *in_flight {
            return Admission::Deny {
                reason: "manual trigger already in progress".to_string(),
                retry_after: Duration::from_secs(1),
            };
        }
        *in_flight = true;
        Admission::Admit
    }

    pub fn release_manual(&self) {
        *self.manual_in_flight.lock() = false;
    }

    /// Acquire the manual single-flight lock and, synchronously in the same
    /// call, check the manual-rate sliding window. Releases the lock again
    /// before returning `Deny` so a rate-limited caller doesn't leave the
    /// gate stuck busy.
    pub fn acquire_manual(&self, cfg: &StrategyConfig, now: Instant) -> Admission {
        if let Admission::Deny { reason, retry_after } = self.try_acquire_manual() {
            return Admission::Deny { reason, retry_after };
        }
        if let Some(deny) = self.check_manual_rate(cfg, now) {
            self.release_manual();
            return deny;
        }
        Admission::Admit
    }

    pub fn admit(&self, req: &AdmitRequest<'_>, cfg: &StrategyConfig, now: Instant) -> Admission {
        if req.manual {
            if let Some(deny) = self.check_manual_rate(cfg, now) {
                return deny;
            }
        }

        if let Some(last) = *self.global_last.lock() {
            let elapsed = now.saturating_duration_since(last);
            let min_interval = Duration::from_millis(cfg.global_min_interval_ms);
            if elapsed < min_interval {
                return Admission::Deny {
                    reason: "global minimum interval".to_string(),
                    retry_after: min_interval - elapsed,
                };
            }
        }

        let same_key = (req.symbol.to_string(), req.direction);
        if let Some(last) = self.same_dir.get(&same_key) {
            let elapsed = now.saturating_duration_since(*last);
            let window = Duration::from_millis(cfg.cooldown.same_dir.for_direction(req.direction));
            if elapsed < window {
                return Admission::Deny {
                    reason: "same-direction cooldown".to_string(),
                    retry_after: window - elapsed,
                };
            }
        }

        let opp_key = (req.symbol.to_string(), req.direction.opposite());
        if let Some(last) = self.opposite.get(&opp_key) {
            let elapsed = now.saturating_duration_since(*last);
            let window = Duration::from_millis(cfg.cooldown.opposite.for_direction(req.direction));
            let min_confidence = cfg.opposite_min_confidence_for(req.direction);
            if elapsed < window && req.confidence <= min_confidence {
                return Admission::Deny {
                    reason: "opposite-direction cooldown".to_string(),
                    retry_after: window - elapsed,
                };
            }
        }

        if let Some(existing_price) = req.active_same_key {
            let bps_diff = ((req.entry_price - existing_price).abs() / existing_price) * 10_000.0;
            if bps_diff <= cfg.duplicate_price_bps {
                return Admission::Deny {
                    reason: "duplicate recommendation window".to_string(),
                    retry_after: Duration::from_secs(cfg.duplicate_window_minutes * 60),
                };
            }
        }

        self.record_admission(req, now);
        Admission::Admit
    }

    fn check_manual_rate(&self, cfg: &StrategyConfig, now: Instant) -> Option<Admission> {
        let mut window = self.manual_window.lock();
        let cutoff = now.checked_sub(Duration::from_secs(60)).unwrap_or(now);
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
        if window.len() as u32 >= cfg.max_manual_triggers_per_min {
            return Some(Admission::Deny {
                reason: "manual trigger rate exceeded".to_string(),
                retry_after: Duration::from_secs(60),
            });
        }
        window.push_back(now);
        None
    }

    fn record_admission(&self, req: &AdmitRequest<'_>, now: Instant) {
        *self.global_last.lock() = Some(now);
        self.same_dir.insert((req.symbol.to_string(), req.direction), now);
        self.opposite.insert((req.symbol.to_string(), req.direction), now);
        debug!(symbol = req.symbol, direction = %req.direction, "recommendation admitted, cooldowns updated");
    }
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn cfg() -> StrategyConfig {
        RuntimeConfig::default().strategy
    }

    #[tokio::test(start_paused = true)]
    async fn global_min_interval_blocks_rapid_fire() {
        let gate = CooldownGate::new();
        let cfg = cfg();
        let now = Instant::now();

        let req = AdmitRequest {
            symbol: "BTCUSDT",
            direction: Direction::Long,
            confidence: 0.9,
            entry_price: 100.0,
            manual: false,
            active_same_key: None,
        };
        assert!(gate.admit(&req, &cfg, now).is_admit());

        let req2 = AdmitRequest { symbol: "ETHUSDT", ..req };
        match gate.admit(&req2, &cfg, now) {
            Admission::Deny { reason, .. } => assert_eq!(reason, "global minimum interval"),
            Admission::Admit => panic!("expected deny"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_direction_cooldown_blocks_repeat_signal() {
        let gate = CooldownGate::new();
        let mut cfg = cfg();
        cfg.global_min_interval_ms = 0;
        let now = Instant::now();

        let req = AdmitRequest {
            symbol: "BTCUSDT",
            direction: Direction::Long,
            confidence: 0.9,
            entry_price: 100.0,
            manual: false,
            active_same_key: None,
        };
        assert!(gate.admit(&req, &cfg, now).is_admit());
        assert!(!gate.admit(&req, &cfg, now).is_admit());

        let later = now + Duration::from_millis(cfg.cooldown.same_dir.for_direction(Direction::Long) + 1);
        assert!(gate.admit(&req, &cfg, later).is_admit());
    }

    #[tokio::test(start_paused = true)]
    async fn opposite_cooldown_allows_high_confidence_override() {
        let gate = CooldownGate::new();
        let mut cfg = cfg();
        cfg.global_min_interval_ms = 0;
        let now = Instant::now();

        let long_req = AdmitRequest {
            symbol: "BTCUSDT",
            direction: Direction::Long,
            confidence: 0.9,
            entry_price: 100.0,
            manual: false,
            active_same_key: None,
        };
        assert!(gate.admit(&long_req, &cfg, now).is_admit());

        let low_conf_short = AdmitRequest {
            symbol: "BTCUSDT",
            direction: Direction::Short,
            confidence: 0.5,
            entry_price: 100.0,
            manual: false,
            active_same_key: None,
        };
        assert!(!gate.admit(&low_conf_short, &cfg, now).is_admit());

        let high_conf_short = AdmitRequest { confidence: 0.99, ..low_conf_short };
        assert!(gate.admit(&high_conf_short, &cfg, now).is_admit());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_window_blocks_near_identical_entry() {
        let gate = CooldownGate::new();
        let mut cfg = cfg();
        cfg.global_min_interval_ms = 0;
        let now = Instant::now();

        let req = AdmitRequest {
            symbol: "BTCUSDT",
            direction: Direction::Long,
            confidence: 0.9,
            entry_price: 100.01,
            manual: false,
            active_same_key: Some(100.0),
        };
        match gate.admit(&req, &cfg, now) {
            Admission::Deny { reason, .. } => assert_eq!(reason, "duplicate recommendation window"),
            Admission::Admit => panic!("expected duplicate deny"),
        }
    }

    #[test]
    fn manual_single_flight_denies_concurrent_trigger() {
        let gate = CooldownGate::new();
        assert!(gate.try_acquire_manual().is_admit());
        assert!(!gate.try_acquire_manual().is_admit());
        gate.release_manual();
        assert!(gate.try_acquire_manual().is_admit());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_rate_limit_enforced_over_sliding_window() {
        let gate = CooldownGate::new();
        let mut cfg = cfg();
        cfg.global_min_interval_ms = 0;
        cfg.max_manual_triggers_per_min = 2;
        let now = Instant::now();

        let req = AdmitRequest {
            symbol: "BTCUSDT",
            direction: Direction::Long,
            confidence: 0.9,
            entry_price: 100.0,
            manual: true,
            active_same_key: None,
        };
        assert!(gate.admit(&req, &cfg, now).is_admit());
        let req2 = AdmitRequest { symbol: "ETHUSDT", ..req };
        assert!(gate.admit(&req2, &cfg, now).is_admit());
        let req3 = AdmitRequest { symbol: "SOLUSDT", ..req };
        assert!(!gate.admit(&req3, &cfg, now).is_admit());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_manual_denies_over_rate_window_and_releases_lock() {
        let gate = CooldownGate::new();
        let mut cfg = cfg();
        cfg.max_manual_triggers_per_min = 2;
        let now = Instant::now();

        assert!(gate.acquire_manual(&cfg, now).is_admit());
        gate.release_manual();
        assert!(gate.acquire_manual(&cfg, now).is_admit());
        gate.release_manual();

        // Third call within the same minute is denied by the rate window,
        // and the single-flight lock must not be left held afterward.
        match gate.acquire_manual(&cfg, now) {
            Admission::Deny { reason, .. } => assert_eq!(reason, "manual trigger rate exceeded"),
            Admission::Admit => panic!("expected manual-rate deny"),
        }
        assert!(gate.try_acquire_manual().is_admit());
        gate.release_manual();
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_manual_denies_while_single_flight_busy() {
        let gate = CooldownGate::new();
        let cfg = cfg();
        let now = Instant::now();

        assert!(gate.try_acquire_manual().is_admit());
        match gate.acquire_manual(&cfg, now) {
            Admission::Deny { reason, .. } => assert_eq!(reason, "manual trigger already in progress"),
            Admission::Admit => panic!("expected single-flight deny"),
        }
        gate.release_manual();
    }
}
