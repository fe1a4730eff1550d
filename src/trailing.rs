// =============================================================================
// Trailing Stop — ratcheting exit generalized from phased profit bands
// =============================================================================
//
// Config-driven flex-band model: the trail distance (as a percent of the
// favorable extreme) is selected by the current profit band rather than a
// hardcoded ATR multiplier ladder.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::config::TrailingConfig;
use crate::types::Direction;

/// Per-recommendation trailing state. `best_price` is the most favorable
/// price observed since activation (or entry, pre-activation); `trail_price`
/// is the ratcheted stop level once armed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrailingState {
    pub best_price: f64,
    pub trail_price: Option<f64>,
    pub activated: bool,
}

impl Default for TrailingState {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl TrailingState {
    pub fn new(entry_price: f64) -> Self {
        Self {
            best_price: entry_price,
            trail_price: None,
            activated: false,
        }
    }

    /// Pick the flex band whose `min_profit_pct` is the largest one not
    /// exceeding `profit_pct`. Bands are expected sorted ascending by
    /// `min_profit_pct`; falls back to `cfg.percent` if no band qualifies.
    fn percent_for_profit(cfg: &TrailingConfig, profit_pct: f64) -> f64 {
        cfg.flex_bands
            .iter()
            .filter(|b| profit_pct >= b.min_profit_pct)
            .max_by(|a, b| a.min_profit_pct.total_cmp(&b.min_profit_pct))
            .map(|b| b.percent)
            .unwrap_or(cfg.percent)
    }

    /// Advance trailing state with a new price observation. Returns `true`
    /// once the trail has been breached (caller closes with `exit_reason=TRAIL`).
    pub fn update(&mut self, direction: Direction, entry_price: f64, current_price: f64, cfg: &TrailingConfig) -> bool {
        if !cfg.enabled {
            return false;
        }

        let profit_pct = match direction {
            Direction::Long => (current_price - entry_price) / entry_price * 100.0,
            Direction::Short => (entry_price - current_price) / entry_price * 100.0,
        };

        if !self.activated {
            let should_activate = (cfg.activate_on_breakeven && profit_pct >= 0.0) || profit_pct >= cfg.activate_profit_pct;
            if !should_activate {
                return false;
            }
            self.activated = true;
            self.best_price = current_price;
        }

        let favorable = match direction {
            Direction::Long => current_price > self.best_price,
            Direction::Short => current_price < self.best_price,
        };
        if favorable {
            self.best_price = current_price;
        }

        let percent = Self::percent_for_profit(cfg, profit_pct);
        let trail = match direction {
            Direction::Long => self.best_price * (1.0 - percent / 100.0),
            Direction::Short => self.best_price * (1.0 + percent / 100.0),
        };
        self.trail_price = Some(trail);

        match direction {
            Direction::Long => current_price <= trail,
            Direction::Short => current_price >= trail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlexBand;

    fn cfg() -> TrailingConfig {
        TrailingConfig {
            enabled: true,
            activate_on_breakeven: false,
            activate_profit_pct: 1.0,
            percent: 0.5,
            flex_bands: vec![
                FlexBand { min_profit_pct: 0.0, percent: 0.5 },
                FlexBand { min_profit_pct: 2.0, percent: 0.3 },
            ],
        }
    }

    #[test]
    fn does_not_activate_before_threshold() {
        let mut state = TrailingState::new(100.0);
        let hit = state.update(Direction::Long, 100.0, 100.5, &cfg());
        assert!(!hit);
        assert!(!state.activated);
    }

    #[test]
    fn activates_and_ratchets_with_profit() {
        let mut state = TrailingState::new(100.0);
        state.update(Direction::Long, 100.0, 101.5, &cfg());
        assert!(state.activated);
        assert_eq!(state.best_price, 101.5);

        state.update(Direction::Long, 100.0, 103.0, &cfg());
        assert_eq!(state.best_price, 103.0);
    }

    #[test]
    fn breach_triggers_close_long() {
        let mut state = TrailingState::new(100.0);
        state.update(Direction::Long, 100.0, 103.0, &cfg());
        let trail = state.trail_price.unwrap();
        let hit = state.update(Direction::Long, 100.0, trail - 0.01, &cfg());
        assert!(hit);
    }

    #[test]
    fn breach_triggers_close_short() {
        let mut state = TrailingState::new(100.0);
        state.update(Direction::Short, 100.0, 97.0, &cfg());
        assert!(state.activated);
        let trail = state.trail_price.unwrap();
        let hit = state.update(Direction::Short, 100.0, trail + 0.01, &cfg());
        assert!(hit);
    }

    #[test]
    fn activate_on_breakeven_arms_immediately() {
        let mut band_cfg = cfg();
        band_cfg.activate_on_breakeven = true;
        let mut state = TrailingState::new(100.0);
        state.update(Direction::Long, 100.0, 100.01, &band_cfg);
        assert!(state.activated);
    }

    #[test]
    fn disabled_never_triggers() {
        let mut band_cfg = cfg();
        band_cfg.enabled = false;
        let mut state = TrailingState::new(100.0);
        let hit = state.update(Direction::Long, 100.0, 50.0, &band_cfg);
        assert!(!hit);
    }
}
