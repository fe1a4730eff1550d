// =============================================================================
// Shared domain enums
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction. Aliases `BUY`/`SELL` are coerced to this at C5 ingest
/// (see `recommendation::normalize_direction`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Recommendation lifecycle state (§3). `Pending` exists only for the
/// instant between ingest validation and gate admission — a recommendation
/// that clears every gate moves straight to `Active`, and one that is
/// rejected is never persisted, so `Pending` is never observed outside the
/// ingest call itself. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationStatus {
    Pending,
    Active,
    Closed,
    Expired,
}

impl std::fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Why a recommendation closed (§4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Trailing,
    Timeout,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "SL"),
            Self::TakeProfit => write!(f, "TP"),
            Self::Trailing => write!(f, "TRAIL"),
            Self::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Resolution of a closed recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeResult {
    Win,
    Loss,
    Breakeven,
}

impl std::fmt::Display for TradeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Win => write!(f, "WIN"),
            Self::Loss => write!(f, "LOSS"),
            Self::Breakeven => write!(f, "BREAKEVEN"),
        }
    }
}

/// Outcome of a C3 admission decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admit,
    Deny {
        reason: String,
        retry_after: std::time::Duration,
    },
}

impl Admission {
    pub fn is_admit(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// Engine-wide safety switch, kept distinct from recommendation lifecycle.
/// `Paused` stops new strategy invocations; it does not stop the evaluation
/// loop from closing recommendations already open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Running,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        TradingMode::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_opposite_round_trips() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.opposite().opposite(), Direction::Short);
    }

    #[test]
    fn display_matches_wire_format() {
        assert_eq!(Direction::Long.to_string(), "LONG");
        assert_eq!(RecommendationStatus::Active.to_string(), "ACTIVE");
        assert_eq!(ExitReason::StopLoss.to_string(), "SL");
        assert_eq!(TradeResult::Breakeven.to_string(), "BREAKEVEN");
    }

    #[test]
    fn trading_mode_defaults_paused() {
        assert_eq!(TradingMode::default(), TradingMode::Paused);
    }
}
