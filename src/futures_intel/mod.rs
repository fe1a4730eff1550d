// =============================================================================
// Futures Intelligence Module
// =============================================================================
//
// Funding rate is the one Binance Futures data source this service still
// consumes — a contrarian signal (extreme funding predicts reversal) folded
// into C2's `get_funding_rate`.
// =============================================================================

pub mod funding_rate;

pub use funding_rate::{FundingRateMonitor, FundingState};
