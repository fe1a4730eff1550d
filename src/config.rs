// =============================================================================
// Runtime Configuration — every tunable in §6, with atomic save and a
// validating partial-update path for POST /api/config
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry
// `#[serde(default = "...")]` so that adding new fields never breaks loading
// an older config file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::TradingMode;

// ---------------------------------------------------------------------------
// Default-value helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_signal_threshold() -> f64 {
    0.6
}
fn default_signal_cooldown_ms() -> u64 {
    60_000
}
fn default_opposite_cooldown_ms() -> u64 {
    120_000
}
fn default_global_min_interval_ms() -> u64 {
    5_000
}
fn default_max_manual_triggers_per_min() -> u32 {
    2
}
fn default_duplicate_window_minutes() -> u64 {
    15
}
fn default_duplicate_price_bps() -> f64 {
    10.0
}
fn default_opposite_min_confidence() -> f64 {
    0.75
}
fn default_min_combined_strength() -> f64 {
    0.5
}

fn default_max_position_size() -> f64 {
    1000.0
}
fn default_stop_loss_percent() -> f64 {
    1.0
}
fn default_max_same_direction_actives() -> u32 {
    3
}
fn default_net_exposure_caps() -> f64 {
    5000.0
}
fn default_hourly_order_caps() -> u32 {
    20
}

fn default_max_holding_hours() -> f64 {
    24.0
}
fn default_concurrency_count_age_hours() -> f64 {
    48.0
}
fn default_trailing_activate_profit_pct() -> f64 {
    1.0
}
fn default_trailing_percent() -> f64 {
    0.5
}

fn default_dedupe_window_ms() -> u64 {
    2_000
}
fn default_jitter_max_ms() -> u64 {
    500
}
fn default_snapshot_dir() -> String {
    "snapshots".to_string()
}

fn default_override_ttl_ms() -> u64 {
    60_000
}

fn default_commission() -> f64 {
    0.0004
}
fn default_slippage() -> f64 {
    0.0005
}

// ---------------------------------------------------------------------------
// strategy.cooldown.{sameDir,opposite}.{LONG,SHORT}
// ---------------------------------------------------------------------------

/// Per-direction millisecond value, used for both same-direction and
/// opposite-direction cooldowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionalMs {
    #[serde(default = "default_signal_cooldown_ms")]
    pub long: u64,
    #[serde(default = "default_signal_cooldown_ms")]
    pub short: u64,
}

impl Default for DirectionalMs {
    fn default() -> Self {
        Self {
            long: default_signal_cooldown_ms(),
            short: default_signal_cooldown_ms(),
        }
    }
}

impl DirectionalMs {
    pub fn for_direction(&self, dir: crate::types::Direction) -> u64 {
        match dir {
            crate::types::Direction::Long => self.long,
            crate::types::Direction::Short => self.short,
        }
    }
}

fn default_same_dir_ms() -> DirectionalMs {
    DirectionalMs { long: default_signal_cooldown_ms(), short: default_signal_cooldown_ms() }
}
fn default_opposite_dir_ms() -> DirectionalMs {
    DirectionalMs { long: default_opposite_cooldown_ms(), short: default_opposite_cooldown_ms() }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_same_dir_ms")]
    pub same_dir: DirectionalMs,
    #[serde(default = "default_opposite_dir_ms")]
    pub opposite: DirectionalMs,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self { same_dir: default_same_dir_ms(), opposite: default_opposite_dir_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryFiltersConfig {
    #[serde(default = "default_min_combined_strength")]
    pub min_combined_strength_long: f64,
    #[serde(default = "default_min_combined_strength")]
    pub min_combined_strength_short: f64,
    #[serde(default = "default_true")]
    pub enable_mtf: bool,
}

impl Default for EntryFiltersConfig {
    fn default() -> Self {
        Self {
            min_combined_strength_long: default_min_combined_strength(),
            min_combined_strength_short: default_min_combined_strength(),
            enable_mtf: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRegimeConfig {
    #[serde(default)]
    pub avoid_extreme_sentiment: bool,
    #[serde(default = "default_extreme_sentiment_low")]
    pub extreme_sentiment_low: f64,
    #[serde(default = "default_extreme_sentiment_high")]
    pub extreme_sentiment_high: f64,
    #[serde(default)]
    pub avoid_high_funding: bool,
    #[serde(default = "default_high_funding_abs")]
    pub high_funding_abs: f64,
}

fn default_extreme_sentiment_low() -> f64 {
    10.0
}
fn default_extreme_sentiment_high() -> f64 {
    90.0
}
fn default_high_funding_abs() -> f64 {
    0.05
}

impl Default for MarketRegimeConfig {
    fn default() -> Self {
        Self {
            avoid_extreme_sentiment: false,
            extreme_sentiment_low: default_extreme_sentiment_low(),
            extreme_sentiment_high: default_extreme_sentiment_high(),
            avoid_high_funding: false,
            high_funding_abs: default_high_funding_abs(),
        }
    }
}

/// The source conflates `evThreshold` as either a scalar or an object keyed
/// by volatility/regime. Decision recorded in DESIGN.md: when deserializing,
/// the object form takes precedence if present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvThreshold {
    ByRegime(HashMap<String, f64>),
    Scalar(f64),
}

impl Default for EvThreshold {
    fn default() -> Self {
        EvThreshold::Scalar(0.0)
    }
}

impl EvThreshold {
    /// Resolve the threshold to apply for `regime`, falling back to the
    /// scalar (or the regime map's own fallback) when no entry matches.
    pub fn resolve(&self, regime: &str) -> f64 {
        match self {
            EvThreshold::Scalar(v) => *v,
            EvThreshold::ByRegime(map) => map
                .get(regime)
                .copied()
                .or_else(|| map.get("default").copied())
                .unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_signal_threshold")]
    pub signal_threshold: f64,
    #[serde(default = "default_global_min_interval_ms")]
    pub global_min_interval_ms: u64,
    #[serde(default = "default_max_manual_triggers_per_min")]
    pub max_manual_triggers_per_min: u32,
    #[serde(default = "default_duplicate_window_minutes")]
    pub duplicate_window_minutes: u64,
    #[serde(default = "default_duplicate_price_bps")]
    pub duplicate_price_bps: f64,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub entry_filters: EntryFiltersConfig,
    #[serde(default)]
    pub market_regime: MarketRegimeConfig,
    #[serde(default = "default_opposite_min_confidence")]
    pub opposite_min_confidence: f64,
    #[serde(default)]
    pub opposite_min_confidence_by_direction: Option<DirectionalMsF64>,
    #[serde(default)]
    pub ev_threshold: EvThreshold,
}

/// Like `DirectionalMs` but for a confidence fraction rather than a
/// millisecond duration; named separately to keep wire shapes self-evident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionalMsF64 {
    pub long: f64,
    pub short: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            signal_threshold: default_signal_threshold(),
            global_min_interval_ms: default_global_min_interval_ms(),
            max_manual_triggers_per_min: default_max_manual_triggers_per_min(),
            duplicate_window_minutes: default_duplicate_window_minutes(),
            duplicate_price_bps: default_duplicate_price_bps(),
            cooldown: CooldownConfig::default(),
            entry_filters: EntryFiltersConfig::default(),
            market_regime: MarketRegimeConfig::default(),
            opposite_min_confidence: default_opposite_min_confidence(),
            opposite_min_confidence_by_direction: None,
            ev_threshold: EvThreshold::default(),
        }
    }
}

impl StrategyConfig {
    /// Opposite-direction confidence floor for `dir`, falling back to the
    /// scalar `opposite_min_confidence` when no per-direction override is set.
    pub fn opposite_min_confidence_for(&self, dir: crate::types::Direction) -> f64 {
        match (&self.opposite_min_confidence_by_direction, dir) {
            (Some(d), crate::types::Direction::Long) => d.long,
            (Some(d), crate::types::Direction::Short) => d.short,
            (None, _) => self.opposite_min_confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: f64,
    #[serde(default = "default_max_same_direction_actives")]
    pub max_same_direction_actives: u32,
    #[serde(default = "default_net_exposure_caps")]
    pub net_exposure_caps: f64,
    #[serde(default = "default_hourly_order_caps")]
    pub hourly_order_caps: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            stop_loss_percent: default_stop_loss_percent(),
            max_same_direction_actives: default_max_same_direction_actives(),
            net_exposure_caps: default_net_exposure_caps(),
            hourly_order_caps: default_hourly_order_caps(),
        }
    }
}

/// A profit band for the trailing stop's flex parameters: once cumulative
/// profit (in percent) reaches `min_profit_pct`, the trail distance used is
/// `percent`. Bands are evaluated highest-`min_profit_pct`-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlexBand {
    pub min_profit_pct: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub activate_on_breakeven: bool,
    #[serde(default = "default_trailing_activate_profit_pct")]
    pub activate_profit_pct: f64,
    #[serde(default = "default_trailing_percent")]
    pub percent: f64,
    #[serde(default)]
    pub flex_bands: Vec<FlexBand>,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            activate_on_breakeven: false,
            activate_profit_pct: default_trailing_activate_profit_pct(),
            percent: default_trailing_percent(),
            flex_bands: vec![
                FlexBand { min_profit_pct: 0.0, percent: default_trailing_percent() },
                FlexBand { min_profit_pct: 2.0, percent: 0.3 },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default = "default_max_holding_hours")]
    pub max_holding_hours: f64,
    #[serde(default = "default_concurrency_count_age_hours")]
    pub concurrency_count_age_hours: f64,
    #[serde(default)]
    pub trailing: TrailingConfig,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            max_holding_hours: default_max_holding_hours(),
            concurrency_count_age_hours: default_concurrency_count_age_hours(),
            trailing: TrailingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_true")]
    pub dedupe_enabled: bool,
    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: u64,
    #[serde(default = "default_true")]
    pub jitter_enabled: bool,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
    #[serde(default)]
    pub snapshot_enabled: bool,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            dedupe_enabled: true,
            dedupe_window_ms: default_dedupe_window_ms(),
            jitter_enabled: true,
            jitter_max_ms: default_jitter_max_ms(),
            snapshot_enabled: false,
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestingConfig {
    #[serde(default)]
    pub allow_price_override: bool,
    #[serde(default)]
    pub allow_fgi_override: bool,
    #[serde(default)]
    pub allow_funding_override: bool,
    #[serde(default = "default_override_ttl_ms")]
    pub price_default_ttl_ms: u64,
    #[serde(default = "default_override_ttl_ms")]
    pub fgi_default_ttl_ms: u64,
    #[serde(default = "default_override_ttl_ms")]
    pub funding_default_ttl_ms: u64,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            allow_price_override: false,
            allow_fgi_override: false,
            allow_funding_override: false,
            price_default_ttl_ms: default_override_ttl_ms(),
            fgi_default_ttl_ms: default_override_ttl_ms(),
            funding_default_ttl_ms: default_override_ttl_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub trading_mode: TradingMode,

    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub testing: TestingConfig,

    /// Fraction in [0,1); values >= 1 are reinterpreted as a percent and
    /// normalized with a warning (see `apply_partial_update`).
    #[serde(default = "default_commission")]
    pub commission: f64,
    #[serde(default = "default_slippage")]
    pub slippage: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::default(),
            symbols: default_symbols(),
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            recommendation: RecommendationConfig::default(),
            realtime: RealtimeConfig::default(),
            testing: TestingConfig::default(),
            commission: default_commission(),
            slippage: default_slippage(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            trading_mode = %config.trading_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename). Prevents corruption on crash.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply a partial JSON update (POST /api/config). Keys outside the
    /// allowlist below are silently ignored; in-range coercions and
    /// out-of-range rejections are reported as `warnings`. The update
    /// never errors — it always returns a config (possibly unchanged) plus
    /// warnings, per §6/§7.
    pub fn apply_partial_update(&mut self, patch: &serde_json::Value) -> Vec<String> {
        let mut warnings = Vec::new();
        let Some(obj) = patch.as_object() else {
            warnings.push("request body must be a JSON object; ignored".to_string());
            return warnings;
        };

        for (key, value) in obj {
            match key.as_str() {
                "trading_mode" => {
                    if let Some(s) = value.as_str() {
                        match s {
                            "Running" => self.trading_mode = TradingMode::Running,
                            "Paused" => self.trading_mode = TradingMode::Paused,
                            "Killed" => self.trading_mode = TradingMode::Killed,
                            other => warnings.push(format!("unknown trading_mode '{other}', ignored")),
                        }
                    }
                }
                "symbols" => {
                    if let Some(arr) = value.as_array() {
                        let symbols: Vec<String> = arr
                            .iter()
                            .filter_map(|v| v.as_str())
                            .map(|s| s.to_uppercase())
                            .collect();
                        if symbols.is_empty() {
                            warnings.push("symbols must be a non-empty array of strings, ignored".to_string());
                        } else {
                            self.symbols = symbols;
                        }
                    }
                }
                "commission" => {
                    if let Some(v) = value.as_f64() {
                        self.commission = normalize_fraction(v, "commission", &mut warnings);
                    }
                }
                "slippage" => {
                    if let Some(v) = value.as_f64() {
                        self.slippage = normalize_fraction(v, "slippage", &mut warnings);
                    }
                }
                "strategy.signalThreshold" => {
                    if let Some(v) = value.as_f64() {
                        self.strategy.signal_threshold = v;
                    }
                }
                "strategy.signalCooldownMs" => {
                    if let Some(v) = value.as_u64() {
                        self.strategy.cooldown.same_dir.long = v;
                        self.strategy.cooldown.same_dir.short = v;
                    }
                }
                "strategy.oppositeCooldownMs" => {
                    if let Some(v) = value.as_u64() {
                        self.strategy.cooldown.opposite.long = v;
                        self.strategy.cooldown.opposite.short = v;
                    }
                }
                "strategy.globalMinIntervalMs" => {
                    if let Some(v) = value.as_u64() {
                        self.strategy.global_min_interval_ms = v;
                    }
                }
                "strategy.maxManualTriggersPerMin" => {
                    if let Some(v) = value.as_u64() {
                        self.strategy.max_manual_triggers_per_min = v as u32;
                    }
                }
                "strategy.duplicateWindowMinutes" => {
                    if let Some(v) = value.as_u64() {
                        self.strategy.duplicate_window_minutes = v;
                    }
                }
                "strategy.duplicatePriceBps" => {
                    if let Some(v) = value.as_f64() {
                        self.strategy.duplicate_price_bps = v;
                    }
                }
                "realtime.dedupeEnabled" => {
                    if let Some(v) = value.as_bool() {
                        self.realtime.dedupe_enabled = v;
                    }
                }
                "realtime.dedupeWindowMs" => {
                    if let Some(v) = value.as_u64() {
                        self.realtime.dedupe_window_ms = v;
                    }
                }
                "realtime.jitterEnabled" => {
                    if let Some(v) = value.as_bool() {
                        self.realtime.jitter_enabled = v;
                    }
                }
                "realtime.jitterMaxMs" => {
                    if let Some(v) = value.as_u64() {
                        self.realtime.jitter_max_ms = v;
                    }
                }
                "realtime.snapshotEnabled" => {
                    if let Some(v) = value.as_bool() {
                        self.realtime.snapshot_enabled = v;
                    }
                }
                "recommendation.maxHoldingHours" => {
                    if let Some(v) = value.as_f64() {
                        self.recommendation.max_holding_hours = v;
                    }
                }
                "testing.allowPriceOverride" => {
                    if let Some(v) = value.as_bool() {
                        self.testing.allow_price_override = v;
                    }
                }
                "testing.allowFGIOverride" => {
                    if let Some(v) = value.as_bool() {
                        self.testing.allow_fgi_override = v;
                    }
                }
                "testing.allowFundingOverride" => {
                    if let Some(v) = value.as_bool() {
                        self.testing.allow_funding_override = v;
                    }
                }
                _ => {
                    // Outside the allowlist: silently ignored per §6.
                }
            }
        }

        warnings
    }
}

fn normalize_fraction(value: f64, field: &str, warnings: &mut Vec<String>) -> f64 {
    if value >= 1.0 {
        let normalized = value / 100.0;
        warnings.push(format!(
            "{field}={value} interpreted as a percent and normalized to {normalized}"
        ));
        normalized
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.symbols[0], "BTCUSDT");
        assert!(cfg.realtime.dedupe_enabled);
        assert!(cfg.realtime.jitter_enabled);
        assert!(!cfg.testing.allow_price_override);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.strategy.max_manual_triggers_per_min, 2);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Running", "symbols": ["ETHUSDT"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Running);
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.risk.max_same_direction_actives, 3);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
    }

    #[test]
    fn ev_threshold_prefers_object_form() {
        let json = r#"{"a": 1.0, "default": 0.5}"#;
        let thr: EvThreshold = serde_json::from_str(json).unwrap();
        assert!(matches!(thr, EvThreshold::ByRegime(_)));
        assert_eq!(thr.resolve("a"), 1.0);
        assert_eq!(thr.resolve("missing"), 0.5);
    }

    #[test]
    fn ev_threshold_scalar_form() {
        let thr: EvThreshold = serde_json::from_str("0.42").unwrap();
        assert_eq!(thr.resolve("anything"), 0.42);
    }

    #[test]
    fn commission_ge_one_is_normalized_with_warning() {
        let mut cfg = RuntimeConfig::default();
        let patch = serde_json::json!({ "commission": 5.0 });
        let warnings = cfg.apply_partial_update(&patch);
        assert!((cfg.commission - 0.05).abs() < f64::EPSILON);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unknown_key_is_noop_and_idempotent() {
        let mut cfg = RuntimeConfig::default();
        let patch = serde_json::json!({ "totally.unknown.key": 123 });
        let before = serde_json::to_string(&cfg).unwrap();
        let warnings = cfg.apply_partial_update(&patch);
        let after = serde_json::to_string(&cfg).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(before, after);

        // Applying twice yields identical state.
        cfg.apply_partial_update(&patch);
        let after2 = serde_json::to_string(&cfg).unwrap();
        assert_eq!(after, after2);
    }

    #[test]
    fn known_key_update_is_idempotent() {
        let mut cfg = RuntimeConfig::default();
        let patch = serde_json::json!({ "strategy.signalThreshold": 0.8 });
        cfg.apply_partial_update(&patch);
        let once = serde_json::to_string(&cfg).unwrap();
        cfg.apply_partial_update(&patch);
        let twice = serde_json::to_string(&cfg).unwrap();
        assert_eq!(once, twice);
        assert_eq!(cfg.strategy.signal_threshold, 0.8);
    }

    #[test]
    fn signal_cooldown_ms_key_updates_directional_cooldown() {
        let mut cfg = RuntimeConfig::default();
        let patch = serde_json::json!({ "strategy.signalCooldownMs": 45_000, "strategy.oppositeCooldownMs": 90_000 });
        cfg.apply_partial_update(&patch);
        assert_eq!(cfg.strategy.cooldown.same_dir.long, 45_000);
        assert_eq!(cfg.strategy.cooldown.same_dir.short, 45_000);
        assert_eq!(cfg.strategy.cooldown.opposite.long, 90_000);
        assert_eq!(cfg.strategy.cooldown.opposite.short, 90_000);
    }

    #[test]
    fn cooldown_defaults_differ_for_same_dir_and_opposite() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.strategy.cooldown.same_dir.long, 60_000);
        assert_eq!(cfg.strategy.cooldown.opposite.long, 120_000);
    }

    #[test]
    fn opposite_min_confidence_falls_back_to_scalar() {
        let cfg = RuntimeConfig::default();
        assert_eq!(
            cfg.strategy.opposite_min_confidence_for(crate::types::Direction::Long),
            cfg.strategy.opposite_min_confidence
        );
    }
}
