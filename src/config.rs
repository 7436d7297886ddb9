//! Engine configuration — hot-reloadable tunables with atomic save.
//!
//! Every field carries `#[serde(default = "...")]` so that adding a new
//! field never breaks loading an older config file, mirroring the
//! teacher's `RuntimeConfig` persistence pattern.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ConfigError;
use crate::units::{Bps, QuoteAmount};

fn default_max_age_ms() -> u64 {
    5_000
}
fn default_funding_max_age_ms() -> u64 {
    120_000
}
fn default_reconcile_interval_ms() -> u64 {
    60_000
}
fn default_evaluator_tick_ms() -> u64 {
    2_000
}
fn default_tolerance_size_bps() -> i64 {
    25
}
fn default_tolerance_balance_bps() -> i64 {
    50
}
fn default_critical_magnitude_bps() -> i64 {
    500
}
fn default_max_leverage_bps() -> i64 {
    30_000
}
fn default_max_position_size_quote() -> i128 {
    10_000 * crate::units::SCALE
}
fn default_max_margin_utilization_bps() -> i64 {
    9_000
}
fn default_max_daily_loss_quote() -> i128 {
    1_000 * crate::units::SCALE
}
fn default_max_drawdown_bps() -> i64 {
    2_000
}
fn default_min_liquidation_buffer_bps() -> i64 {
    200
}
fn default_exit_liquidation_buffer_bps() -> i64 {
    500
}
fn default_warning_leverage_bps() -> i64 {
    24_000
}
fn default_warning_margin_utilization_bps() -> i64 {
    7_500
}
fn default_warning_drawdown_bps() -> i64 {
    1_000
}
fn default_warning_liquidation_buffer_bps() -> i64 {
    1_000
}
fn default_min_funding_rate_bps() -> i64 {
    10
}
fn default_min_predicted_rate_bps() -> i64 {
    5
}
fn default_exit_funding_rate_bps() -> i64 {
    3
}
fn default_target_yield_bps() -> i64 {
    18
}
fn default_trend_window() -> usize {
    24
}
fn default_volatility_threshold_bps() -> i64 {
    5
}
fn default_trend_dead_band_bps() -> i64 {
    5
}
fn default_slippage_guard_bps() -> i64 {
    15
}
fn default_hedge_drift_tolerance_bps() -> i64 {
    50
}
fn default_ack_timeout_ms() -> u64 {
    5_000
}
fn default_fill_timeout_ms() -> u64 {
    30_000
}
fn default_max_partial_fill_retries() -> u32 {
    3
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_backoff_ms() -> u64 {
    200
}
fn default_max_backoff_ms() -> u64 {
    10_000
}
fn default_failure_threshold() -> usize {
    5
}
fn default_execution_failure_threshold() -> usize {
    2
}
fn default_success_threshold() -> usize {
    2
}
fn default_breaker_timeout_ms() -> u64 {
    30_000
}
fn default_token_bucket_capacity() -> u32 {
    1_000
}
fn default_token_bucket_refill_per_sec() -> u32 {
    100
}
fn default_token_wait_timeout_ms() -> u64 {
    2_000
}

/// Freshness thresholds for each data stream feeding the Health Monitor
/// (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    #[serde(default = "default_max_age_ms")]
    pub ws_max_age_ms: u64,
    #[serde(default = "default_max_age_ms")]
    pub rest_max_age_ms: u64,
    #[serde(default = "default_funding_max_age_ms")]
    pub funding_feed_max_age_ms: u64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            ws_max_age_ms: default_max_age_ms(),
            rest_max_age_ms: default_max_age_ms(),
            funding_feed_max_age_ms: default_funding_max_age_ms(),
        }
    }
}

/// Thresholds consumed by the pure risk evaluator (§4.I). Each hard limit
/// (`max_*`/`min_*`) has a `warning_*` mirror that crosses first and drives
/// `PAUSE`/`RiskLevel::Warning` before the hard limit drives `BLOCK`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_leverage_bps")]
    pub max_leverage_bps: i64,
    #[serde(default = "default_max_position_size_quote")]
    pub max_position_size_quote_raw: i128,
    #[serde(default = "default_max_margin_utilization_bps")]
    pub max_margin_utilization_bps: i64,
    #[serde(default = "default_max_daily_loss_quote")]
    pub max_daily_loss_quote_raw: i128,
    #[serde(default = "default_max_drawdown_bps")]
    pub max_drawdown_bps: i64,
    #[serde(default = "default_min_liquidation_buffer_bps")]
    pub min_liquidation_buffer_bps: i64,
    /// Liquidation-buffer floor that triggers a proactive `EXIT` before the
    /// position ever reaches `min_liquidation_buffer_bps`'s `BLOCK` floor.
    #[serde(default = "default_exit_liquidation_buffer_bps")]
    pub exit_liquidation_buffer_bps: i64,
    #[serde(default = "default_warning_leverage_bps")]
    pub warning_leverage_bps: i64,
    #[serde(default = "default_warning_margin_utilization_bps")]
    pub warning_margin_utilization_bps: i64,
    #[serde(default = "default_warning_drawdown_bps")]
    pub warning_drawdown_bps: i64,
    #[serde(default = "default_warning_liquidation_buffer_bps")]
    pub warning_liquidation_buffer_bps: i64,
}

impl RiskConfig {
    pub fn max_leverage_bps(&self) -> Bps {
        Bps(self.max_leverage_bps)
    }
    pub fn max_position_size_quote(&self) -> QuoteAmount {
        QuoteAmount(self.max_position_size_quote_raw)
    }
    pub fn max_daily_loss_quote(&self) -> QuoteAmount {
        QuoteAmount(self.max_daily_loss_quote_raw)
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage_bps: default_max_leverage_bps(),
            max_position_size_quote_raw: default_max_position_size_quote(),
            max_margin_utilization_bps: default_max_margin_utilization_bps(),
            max_daily_loss_quote_raw: default_max_daily_loss_quote(),
            max_drawdown_bps: default_max_drawdown_bps(),
            min_liquidation_buffer_bps: default_min_liquidation_buffer_bps(),
            exit_liquidation_buffer_bps: default_exit_liquidation_buffer_bps(),
            warning_leverage_bps: default_warning_leverage_bps(),
            warning_margin_utilization_bps: default_warning_margin_utilization_bps(),
            warning_drawdown_bps: default_warning_drawdown_bps(),
            warning_liquidation_buffer_bps: default_warning_liquidation_buffer_bps(),
        }
    }
}

/// Strategy thresholds for entry/exit signal generation (§4.J).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_min_funding_rate_bps")]
    pub min_funding_rate_bps: i64,
    #[serde(default = "default_min_predicted_rate_bps")]
    pub min_predicted_rate_bps: i64,
    /// Below this predicted rate an open hedge exits with `rate_drop`.
    #[serde(default = "default_exit_funding_rate_bps")]
    pub exit_funding_rate_bps: i64,
    #[serde(default = "default_target_yield_bps")]
    pub target_yield_bps: i64,
    /// Trailing window size, in snapshots, for trend/regime classification.
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    #[serde(default = "default_trend_dead_band_bps")]
    pub trend_dead_band_bps: i64,
    /// Stddev threshold above which a regime is classified volatile.
    #[serde(default = "default_volatility_threshold_bps")]
    pub volatility_threshold_bps: i64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_funding_rate_bps: default_min_funding_rate_bps(),
            min_predicted_rate_bps: default_min_predicted_rate_bps(),
            exit_funding_rate_bps: default_exit_funding_rate_bps(),
            target_yield_bps: default_target_yield_bps(),
            trend_window: default_trend_window(),
            trend_dead_band_bps: default_trend_dead_band_bps(),
            volatility_threshold_bps: default_volatility_threshold_bps(),
        }
    }
}

/// Execution engine thresholds (§4.K).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_slippage_guard_bps")]
    pub slippage_guard_bps: i64,
    #[serde(default = "default_hedge_drift_tolerance_bps")]
    pub hedge_drift_tolerance_bps: i64,
    #[serde(default = "default_execution_failure_threshold")]
    pub breaker_failure_threshold: usize,
    #[serde(default = "default_success_threshold")]
    pub breaker_success_threshold: usize,
    #[serde(default = "default_breaker_timeout_ms")]
    pub breaker_timeout_ms: u64,
    /// Max time to wait for an acknowledgement before timing out the order.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Max additional time to wait for a fill once acknowledged.
    #[serde(default = "default_fill_timeout_ms")]
    pub fill_timeout_ms: u64,
    /// Max number of additional market orders placed for the unfilled
    /// remainder of a partially filled leg.
    #[serde(default = "default_max_partial_fill_retries")]
    pub max_partial_fill_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_guard_bps: default_slippage_guard_bps(),
            hedge_drift_tolerance_bps: default_hedge_drift_tolerance_bps(),
            breaker_failure_threshold: default_execution_failure_threshold(),
            breaker_success_threshold: default_success_threshold(),
            breaker_timeout_ms: default_breaker_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            fill_timeout_ms: default_fill_timeout_ms(),
            max_partial_fill_retries: default_max_partial_fill_retries(),
        }
    }
}

/// Reconciler tolerances (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_reconcile_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_tolerance_size_bps")]
    pub tolerance_size_bps: i64,
    #[serde(default = "default_tolerance_balance_bps")]
    pub tolerance_balance_bps: i64,
    #[serde(default = "default_critical_magnitude_bps")]
    pub critical_magnitude_bps: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reconcile_interval_ms(),
            tolerance_size_bps: default_tolerance_size_bps(),
            tolerance_balance_bps: default_tolerance_balance_bps(),
            critical_magnitude_bps: default_critical_magnitude_bps(),
        }
    }
}

/// Request Policy tuning: retry budget, backoff curve, circuit breaker,
/// token-bucket rate limit (§4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPolicyConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub breaker_failure_threshold: usize,
    #[serde(default = "default_success_threshold")]
    pub breaker_success_threshold: usize,
    #[serde(default = "default_breaker_timeout_ms")]
    pub breaker_timeout_ms: u64,
    #[serde(default = "default_token_bucket_capacity")]
    pub token_bucket_capacity: u32,
    #[serde(default = "default_token_bucket_refill_per_sec")]
    pub token_bucket_refill_per_sec: u32,
    #[serde(default = "default_token_wait_timeout_ms")]
    pub token_wait_timeout_ms: u64,
}

impl Default for RequestPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            breaker_failure_threshold: default_failure_threshold(),
            breaker_success_threshold: default_success_threshold(),
            breaker_timeout_ms: default_breaker_timeout_ms(),
            token_bucket_capacity: default_token_bucket_capacity(),
            token_bucket_refill_per_sec: default_token_bucket_refill_per_sec(),
            token_wait_timeout_ms: default_token_wait_timeout_ms(),
        }
    }
}

/// Top-level engine configuration, composed of the per-component configs
/// above plus global symbol/timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub trading_mode: crate::types::TradingMode,

    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default = "default_evaluator_tick_ms")]
    pub evaluator_tick_ms: u64,

    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub request_policy: RequestPolicyConfig,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_mode: crate::types::TradingMode::Paused,
            symbol: default_symbol(),
            evaluator_tick_ms: default_evaluator_tick_ms(),
            freshness: FreshnessConfig::default(),
            risk: RiskConfig::default(),
            strategy: StrategyConfig::default(),
            execution: ExecutionConfig::default(),
            reconciler: ReconcilerConfig::default(),
            request_policy: RequestPolicyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`, falling back to the
    /// caller on error (the caller decides whether to use defaults).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        config.validate().map_err(anyhow::Error::from)?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            trading_mode = %config.trading_mode,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename), matching the teacher's
    /// crash-safe config save.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Reject impossible configs at startup — the only error category
    /// allowed to abort the process (§7 Configuration, fatal).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluator_tick_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "evaluator_tick_ms".into(),
                reason: "must be non-zero".into(),
            });
        }
        if self.risk.max_leverage_bps <= 0 {
            return Err(ConfigError::Invalid {
                field: "risk.max_leverage_bps".into(),
                reason: "must be positive".into(),
            });
        }
        if self.reconciler.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reconciler.interval_ms".into(),
                reason: "must be non-zero".into(),
            });
        }
        if self.request_policy.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "request_policy.max_retries".into(),
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}
