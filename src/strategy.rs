//! Strategy Engine (§4.J) — classifies the funding-rate regime from
//! rolling history and turns that classification into entry/exit
//! [`TradingIntent`]s.
//!
//! Entry confidence follows a downgrade ladder (HIGH → MEDIUM → LOW):
//! start at HIGH and step down once per adverse condition (a non-rising
//! trend, a volatile regime), capping at LOW rather than refusing to
//! enter. Exit reasons are prioritized when more than one applies in the
//! same tick via [`ExitReason::priority`] — a rate drop always outranks
//! a mere target-reached signal.

use crate::config::StrategyConfig;
use crate::types::{Confidence, ExitReason, FundingRateHistory, RateLevel, Regime, TradingIntent, VolatilityLevel};
use crate::units::{Bps, QuoteAmount};

/// Direction of funding-rate movement between the first and second half
/// of the observed history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

fn mean_bps(rates: &[i64]) -> i64 {
    if rates.is_empty() {
        return 0;
    }
    rates.iter().sum::<i64>() / rates.len() as i64
}

/// Population standard deviation (not sample) of `rates`, in bps,
/// computed via integer Newton's-method square root — there is no
/// floating point in any decision path.
fn population_stddev_bps(rates: &[i64]) -> i64 {
    if rates.len() < 2 {
        return 0;
    }
    let mean = mean_bps(rates);
    let variance: i64 = rates.iter().map(|r| (r - mean) * (r - mean)).sum::<i64>() / rates.len() as i64;
    isqrt(variance)
}

fn isqrt(n: i64) -> i64 {
    if n <= 0 {
        return 0;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// The last `window` observations (or all of them, if there are fewer),
/// oldest first — the trailing window trend/regime classification runs
/// over (§4.J, default 24 snapshots).
fn windowed_rates(history: &FundingRateHistory, window: usize) -> Vec<i64> {
    let all: Vec<i64> = history.observations.iter().map(|o| o.rate_bps.0).collect();
    if window == 0 || all.len() <= window {
        all
    } else {
        all[all.len() - window..].to_vec()
    }
}

/// Classify the trend by comparing the mean of the first half of the
/// trailing window against the mean of the second half, with a dead band
/// below which the engine reports `Stable` rather than a noisy flip-flop.
pub fn classify_trend(history: &FundingRateHistory, config: &StrategyConfig) -> Trend {
    let rates = windowed_rates(history, config.trend_window);
    if rates.len() < 2 {
        return Trend::Stable;
    }
    let mid = rates.len() / 2;
    let first_half_mean = mean_bps(&rates[..mid]);
    let second_half_mean = mean_bps(&rates[mid..]);
    let delta = second_half_mean - first_half_mean;
    if delta > config.trend_dead_band_bps {
        Trend::Rising
    } else if delta < -config.trend_dead_band_bps {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

/// Classify the current regime over the trailing window: `level` from the
/// window's mean rate against the configured entry floor, `volatility`
/// from the window's population stddev against the volatility floor.
pub fn classify_regime(history: &FundingRateHistory, config: &StrategyConfig) -> Regime {
    let rates = windowed_rates(history, config.trend_window);
    let average = mean_bps(&rates);
    let stddev = population_stddev_bps(&rates);

    Regime {
        level: if average > config.min_funding_rate_bps { RateLevel::High } else { RateLevel::Low },
        volatility: if stddev > config.volatility_threshold_bps { VolatilityLevel::Volatile } else { VolatilityLevel::Stable },
    }
}

fn step_down(confidence: Confidence) -> Confidence {
    match confidence {
        Confidence::High => Confidence::Medium,
        Confidence::Medium => Confidence::Low,
        Confidence::Low => Confidence::Low,
    }
}

/// Evaluate entry conditions for `symbol` and return either an
/// `EnterHedge` intent or `Hold`.
///
/// Confidence starts at HIGH for a `high_stable` regime, MEDIUM for
/// `high_volatile`, then steps down at most once per adverse condition —
/// a falling trend, a predicted rate below the current rate, or a
/// predicted rate below the floor all downgrade rather than reject.
pub fn generate_entry_signal(
    symbol: &str,
    history: &FundingRateHistory,
    config: &StrategyConfig,
    max_size_quote: QuoteAmount,
) -> TradingIntent {
    let Some(latest) = history.latest() else {
        return TradingIntent::Hold;
    };

    if latest.rate_bps.0 < config.min_funding_rate_bps {
        return TradingIntent::Hold;
    }

    let regime = classify_regime(history, config);
    if regime.level == RateLevel::Low {
        return TradingIntent::Hold;
    }

    if max_size_quote.is_zero() || max_size_quote.is_negative() {
        return TradingIntent::Hold;
    }

    let mut confidence = if regime.volatility == VolatilityLevel::Volatile { Confidence::Medium } else { Confidence::High };

    let trend = classify_trend(history, config);
    if trend == Trend::Falling {
        confidence = step_down(confidence);
    }

    let predicted = latest.predicted_rate_bps.unwrap_or(latest.rate_bps);
    if predicted.0 < latest.rate_bps.0 {
        confidence = step_down(confidence);
    }
    if predicted.0 < config.min_predicted_rate_bps {
        confidence = step_down(confidence);
    }

    TradingIntent::EnterHedge {
        symbol: symbol.to_string(),
        size_quote: max_size_quote,
        expected_yield_bps: predicted,
        confidence,
    }
}

/// Evaluate exit conditions for `symbol`; returns the single
/// highest-priority reason among every condition that currently holds,
/// or `None` if nothing warrants an exit.
pub fn generate_exit_signal(
    symbol: &str,
    history: &FundingRateHistory,
    config: &StrategyConfig,
    previous_regime: Option<Regime>,
    realized_yield_bps: Bps,
) -> Option<TradingIntent> {
    let latest = history.latest()?;
    let trend = classify_trend(history, config);
    let regime = classify_regime(history, config);
    let predicted = latest.predicted_rate_bps.unwrap_or(latest.rate_bps);

    let mut reasons = Vec::new();

    if predicted.0 < config.exit_funding_rate_bps {
        reasons.push(ExitReason::RateDrop);
    }
    if trend == Trend::Falling {
        reasons.push(ExitReason::TrendChange);
    }
    if let Some(prev) = previous_regime {
        if prev.level != regime.level {
            reasons.push(ExitReason::RegimeChange);
        }
    }
    if realized_yield_bps.0 >= config.target_yield_bps {
        reasons.push(ExitReason::TargetReached);
    }

    reasons
        .into_iter()
        .min_by_key(|r| r.priority())
        .map(|reason| TradingIntent::ExitHedge { symbol: symbol.to_string(), reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FundingRateSnapshot;
    use crate::units::SCALE;
    use chrono::Utc;

    fn history_with_rates(rates: &[i64]) -> FundingRateHistory {
        let mut history = FundingRateHistory::new("BTCUSDT", 64);
        for r in rates {
            history.push(FundingRateSnapshot { rate_bps: Bps(*r), predicted_rate_bps: Some(Bps(*r)), at: Utc::now() });
        }
        history
    }

    fn base_config() -> StrategyConfig {
        StrategyConfig {
            min_funding_rate_bps: 10,
            min_predicted_rate_bps: 5,
            exit_funding_rate_bps: 3,
            target_yield_bps: 18,
            trend_window: 24,
            trend_dead_band_bps: 2,
            volatility_threshold_bps: 5,
        }
    }

    #[test]
    fn scenario_s1_enters_hedge_with_high_confidence() {
        let config = base_config();
        let history = history_with_rates(&[12, 14, 16, 20]); // rising, stable volatility
        let max_size = QuoteAmount(10_000 * SCALE);

        let intent = generate_entry_signal("BTCUSDT", &history, &config, max_size);
        match intent {
            TradingIntent::EnterHedge { size_quote, expected_yield_bps, confidence, .. } => {
                assert_eq!(size_quote, max_size);
                // expected_yield_bps is the snapshot's predicted rate, not target_yield_bps.
                assert_eq!(expected_yield_bps, Bps(20));
                assert_eq!(confidence, Confidence::High);
            }
            _ => panic!("expected EnterHedge"),
        }
    }

    #[test]
    fn rate_below_floor_holds() {
        let config = StrategyConfig { min_funding_rate_bps: 10, ..base_config() };
        let history = history_with_rates(&[5, 5, 5]);
        let intent = generate_entry_signal("BTCUSDT", &history, &config, QuoteAmount(1_000));
        assert!(matches!(intent, TradingIntent::Hold));
    }

    #[test]
    fn falling_trend_downgrades_confidence_to_medium() {
        // Volatility threshold raised so the decline itself (not volatility)
        // is the only thing triggering a downgrade.
        let config = StrategyConfig { volatility_threshold_bps: 10, ..base_config() };
        let history = history_with_rates(&[30, 28, 20, 15]); // falling but still above floor
        let intent = generate_entry_signal("BTCUSDT", &history, &config, QuoteAmount(1_000_000));
        match intent {
            TradingIntent::EnterHedge { confidence, .. } => assert_eq!(confidence, Confidence::Medium),
            _ => panic!("expected EnterHedge"),
        }
    }

    #[test]
    fn stable_trend_preserves_high_confidence() {
        let config = base_config();
        let history = history_with_rates(&[15, 15, 15, 16]); // essentially flat
        let intent = generate_entry_signal("BTCUSDT", &history, &config, QuoteAmount(1_000_000));
        match intent {
            TradingIntent::EnterHedge { confidence, .. } => assert_eq!(confidence, Confidence::High),
            _ => panic!("expected EnterHedge"),
        }
    }

    #[test]
    fn predicted_below_current_rate_downgrades_one_step() {
        let config = base_config();
        let mut history = history_with_rates(&[15, 15, 15]);
        history.push(FundingRateSnapshot { rate_bps: Bps(15), predicted_rate_bps: Some(Bps(12)), at: Utc::now() });
        let intent = generate_entry_signal("BTCUSDT", &history, &config, QuoteAmount(1_000_000));
        match intent {
            TradingIntent::EnterHedge { confidence, expected_yield_bps, .. } => {
                assert_eq!(confidence, Confidence::Medium);
                assert_eq!(expected_yield_bps, Bps(12));
            }
            _ => panic!("expected EnterHedge"),
        }
    }

    #[test]
    fn predicted_below_min_predicted_downgrades_instead_of_rejecting() {
        let config = StrategyConfig { min_predicted_rate_bps: 20, ..base_config() };
        let history = history_with_rates(&[15, 15, 15]);
        let intent = generate_entry_signal("BTCUSDT", &history, &config, QuoteAmount(1_000_000));
        match intent {
            TradingIntent::EnterHedge { confidence, .. } => assert_eq!(confidence, Confidence::Medium),
            _ => panic!("expected EnterHedge, not a Hold rejection"),
        }
    }

    #[test]
    fn rate_drop_outranks_target_reached() {
        let config = StrategyConfig { exit_funding_rate_bps: 10, ..base_config() };
        let history = history_with_rates(&[5, 5, 5]);
        let intent = generate_exit_signal("BTCUSDT", &history, &config, None, Bps(50)).unwrap();
        match intent {
            TradingIntent::ExitHedge { reason, .. } => assert_eq!(reason, ExitReason::RateDrop),
            _ => panic!("expected ExitHedge"),
        }
    }

    #[test]
    fn no_exit_condition_returns_none() {
        let config = StrategyConfig { min_funding_rate_bps: 10, target_yield_bps: 50, ..StrategyConfig::default() };
        let history = history_with_rates(&[20, 20, 20]);
        let result = generate_exit_signal("BTCUSDT", &history, &config, None, Bps(5));
        assert!(result.is_none());
    }
}
