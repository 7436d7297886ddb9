//! Reconciler (§4.F) — a periodic authoritative REST sweep that
//! overwrites the State Store and diffs the result against what the
//! engine believed, producing structured [`Inconsistency`] records.
//!
//! Grounded in the teacher's `reconcile_once`/`refresh_balances`
//! fetch-diff-overwrite shape, reworked to emit bps-tolerance-based
//! `Inconsistency{field, expected, actual, severity}` records instead of
//! a single drift boolean. Per §7, reconciliation failures are always
//! reported but never propagated into the Evaluator — a failed sweep
//! just leaves the State Store as it was and logs a warning.

use tracing::{info, warn};

use crate::config::ReconcilerConfig;
use crate::request_policy::RequestPolicy;
use crate::state_store::StateStore;
use crate::types::{Inconsistency, PositionSource, Severity};
use crate::units::{Bps, QuoteAmount, RoundingMode};
use crate::venue::Venue;

/// Run one reconciliation cycle against `symbol`.
///
/// Fetches the venue's authoritative position, balance, and open orders,
/// overwrites the corresponding State Store entries, and returns any
/// discrepancies found between the previously derived state and the fresh
/// venue truth. Both venue reads go through `policy` so reconciliation
/// shares the same rate limiting/circuit breaker as every other venue call.
pub async fn reconcile_once(
    venue: &dyn Venue,
    policy: &RequestPolicy,
    store: &StateStore,
    config: &ReconcilerConfig,
    symbol: &str,
    asset: &str,
) -> Vec<Inconsistency> {
    info!(symbol, "reconciliation cycle started");

    let previous_derived = store.get_derived_position(symbol);
    let previous_balance = store.get_balance(asset);

    let venue_position = match policy.execute(|| venue.get_position(symbol)).await {
        Ok(p) => p,
        Err(e) => {
            warn!(symbol, error = %e, "reconciliation failed to fetch position — leaving state unchanged");
            return Vec::new();
        }
    };

    let venue_balance = match policy.execute(|| venue.get_balance(asset)).await {
        Ok(b) => b,
        Err(e) => {
            warn!(symbol, asset, error = %e, "reconciliation failed to fetch balance — leaving state unchanged");
            return Vec::new();
        }
    };

    if let Some(position) = venue_position {
        store.set_venue_position(symbol, position);
    }
    store.set_balance(asset, venue_balance);

    let mut inconsistencies = Vec::new();

    if let Some(prev_balance) = previous_balance {
        if let Some(inconsistency) = classify_balance_drift(prev_balance.free, venue_balance.free, config) {
            warn!(symbol, asset, expected = %inconsistency.expected, actual = %inconsistency.actual, "balance drift detected");
            inconsistencies.push(inconsistency);
        }
    }

    if let (Some(prev), Some(venue_pos)) = (previous_derived, venue_position) {
        let expected_notional = prev.notional_quote;
        let actual_notional = crate::units::notional(venue_pos.qty.abs(), venue_pos.mark_price, RoundingMode::Ceil);
        let denom = QuoteAmount(expected_notional.raw().abs().max(actual_notional.raw().abs()).max(1));
        let diff = QuoteAmount((actual_notional.raw() - expected_notional.raw()).abs());

        let diff_bps = Bps::ratio(diff, denom, RoundingMode::Ceil, Bps(10_000));

        if diff_bps.0.abs() > config.tolerance_size_bps {
            let severity = if diff_bps.0.abs() > config.critical_magnitude_bps {
                Severity::Critical
            } else {
                Severity::Warning
            };
            inconsistencies.push(Inconsistency {
                field: format!("{symbol}.position_notional"),
                expected: expected_notional.to_string(),
                actual: actual_notional.to_string(),
                severity,
            });
            warn!(symbol, expected = %expected_notional, actual = %actual_notional, diff_bps = diff_bps.0, "position notional inconsistency detected");
        }
    }

    for inconsistency in &inconsistencies {
        store.push_inconsistency(inconsistency.clone());
    }

    info!(symbol, inconsistency_count = inconsistencies.len(), "reconciliation cycle completed");
    inconsistencies
}

/// Compare a cached balance against a freshly fetched one and classify
/// the drift by severity, used by the balance half of reconciliation.
pub fn classify_balance_drift(
    expected: crate::units::BaseQty,
    actual: crate::units::BaseQty,
    config: &ReconcilerConfig,
) -> Option<Inconsistency> {
    if expected.is_zero() && actual.is_zero() {
        return None;
    }
    let denom = expected.abs().raw().max(actual.abs().raw()).max(1);
    let diff = (actual.raw() - expected.raw()).abs();
    let diff_bps = (diff * 10_000) / denom;

    if diff_bps <= config.tolerance_balance_bps as i128 {
        return None;
    }

    let severity = if diff_bps > config.critical_magnitude_bps as i128 {
        Severity::Critical
    } else {
        Severity::Warning
    };

    Some(Inconsistency {
        field: "balance".to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
        severity,
    })
}

/// Tag a position overwritten by a reconciliation sweep as authoritative.
pub fn reconciled_source() -> PositionSource {
    PositionSource::Reconciled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Balance, VenuePosition};
    use crate::units::{BaseQty, QuoteAmount, SCALE};
    use crate::venue::paper::PaperVenue;

    fn quote(whole: i128) -> QuoteAmount {
        QuoteAmount(whole * SCALE)
    }
    fn qty(whole: i128) -> BaseQty {
        BaseQty(whole * SCALE)
    }

    #[tokio::test]
    async fn reconcile_overwrites_state_store_from_venue_truth() {
        let venue = PaperVenue::new();
        venue.set_position(
            "BTCUSDT",
            VenuePosition {
                qty: qty(-1),
                entry_price: quote(50_000),
                mark_price: quote(49_000),
                liquidation_price: Some(quote(60_000)),
            },
        );
        venue.set_balance("USDT", Balance { free: qty(10_000), locked: BaseQty::ZERO });

        let store = StateStore::new();
        let config = ReconcilerConfig::default();
        let policy = RequestPolicy::new("reconciler-test", crate::config::RequestPolicyConfig::default());

        reconcile_once(&venue, &policy, &store, &config, "BTCUSDT", "USDT").await;

        assert_eq!(store.get_venue_position("BTCUSDT").unwrap().qty, qty(-1));
        assert_eq!(store.get_balance("USDT").unwrap().free, qty(10_000));
    }

    #[test]
    fn balance_drift_within_tolerance_is_none() {
        let config = ReconcilerConfig::default();
        let expected = BaseQty(100_000_000);
        let actual = BaseQty(100_050_000); // 0.05% drift
        let result = classify_balance_drift(expected, actual, &config);
        assert!(result.is_none());
    }

    #[test]
    fn balance_drift_scenario_s4_warns_at_fifty_bps() {
        // S4 from spec.md: 101M vs 100M sats, tolerance 50bps -> warning.
        let config = ReconcilerConfig { tolerance_balance_bps: 50, ..ReconcilerConfig::default() };
        let expected = BaseQty(100_000_000);
        let actual = BaseQty(101_000_000);
        let result = classify_balance_drift(expected, actual, &config).unwrap();
        assert_eq!(result.severity, Severity::Warning);
    }

    #[test]
    fn balance_drift_beyond_critical_magnitude_is_critical() {
        let config = ReconcilerConfig::default();
        let expected = BaseQty(100_000_000);
        let actual = BaseQty(200_000_000); // 100% drift
        let result = classify_balance_drift(expected, actual, &config).unwrap();
        assert_eq!(result.severity, Severity::Critical);
    }
}
