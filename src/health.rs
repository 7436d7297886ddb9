//! Health Monitor (§4.M) — aggregates per-stream staleness into a single
//! [`HealthAction`] recommendation the Evaluator acts on.
//!
//! Builds on [`crate::freshness::check_freshness`] for the raw
//! staleness booleans and adds the one piece of context freshness alone
//! can't see: how long the current position has been open. A stale
//! websocket feed is tolerable for a flat book; it is not tolerable
//! once real money has been on the table for a while, because a stuck
//! feed plus an aging position is exactly the scenario in which a
//! liquidation can happen without the engine noticing in time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::freshness::check_freshness;
use crate::state_store::StateStore;
use crate::types::{HealthAction, HealthSnapshot};
use crate::units::Bps;

fn default_ws_stale_force_exit_position_age_ms() -> i64 {
    30_000
}
fn default_margin_buffer_force_exit_bps() -> i64 {
    500
}

/// Threshold config for the position-age and margin-buffer escalations the
/// Health Monitor adds on top of plain freshness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_ws_stale_force_exit_position_age_ms")]
    pub ws_stale_force_exit_position_age_ms: i64,
    #[serde(default = "default_margin_buffer_force_exit_bps")]
    pub margin_buffer_force_exit_bps: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ws_stale_force_exit_position_age_ms: default_ws_stale_force_exit_position_age_ms(),
            margin_buffer_force_exit_bps: default_margin_buffer_force_exit_bps(),
        }
    }
}

/// Compute the [`HealthSnapshot`] for every symbol the engine currently
/// tracks.
pub fn aggregate_health(store: &StateStore, symbols: &[String], freshness: &crate::config::FreshnessConfig) -> HashMap<String, HealthSnapshot> {
    symbols.iter().map(|s| (s.clone(), check_freshness(store, s, freshness))).collect()
}

/// Decide the action the Evaluator should take given one symbol's
/// health, whether it currently holds an open position, and (if open)
/// that position's margin buffer.
///
/// Checks run most-severe-first: both streams down outranks a single
/// stale stream, and a stale feed over an aging position outranks a
/// stale feed over a flat book. `funding_feed_stale` plays no role here —
/// it affects freshness reporting but not this decision, since a stale
/// funding feed alone never blocks an existing hedge or a flat book from
/// trading.
pub fn decide_health_action(health: HealthSnapshot, position_open: bool, position_age_ms: i64, margin_buffer_bps: Bps, config: &HealthConfig) -> HealthAction {
    if health.ws_stale && health.rest_stale {
        return if position_open { HealthAction::EmergencyExit } else { HealthAction::FullPause };
    }
    if health.ws_stale {
        if position_open {
            return if position_age_ms >= config.ws_stale_force_exit_position_age_ms {
                HealthAction::ForceExit
            } else {
                HealthAction::PauseEntries
            };
        }
        return HealthAction::PauseEntries;
    }
    if health.rest_stale && position_open {
        return if margin_buffer_bps.0 < config.margin_buffer_force_exit_bps {
            HealthAction::ForceExit
        } else {
            HealthAction::ReduceRisk
        };
    }
    HealthAction::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> HealthSnapshot {
        HealthSnapshot { ws_stale: false, rest_stale: false, funding_feed_stale: false }
    }

    #[test]
    fn both_streams_down_with_open_position_is_emergency_exit() {
        let health = HealthSnapshot { ws_stale: true, rest_stale: true, funding_feed_stale: true };
        let action = decide_health_action(health, true, 1_000, Bps(10_000), &HealthConfig::default());
        assert_eq!(action, HealthAction::EmergencyExit);
    }

    #[test]
    fn both_streams_down_with_no_position_is_full_pause() {
        let health = HealthSnapshot { ws_stale: true, rest_stale: true, funding_feed_stale: false };
        let action = decide_health_action(health, false, 0, Bps(10_000), &HealthConfig::default());
        assert_eq!(action, HealthAction::FullPause);
    }

    #[test]
    fn scenario_s5_stale_ws_with_aging_position_is_force_exit() {
        let health = HealthSnapshot { ws_stale: true, rest_stale: false, funding_feed_stale: false };
        let action = decide_health_action(health, true, 35_000, Bps(10_000), &HealthConfig::default());
        assert_eq!(action, HealthAction::ForceExit);
    }

    #[test]
    fn stale_ws_with_flat_book_pauses_entries() {
        let health = HealthSnapshot { ws_stale: true, rest_stale: false, funding_feed_stale: false };
        let action = decide_health_action(health, false, 0, Bps(10_000), &HealthConfig::default());
        assert_eq!(action, HealthAction::PauseEntries);
    }

    #[test]
    fn stale_ws_with_young_position_pauses_entries() {
        let health = HealthSnapshot { ws_stale: true, rest_stale: false, funding_feed_stale: false };
        let action = decide_health_action(health, true, 5_000, Bps(10_000), &HealthConfig::default());
        assert_eq!(action, HealthAction::PauseEntries);
    }

    #[test]
    fn stale_rest_with_open_position_and_thin_margin_force_exits() {
        let health = HealthSnapshot { ws_stale: false, rest_stale: true, funding_feed_stale: false };
        let action = decide_health_action(health, true, 1_000, Bps(400), &HealthConfig::default());
        assert_eq!(action, HealthAction::ForceExit);
    }

    #[test]
    fn stale_rest_with_open_position_and_healthy_margin_reduces_risk() {
        let health = HealthSnapshot { ws_stale: false, rest_stale: true, funding_feed_stale: false };
        let action = decide_health_action(health, true, 1_000, Bps(5_000), &HealthConfig::default());
        assert_eq!(action, HealthAction::ReduceRisk);
    }

    #[test]
    fn stale_rest_with_no_position_continues() {
        let health = HealthSnapshot { ws_stale: false, rest_stale: true, funding_feed_stale: false };
        let action = decide_health_action(health, false, 0, Bps(10_000), &HealthConfig::default());
        assert_eq!(action, HealthAction::Continue);
    }

    #[test]
    fn all_fresh_continues() {
        let action = decide_health_action(fresh(), true, 999_999, Bps(10_000), &HealthConfig::default());
        assert_eq!(action, HealthAction::Continue);
    }
}
