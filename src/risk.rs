//! Risk Engine (§4.I) — a pure function over [`RiskSnapshot`] and
//! [`RiskConfig`] plus a small stateful kill switch wrapper.
//!
//! `evaluate_risk` itself takes no lock and touches no clock: given the
//! same snapshot and config it always returns the same assessment,
//! which is what makes its BLOCK > EXIT > PAUSE > ALLOW ordering
//! testable as a monotonicity property. The kill switch is the one
//! piece of engine-wide mutable risk state, grounded in the teacher's
//! `kill()` — once engaged it forces every subsequent evaluation to
//! BLOCK until an operator clears it.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::config::RiskConfig;
use crate::types::{RiskAction, RiskAssessment, RiskLevel, RiskMetrics, RiskSnapshot};
use crate::units::{Bps, QuoteAmount, RoundingMode};

/// Evaluate one risk snapshot against the configured thresholds.
///
/// Checks run in strict BLOCK → EXIT → PAUSE → ALLOW order; the first
/// match wins, so a snapshot that would trip two conditions always
/// receives the more restrictive action. `EXIT` and `PAUSE` are only
/// evaluated against an open position and the configured warning
/// thresholds respectively — a flat book can never be exited, only
/// blocked from opening.
pub fn evaluate_risk(snapshot: RiskSnapshot, config: &RiskConfig) -> RiskAssessment {
    let leverage_bps = Bps::ratio(snapshot.position_notional_quote, snapshot.account_equity_quote, RoundingMode::Ceil, Bps(10_000));
    let drawdown_bps = if snapshot.peak_equity_quote.is_zero() {
        Bps::ZERO
    } else {
        let shortfall = snapshot
            .peak_equity_quote
            .checked_sub(snapshot.account_equity_quote)
            .filter(|v| !v.is_negative())
            .unwrap_or(QuoteAmount::ZERO);
        Bps::ratio(shortfall, snapshot.peak_equity_quote, RoundingMode::Ceil, Bps::ZERO)
    };

    let metrics = RiskMetrics {
        notional_quote: snapshot.position_notional_quote,
        leverage_bps,
        margin_utilization_bps: snapshot.margin_utilization_bps,
        liquidation_distance_bps: snapshot.liquidation_distance_bps,
        daily_pnl_quote: snapshot.daily_realized_pnl_quote,
        drawdown_bps,
    };

    if snapshot.kill_switch_engaged {
        return blocked(metrics, vec!["kill_switch".to_string()]);
    }

    let mut block_reasons = Vec::new();
    if snapshot.position_notional_quote.raw() > config.max_position_size_quote_raw {
        block_reasons.push(format!("notional {} exceeds max position size {}", snapshot.position_notional_quote, config.max_position_size_quote()));
    }
    if leverage_bps.0 > config.max_leverage_bps {
        block_reasons.push(format!("leverage {leverage_bps} exceeds max {}", config.max_leverage_bps()));
    }
    if snapshot.margin_utilization_bps.0 > config.max_margin_utilization_bps {
        block_reasons.push(format!("margin utilization {} exceeds max {}bps", snapshot.margin_utilization_bps, config.max_margin_utilization_bps));
    }
    if drawdown_bps.0 > config.max_drawdown_bps {
        block_reasons.push(format!("drawdown {drawdown_bps} exceeds max {}bps", config.max_drawdown_bps));
    }
    if snapshot.liquidation_distance_bps.0 < config.min_liquidation_buffer_bps {
        block_reasons.push(format!(
            "liquidation distance {} below floor {}bps",
            snapshot.liquidation_distance_bps, config.min_liquidation_buffer_bps
        ));
    }
    if !block_reasons.is_empty() {
        return blocked(metrics, block_reasons);
    }

    if snapshot.position_open {
        let mut exit_reasons = Vec::new();
        if snapshot.liquidation_distance_bps.0 < config.exit_liquidation_buffer_bps {
            exit_reasons.push(format!(
                "liquidation distance {} below exit buffer {}bps",
                snapshot.liquidation_distance_bps, config.exit_liquidation_buffer_bps
            ));
        }
        if snapshot.daily_realized_pnl_quote.is_negative() && snapshot.daily_realized_pnl_quote.abs().raw() >= config.max_daily_loss_quote_raw {
            exit_reasons.push(format!("daily loss {} reached cap {}", snapshot.daily_realized_pnl_quote.abs(), config.max_daily_loss_quote()));
        }
        if !exit_reasons.is_empty() {
            return RiskAssessment {
                level: RiskLevel::Danger,
                action: RiskAction::Exit,
                reasons: exit_reasons,
                metrics,
                max_additional_size_quote: QuoteAmount::ZERO,
            };
        }
    }

    let mut warning_reasons = Vec::new();
    if leverage_bps.0 > config.warning_leverage_bps {
        warning_reasons.push(format!("leverage {leverage_bps} above warning {}bps", config.warning_leverage_bps));
    }
    if snapshot.margin_utilization_bps.0 > config.warning_margin_utilization_bps {
        warning_reasons.push(format!("margin utilization {} above warning {}bps", snapshot.margin_utilization_bps, config.warning_margin_utilization_bps));
    }
    if drawdown_bps.0 > config.warning_drawdown_bps {
        warning_reasons.push(format!("drawdown {drawdown_bps} above warning {}bps", config.warning_drawdown_bps));
    }
    if snapshot.liquidation_distance_bps.0 < config.warning_liquidation_buffer_bps {
        warning_reasons.push(format!(
            "liquidation distance {} below warning buffer {}bps",
            snapshot.liquidation_distance_bps, config.warning_liquidation_buffer_bps
        ));
    }
    if !warning_reasons.is_empty() {
        return RiskAssessment {
            level: RiskLevel::Warning,
            action: RiskAction::Pause,
            reasons: warning_reasons,
            metrics,
            max_additional_size_quote: QuoteAmount::ZERO,
        };
    }

    let max_additional_size_quote = calculate_max_position_size_quote(snapshot.account_equity_quote, snapshot.margin_used_quote, config);

    // Close to a warning threshold but not across it yet: still ALLOW, but
    // flag CAUTION so an operator watching the level sees it coming.
    let approaching_warning = leverage_bps.0 * 10 > config.warning_leverage_bps * 8
        || snapshot.margin_utilization_bps.0 * 10 > config.warning_margin_utilization_bps * 8
        || drawdown_bps.0 * 10 > config.warning_drawdown_bps * 8
        || snapshot.liquidation_distance_bps.0 * 10 < config.warning_liquidation_buffer_bps * 12;
    let level = if approaching_warning { RiskLevel::Caution } else { RiskLevel::Safe };

    RiskAssessment {
        level,
        action: RiskAction::Allow,
        reasons: vec!["within risk limits".to_string()],
        metrics,
        max_additional_size_quote,
    }
}

fn blocked(metrics: RiskMetrics, reasons: Vec<String>) -> RiskAssessment {
    RiskAssessment {
        level: RiskLevel::Blocked,
        action: RiskAction::Block,
        reasons,
        metrics,
        max_additional_size_quote: QuoteAmount::ZERO,
    }
}

/// Headroom remaining before the position hits `max_position_size_quote`
/// or `max_leverage_bps` of available (unencumbered) equity, whichever
/// binds first. Rounds down: never reports more capacity than is
/// actually safe to use.
pub fn calculate_max_position_size_quote(equity_quote: QuoteAmount, margin_used_quote: QuoteAmount, config: &RiskConfig) -> QuoteAmount {
    let available_equity = equity_quote.checked_sub(margin_used_quote).filter(|v| !v.is_negative()).unwrap_or(QuoteAmount::ZERO);
    let leverage_cap = available_equity.mul_bps(config.max_leverage_bps(), RoundingMode::Floor);
    config.max_position_size_quote().min(leverage_cap)
}

/// Engine-wide kill switch. Once engaged, every [`RiskSnapshot`] fed
/// through it reports `kill_switch_engaged = true` regardless of its
/// own field, until an operator clears it.
#[derive(Debug, Default)]
pub struct KillSwitch(AtomicBool);

impl KillSwitch {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn engage(&self, reason: &str) {
        self.0.store(true, Ordering::SeqCst);
        warn!(reason, "kill switch engaged — all trading blocked until cleared");
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_engaged(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Stamp `snapshot.kill_switch_engaged` from this switch's state
    /// before handing it to [`evaluate_risk`].
    pub fn apply(&self, mut snapshot: RiskSnapshot) -> RiskSnapshot {
        snapshot.kill_switch_engaged = snapshot.kill_switch_engaged || self.is_engaged();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Bps, SCALE};

    fn quote(whole: i128) -> QuoteAmount {
        QuoteAmount(whole * SCALE)
    }

    fn base_snapshot() -> RiskSnapshot {
        RiskSnapshot {
            position_open: true,
            position_notional_quote: quote(5_000),
            account_equity_quote: quote(10_000),
            margin_used_quote: quote(1_000),
            margin_utilization_bps: Bps(5_000),
            liquidation_distance_bps: Bps(2_000),
            daily_realized_pnl_quote: QuoteAmount::ZERO,
            peak_equity_quote: quote(10_000),
            kill_switch_engaged: false,
        }
    }

    #[test]
    fn kill_switch_always_blocks() {
        let mut snap = base_snapshot();
        snap.kill_switch_engaged = true;
        let assessment = evaluate_risk(snap, &RiskConfig::default());
        assert_eq!(assessment.action, RiskAction::Block);
        assert_eq!(assessment.level, RiskLevel::Blocked);
    }

    #[test]
    fn block_outranks_exit_when_both_conditions_hold() {
        let mut snap = base_snapshot();
        snap.kill_switch_engaged = true;
        snap.liquidation_distance_bps = Bps(10); // would also trigger Exit/Block on its own
        let assessment = evaluate_risk(snap, &RiskConfig::default());
        assert_eq!(assessment.action, RiskAction::Block);
    }

    #[test]
    fn liquidation_distance_below_block_floor_blocks() {
        let mut snap = base_snapshot();
        snap.liquidation_distance_bps = Bps(150); // below default min_liquidation_buffer_bps of 200
        let assessment = evaluate_risk(snap, &RiskConfig::default());
        assert_eq!(assessment.action, RiskAction::Block);
    }

    #[test]
    fn liquidation_distance_below_exit_floor_but_above_block_floor_exits() {
        let mut snap = base_snapshot();
        snap.liquidation_distance_bps = Bps(300); // below exit floor 500, above block floor 200
        let assessment = evaluate_risk(snap, &RiskConfig::default());
        assert_eq!(assessment.action, RiskAction::Exit);
        assert_eq!(assessment.level, RiskLevel::Danger);
    }

    #[test]
    fn exit_not_triggered_without_open_position() {
        let mut snap = base_snapshot();
        snap.position_open = false;
        snap.liquidation_distance_bps = Bps(300);
        let assessment = evaluate_risk(snap, &RiskConfig::default());
        assert_ne!(assessment.action, RiskAction::Exit);
    }

    #[test]
    fn daily_loss_cap_triggers_exit() {
        let mut snap = base_snapshot();
        snap.daily_realized_pnl_quote = -snap.account_equity_quote; // far past any reasonable cap
        let assessment = evaluate_risk(snap, &RiskConfig::default());
        assert_eq!(assessment.action, RiskAction::Exit);
    }

    #[test]
    fn high_utilization_within_margin_triggers_pause_not_exit() {
        let mut snap = base_snapshot();
        snap.margin_utilization_bps = Bps(8_000); // above warning 7500, below max 9000
        let assessment = evaluate_risk(snap, &RiskConfig::default());
        assert_eq!(assessment.action, RiskAction::Pause);
        assert_eq!(assessment.level, RiskLevel::Warning);
    }

    #[test]
    fn margin_utilization_above_max_blocks_separately_from_leverage() {
        let mut snap = base_snapshot();
        snap.margin_utilization_bps = Bps(9_500); // above max_margin_utilization_bps, leverage untouched
        let assessment = evaluate_risk(snap, &RiskConfig::default());
        assert_eq!(assessment.action, RiskAction::Block);
    }

    #[test]
    fn comfortable_snapshot_is_allowed_with_positive_headroom() {
        let snap = base_snapshot();
        let assessment = evaluate_risk(snap, &RiskConfig::default());
        assert_eq!(assessment.action, RiskAction::Allow);
        assert!(assessment.max_additional_size_quote.raw() > 0);
    }

    #[test]
    fn kill_switch_wrapper_forces_snapshot_field() {
        let switch = KillSwitch::new();
        switch.engage("manual operator stop");
        let snap = switch.apply(base_snapshot());
        assert!(snap.kill_switch_engaged);
        switch.clear();
        let snap = switch.apply(base_snapshot());
        assert!(!snap.kill_switch_engaged);
    }

    #[test]
    fn risk_action_ordering_is_monotonic() {
        assert!(RiskAction::Allow < RiskAction::Pause);
        assert!(RiskAction::Pause < RiskAction::Exit);
        assert!(RiskAction::Exit < RiskAction::Block);
    }
}
