//! Shared domain types for the funding-rate arbitrage core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::units::{BaseQty, Bps, QuoteAmount};

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// A single-asset balance as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub free: BaseQty,
    pub locked: BaseQty,
}

impl Balance {
    pub fn total(&self) -> BaseQty {
        self.free + self.locked
    }
}

/// Raw venue-reported perpetual position (one leg of the hedge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub qty: BaseQty,
    pub entry_price: QuoteAmount,
    pub mark_price: QuoteAmount,
    pub liquidation_price: Option<QuoteAmount>,
}

/// Where a piece of derived state came from — used to label
/// [`DerivedPosition`] so downstream consumers know its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSource {
    Rest,
    Derived,
    Reconciled,
}

/// Combined view of the perp leg + spot leg + pending fills, computed by
/// the Position Derivation component (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedPosition {
    pub open: bool,
    pub side: Option<Side>,
    pub perp_qty: BaseQty,
    pub spot_qty: BaseQty,
    pub notional_quote: QuoteAmount,
    pub unrealized_pnl_quote: QuoteAmount,
    pub entry_time: Option<DateTime<Utc>>,
    pub entry_price_quote: Option<QuoteAmount>,
    pub entry_funding_rate_bps: Option<Bps>,
    pub mark_price_quote: QuoteAmount,
    pub funding_accrued_quote: QuoteAmount,
    pub margin_used_quote: QuoteAmount,
    pub margin_utilization_bps: Bps,
    /// Distance to liquidation in bps, clamped to `[0, 10000]`; `10000` when
    /// there is no open position or the venue reports no liquidation price.
    pub liquidation_distance_bps: Bps,
    /// `10000 − marginUtilizationBps`, clamped to `[0, 10000]`.
    pub margin_buffer_bps: Bps,
    pub source: PositionSource,
    pub as_of: DateTime<Utc>,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Which leg of the hedge an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Leg {
    Perp,
    Spot,
}

/// Order lifecycle state (§4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Submitted,
    Acked,
    Partial,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }
}

/// An order managed by the engine, tracked through [`crate::order_sm`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedOrder {
    pub id: String,
    pub intent_id: String,
    pub leg: Leg,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub requested_qty: BaseQty,
    pub filled_qty: BaseQty,
    pub limit_price: Option<QuoteAmount>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedOrder {
    pub fn new(intent_id: &str, leg: Leg, symbol: &str, side: Side, requested_qty: BaseQty, limit_price: Option<QuoteAmount>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            intent_id: intent_id.to_string(),
            leg,
            symbol: symbol.to_string(),
            side,
            status: OrderStatus::Created,
            requested_qty,
            filled_qty: BaseQty::ZERO,
            limit_price,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_qty(&self) -> BaseQty {
        self.requested_qty.saturating_sub(self.filled_qty)
    }
}

/// A single fill event reported by the venue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fill {
    pub qty: BaseQty,
    pub price: QuoteAmount,
    pub fee_quote: QuoteAmount,
    pub at: DateTime<Utc>,
}

/// Hedge lifecycle state (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HedgeState {
    Idle,
    EnteringPerp,
    EnteringSpot,
    Active,
    ExitingSpot,
    ExitingPerp,
    Closed,
}

impl HedgeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// A single funding-rate observation for one settlement period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FundingRateSnapshot {
    pub rate_bps: Bps,
    pub predicted_rate_bps: Option<Bps>,
    pub at: DateTime<Utc>,
}

/// Bounded rolling history of funding-rate observations for one symbol,
/// feeding the Strategy Engine's trend/regime computation (§4.J).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRateHistory {
    pub symbol: String,
    pub capacity: usize,
    pub observations: std::collections::VecDeque<FundingRateSnapshot>,
}

impl FundingRateHistory {
    pub fn new(symbol: impl Into<String>, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            capacity,
            observations: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, snap: FundingRateSnapshot) {
        if self.observations.len() == self.capacity {
            self.observations.pop_front();
        }
        self.observations.push_back(snap);
    }

    pub fn latest(&self) -> Option<&FundingRateSnapshot> {
        self.observations.back()
    }
}

/// Input to the Risk Engine's pure evaluation function (§4.I).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub position_open: bool,
    pub position_notional_quote: QuoteAmount,
    pub account_equity_quote: QuoteAmount,
    pub margin_used_quote: QuoteAmount,
    pub margin_utilization_bps: Bps,
    pub liquidation_distance_bps: Bps,
    pub daily_realized_pnl_quote: QuoteAmount,
    pub peak_equity_quote: QuoteAmount,
    pub kill_switch_engaged: bool,
}

/// Risk action ordering: `Block` is the most restrictive, `Allow` the
/// least. First match wins in [`crate::risk::evaluate_risk`] (§4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskAction {
    Allow,
    Pause,
    Exit,
    Block,
}

/// Overall risk posture reported alongside [`RiskAction`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Safe,
    Caution,
    Warning,
    Danger,
    Blocked,
}

/// Computed risk metrics (§4.I "Computed metrics"), reported alongside the
/// decision so callers and operators can see why it was made.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub notional_quote: QuoteAmount,
    pub leverage_bps: Bps,
    pub margin_utilization_bps: Bps,
    pub liquidation_distance_bps: Bps,
    pub daily_pnl_quote: QuoteAmount,
    pub drawdown_bps: Bps,
}

/// Output of the Risk Engine's pure evaluation function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub action: RiskAction,
    pub reasons: Vec<String>,
    pub metrics: RiskMetrics,
    pub max_additional_size_quote: QuoteAmount,
}

/// Funding-rate regime classification (§4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateLevel {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    Stable,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Regime {
    pub level: RateLevel,
    pub volatility: VolatilityLevel,
}

/// Confidence tier on an entry signal's downgrade ladder (§4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Reason an exit signal fired. The first four are the Strategy Engine's
/// own prioritized reasons (§4.J); the rest are raised directly by the
/// Evaluator from the health table (§4.N) or the risk engine (§4.I) and
/// never compete with the strategy's own priority ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    RateDrop,
    TrendChange,
    RegimeChange,
    TargetReached,
    Risk,
    AllFeedsDown,
    WsStaleWithPosition,
    RestFailingLowMargin,
}

impl ExitReason {
    /// Lower number = higher priority. Only meaningful among the strategy's
    /// own four reasons, which are the only ones ever compared against one
    /// another.
    pub fn priority(self) -> u8 {
        match self {
            Self::RateDrop => 0,
            Self::TrendChange => 1,
            Self::RegimeChange => 2,
            Self::TargetReached => 3,
            Self::Risk => 4,
            Self::AllFeedsDown => 5,
            Self::WsStaleWithPosition => 6,
            Self::RestFailingLowMargin => 7,
        }
    }

    /// The literal reason string carried on `ExitHedge` intents.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateDrop => "rate_drop",
            Self::TrendChange => "trend_change",
            Self::RegimeChange => "regime_change",
            Self::TargetReached => "target_reached",
            Self::Risk => "risk",
            Self::AllFeedsDown => "all_feeds_down",
            Self::WsStaleWithPosition => "ws_stale_with_position",
            Self::RestFailingLowMargin => "rest_failing_low_margin",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A trading decision emitted by the Strategy Engine and consumed by the
/// Evaluator (§4.J, §4.N).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TradingIntent {
    EnterHedge {
        symbol: String,
        size_quote: QuoteAmount,
        expected_yield_bps: Bps,
        confidence: Confidence,
    },
    ExitHedge {
        symbol: String,
        reason: ExitReason,
    },
    Hold,
}

impl TradingIntent {
    pub fn intent_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// An append-only audit record of a state-machine transition (§6 journal
/// shape). Bounded in memory by [`crate::state_store::StateStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub entity_type: String,
    pub entity_id: String,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    pub correlation_id: String,
}

impl StateTransition {
    pub fn new(
        entity_type: &str,
        entity_id: &str,
        from_state: impl std::fmt::Debug,
        to_state: impl std::fmt::Debug,
        event: impl std::fmt::Debug,
        correlation_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            from_state: format!("{:?}", from_state),
            to_state: format!("{:?}", to_state),
            event: format!("{:?}", event),
            correlation_id: correlation_id.to_string(),
        }
    }
}

/// Severity of a reconciliation discrepancy (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A single discrepancy found by the Reconciler between authoritative
/// venue state and the State Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inconsistency {
    pub field: String,
    pub expected: String,
    pub actual: String,
    pub severity: Severity,
}

/// Per-stream staleness flags produced by the Health Monitor (§4.M).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub ws_stale: bool,
    pub rest_stale: bool,
    pub funding_feed_stale: bool,
}

/// Action chosen by the Evaluator's health decision table (§4.M/§4.N).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthAction {
    EmergencyExit,
    FullPause,
    ForceExit,
    PauseEntries,
    ReduceRisk,
    Continue,
}
