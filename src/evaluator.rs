//! Evaluator (§4.N) — the per-tick decision pipeline. Pulls freshness,
//! derived position, risk, and strategy signals together into at most
//! one [`TradingIntent`] per tick, and submits it to the [`SerialQueue`]
//! — never more than one outstanding job at a time, so execution work
//! never overlaps with the next tick's evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::execution::ExecutionEngine;
use crate::freshness::check_freshness;
use crate::health::{decide_health_action, HealthConfig};
use crate::position_derivation::derive_position;
use crate::request_policy::RequestPolicy;
use crate::risk::{evaluate_risk, KillSwitch};
use crate::serial_queue::{JobOutcome, SerialQueue};
use crate::state_store::StateStore;
use crate::strategy::{classify_regime, generate_entry_signal, generate_exit_signal};
use crate::types::{
    Balance, Confidence, ExitReason, FundingRateHistory, FundingRateSnapshot, HealthAction, HealthSnapshot, HedgeState,
    PositionSource, Regime, RiskAction, RiskSnapshot, TradingIntent,
};
use crate::units::{Bps, QuoteAmount};
use crate::venue::Venue;

/// Map a health-driven forced exit back to the specific feed condition
/// that caused it, so the logged/recorded reason isn't a generic one.
fn health_exit_reason(health: HealthSnapshot) -> ExitReason {
    if health.ws_stale && health.rest_stale {
        ExitReason::AllFeedsDown
    } else if health.ws_stale {
        ExitReason::WsStaleWithPosition
    } else {
        ExitReason::RestFailingLowMargin
    }
}

/// What the Evaluator decided to do this tick, for observability and
/// tests — distinct from the `TradingIntent` itself, which describes
/// only the strategy signal, not what health/risk did with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    QueueBusy,
    HealthBlocked(HealthAction),
    RiskBlocked(RiskAction),
    Submitted,
    Held,
}

/// Per-symbol evaluator state that must survive across ticks: funding
/// history, the hedge's current state, its previous regime (for
/// regime-change exit detection), and when the current position opened.
struct SymbolState {
    history: FundingRateHistory,
    hedge_state: HedgeState,
    previous_regime: Option<Regime>,
    position_opened_at: Option<chrono::DateTime<Utc>>,
    entry_funding_rate_bps: Option<Bps>,
    peak_equity_quote: QuoteAmount,
}

impl SymbolState {
    fn new(symbol: &str) -> Self {
        Self {
            history: FundingRateHistory::new(symbol, 64),
            hedge_state: HedgeState::Idle,
            previous_regime: None,
            position_opened_at: None,
            entry_funding_rate_bps: None,
            peak_equity_quote: QuoteAmount::ZERO,
        }
    }
}

pub struct Evaluator {
    store: Arc<StateStore>,
    venue: Arc<dyn Venue>,
    market_data: RequestPolicy,
    execution: Arc<ExecutionEngine>,
    queue: Arc<SerialQueue>,
    kill_switch: Arc<KillSwitch>,
    config: EngineConfig,
    health_config: HealthConfig,
    symbols: RwLock<HashMap<String, SymbolState>>,
}

impl Evaluator {
    pub fn new(
        store: Arc<StateStore>,
        venue: Arc<dyn Venue>,
        execution: Arc<ExecutionEngine>,
        queue: Arc<SerialQueue>,
        kill_switch: Arc<KillSwitch>,
        config: EngineConfig,
    ) -> Self {
        let market_data = RequestPolicy::new("market-data", config.request_policy.clone());
        Self {
            store,
            venue,
            market_data,
            execution,
            queue,
            kill_switch,
            health_config: HealthConfig::default(),
            config,
            symbols: RwLock::new(HashMap::new()),
        }
    }

    /// The engine-wide kill switch, for an embedder to engage or clear
    /// from outside the tick loop (operator tooling, not a trading signal).
    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    /// Record a fresh funding-rate observation so the next tick's
    /// strategy evaluation sees it.
    pub fn observe_funding_rate(&self, symbol: &str, rate_bps: Bps, predicted_rate_bps: Option<Bps>) {
        let mut symbols = self.symbols.write();
        let entry = symbols.entry(symbol.to_string()).or_insert_with(|| SymbolState::new(symbol));
        entry.history.push(FundingRateSnapshot { rate_bps, predicted_rate_bps, at: Utc::now() });
        self.store.record_stream_update(symbol, crate::state_store::StreamKind::Funding);
    }

    /// Run one evaluation tick for the configured symbol.
    pub async fn tick(&self) -> TickOutcome {
        let symbol = self.config.symbol.clone();

        if self.queue.is_busy() {
            return TickOutcome::QueueBusy;
        }

        let health = check_freshness(&self.store, &symbol, &self.config.freshness);

        let (hedge_state, position_age_ms, entry_time, entry_funding_rate_bps) = {
            let symbols = self.symbols.read();
            match symbols.get(&symbol) {
                Some(s) => {
                    let age = s.position_opened_at.map(|t| (Utc::now() - t).num_milliseconds()).unwrap_or(0);
                    (s.hedge_state, age, s.position_opened_at, s.entry_funding_rate_bps)
                }
                None => (HedgeState::Idle, 0, None, None),
            }
        };
        let position_open = !matches!(hedge_state, HedgeState::Idle | HedgeState::Closed);

        // Health's rest-stale branch needs a margin-buffer reading, but REST
        // being stale is exactly the condition under which a fresh one can't
        // be fetched — fall back to the last reconciled/derived reading.
        let last_margin_buffer_bps =
            self.store.get_derived_position(&symbol).map(|d| d.margin_buffer_bps).unwrap_or(Bps(10_000));

        let health_action = decide_health_action(health, position_open, position_age_ms, last_margin_buffer_bps, &self.health_config);
        match health_action {
            HealthAction::EmergencyExit | HealthAction::ForceExit => {
                if position_open {
                    self.submit_exit(&symbol, health_exit_reason(health)).await;
                    return TickOutcome::Submitted;
                }
                return TickOutcome::HealthBlocked(health_action);
            }
            HealthAction::FullPause => return TickOutcome::HealthBlocked(health_action),
            HealthAction::PauseEntries | HealthAction::ReduceRisk | HealthAction::Continue => {}
        }

        let equity = match self.market_data.execute(|| self.venue.get_account_equity()).await {
            Ok(e) => e,
            Err(e) => {
                warn!(symbol, error = %e, "failed to fetch account equity, holding");
                return TickOutcome::Held;
            }
        };

        let venue_position = self.market_data.execute(|| self.venue.get_position(&symbol)).await.ok().flatten();
        let mark_price = venue_position.map(|p| p.mark_price).unwrap_or(QuoteAmount::ZERO);
        let spot_balance = self
            .market_data
            .execute(|| self.venue.get_balance(&symbol))
            .await
            .unwrap_or(Balance { free: crate::units::BaseQty::ZERO, locked: crate::units::BaseQty::ZERO });

        let derived = derive_position(
            venue_position,
            spot_balance,
            crate::units::BaseQty::ZERO,
            mark_price,
            equity,
            entry_time,
            entry_funding_rate_bps,
            PositionSource::Derived,
        );
        self.store.set_derived_position(&symbol, derived);

        let peak_equity_quote = {
            let mut symbols = self.symbols.write();
            let entry = symbols.entry(symbol.clone()).or_insert_with(|| SymbolState::new(&symbol));
            entry.peak_equity_quote = entry.peak_equity_quote.max(equity);
            entry.peak_equity_quote
        };

        let risk_snapshot = self.kill_switch.apply(RiskSnapshot {
            position_open,
            position_notional_quote: derived.notional_quote,
            account_equity_quote: equity,
            margin_used_quote: derived.margin_used_quote,
            margin_utilization_bps: derived.margin_utilization_bps,
            liquidation_distance_bps: derived.liquidation_distance_bps,
            daily_realized_pnl_quote: QuoteAmount::ZERO,
            peak_equity_quote,
            kill_switch_engaged: false,
        });

        let assessment = evaluate_risk(risk_snapshot, &self.config.risk);
        match assessment.action {
            RiskAction::Block => return TickOutcome::RiskBlocked(assessment.action),
            RiskAction::Exit => {
                if position_open {
                    self.submit_exit(&symbol, ExitReason::Risk).await;
                    return TickOutcome::Submitted;
                }
                return TickOutcome::RiskBlocked(assessment.action);
            }
            RiskAction::Pause => return TickOutcome::RiskBlocked(assessment.action),
            RiskAction::Allow => {}
        }

        if position_open {
            let (history_snapshot, previous_regime) = {
                let symbols = self.symbols.read();
                let s = symbols.get(&symbol).expect("position_open implies symbol state exists");
                (s.history.clone(), s.previous_regime)
            };
            // Refresh the stored regime every tick so the next tick's
            // `generate_exit_signal` call compares against what the regime
            // was one tick ago, not just at entry.
            let current_regime = classify_regime(&history_snapshot, &self.config.strategy);
            {
                let mut symbols = self.symbols.write();
                if let Some(s) = symbols.get_mut(&symbol) {
                    s.previous_regime = Some(current_regime);
                }
            }
            if let Some(intent) = generate_exit_signal(&symbol, &history_snapshot, &self.config.strategy, previous_regime, Bps::ZERO) {
                if let TradingIntent::ExitHedge { reason, .. } = intent {
                    self.submit_exit(&symbol, reason).await;
                    return TickOutcome::Submitted;
                }
            }
            return TickOutcome::Held;
        }

        if matches!(health_action, HealthAction::PauseEntries) {
            return TickOutcome::HealthBlocked(health_action);
        }

        let max_size = assessment.max_additional_size_quote.min(self.config.risk.max_position_size_quote());
        let intent = {
            let symbols = self.symbols.read();
            match symbols.get(&symbol) {
                Some(s) => generate_entry_signal(&symbol, &s.history, &self.config.strategy, max_size),
                None => TradingIntent::Hold,
            }
        };

        match intent {
            TradingIntent::EnterHedge { size_quote, confidence, .. } => {
                self.submit_entry(&symbol, size_quote, confidence).await;
                TickOutcome::Submitted
            }
            _ => TickOutcome::Held,
        }
    }

    async fn submit_entry(&self, symbol: &str, size_quote: QuoteAmount, confidence: Confidence) {
        let entry_rate_bps = {
            let symbols = self.symbols.read();
            symbols.get(symbol).and_then(|s| s.history.latest()).map(|snap| snap.rate_bps)
        };
        let symbol = symbol.to_string();
        let spot_asset = format!("{symbol}-SPOT");
        let execution = self.execution.clone();
        let intent_id = uuid::Uuid::new_v4().to_string();

        info!(symbol, %size_quote, ?confidence, "submitting hedge entry");
        let result = self.queue.submit(move |_token| {
            let execution = execution.clone();
            let symbol = symbol.clone();
            async move {
                match execution.enter_hedge(&intent_id, &symbol, &spot_asset, size_quote, HedgeState::Idle).await {
                    Ok(_) => JobOutcome::Completed,
                    Err(e) => JobOutcome::Failed(e.to_string()),
                }
            }
        });

        if result.is_err() {
            warn!(symbol, "entry submission rejected, queue busy");
        } else {
            let mut symbols = self.symbols.write();
            let entry = symbols.entry(symbol.clone()).or_insert_with(|| SymbolState::new(&symbol));
            entry.hedge_state = HedgeState::Active;
            entry.position_opened_at = Some(Utc::now());
            entry.previous_regime = None;
            entry.entry_funding_rate_bps = entry_rate_bps;
        }
    }

    async fn submit_exit(&self, symbol: &str, reason: ExitReason) {
        let symbol_owned = symbol.to_string();
        let spot_asset = format!("{symbol_owned}-SPOT");
        let execution = self.execution.clone();
        let intent_id = uuid::Uuid::new_v4().to_string();
        let qty = self
            .store
            .get_derived_position(symbol)
            .map(|d| d.perp_qty.abs())
            .unwrap_or(crate::units::BaseQty::ZERO);

        info!(symbol, ?reason, "submitting hedge exit");
        let result = self.queue.submit(move |_token| {
            let execution = execution.clone();
            let symbol = symbol_owned.clone();
            async move {
                match execution.exit_hedge(&intent_id, &symbol, &spot_asset, qty, HedgeState::Active).await {
                    Ok(_) => JobOutcome::Completed,
                    Err(e) => JobOutcome::Failed(e.to_string()),
                }
            }
        });

        if result.is_err() {
            warn!(symbol, "exit submission rejected, queue busy");
        } else {
            let mut symbols = self.symbols.write();
            if let Some(entry) = symbols.get_mut(symbol) {
                entry.hedge_state = HedgeState::Closed;
                entry.position_opened_at = None;
                entry.entry_funding_rate_bps = None;
            }
        }
    }
}
