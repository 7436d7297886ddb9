//! Execution Engine (§4.K) — places and confirms both legs of a
//! delta-neutral hedge (perp short + spot long) and keeps them in sync.
//!
//! Grounded in the teacher's risk-precheck-then-dispatch shape, reworked
//! around the [`Venue`] trait. Order placement goes through its own
//! [`RequestPolicy`] instance, configured more conservatively (lower
//! failure threshold, fewer retries) than the one used for routine reads
//! — a stuck order book poll can retry patiently, a stuck order
//! placement cannot.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ExecutionConfig;
use crate::errors::ExecutionError;
use crate::hedge_sm::{self, HedgeEvent};
use crate::order_sm::{self, OrderEvent};
use crate::request_policy::{CircuitBreakerSnapshot, RequestPolicy};
use crate::state_store::StateStore;
use crate::types::{HedgeState, Leg, ManagedOrder, Side};
use crate::units::{notional, BaseQty, Bps, QuoteAmount, RoundingMode, SCALE};
use crate::venue::{PlaceOrderRequest, Venue};

fn execution_policy_config(config: &ExecutionConfig) -> crate::config::RequestPolicyConfig {
    crate::config::RequestPolicyConfig {
        max_retries: 2,
        base_backoff_ms: 100,
        max_backoff_ms: 1_000,
        breaker_failure_threshold: config.breaker_failure_threshold,
        breaker_success_threshold: config.breaker_success_threshold,
        breaker_timeout_ms: config.breaker_timeout_ms,
        token_bucket_capacity: 50,
        token_bucket_refill_per_sec: 10,
        token_wait_timeout_ms: 500,
    }
}

fn qty_from_notional(size_quote: QuoteAmount, price: QuoteAmount) -> BaseQty {
    if price.is_zero() {
        return BaseQty::ZERO;
    }
    let raw = (size_quote.raw() * SCALE) / price.raw();
    BaseQty::from_raw(raw)
}

/// Places and reconciles both legs of a hedge through a venue, guarding
/// entry against excess slippage and watching for post-fill drift
/// between the two legs.
pub struct ExecutionEngine {
    venue: Arc<dyn Venue>,
    breaker: RequestPolicy,
    store: Arc<StateStore>,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(venue: Arc<dyn Venue>, store: Arc<StateStore>, config: ExecutionConfig) -> Self {
        let breaker = RequestPolicy::new("execution", execution_policy_config(&config));
        Self { venue, breaker, store, config }
    }

    /// Reject entry if the venue's top-of-book spread already exceeds
    /// the configured guard.
    async fn check_slippage_guard(&self, symbol: &str) -> Result<QuoteAmount, ExecutionError> {
        let top = self.breaker.execute(|| self.venue.get_order_book_top(symbol)).await?;
        let spread = top.best_ask.checked_sub(top.best_bid).unwrap_or(QuoteAmount::ZERO);
        let spread_bps = Bps::ratio(spread, top.best_bid, RoundingMode::Ceil, Bps(10_000));
        if spread_bps.0 > self.config.slippage_guard_bps {
            return Err(ExecutionError::SlippageExceeded {
                estimated: spread_bps.0,
                guard: self.config.slippage_guard_bps,
            });
        }
        Ok(top.best_ask)
    }

    /// Place one leg and drive it through the partial-fill completion
    /// loop until it is done or the fill timeout is exhausted.
    ///
    /// The ack itself is bounded by `ack_timeout_ms`; once acked, the
    /// engine polls for fills at a fixed cadence for up to
    /// `fill_timeout_ms` total. If the leg is still not done at that
    /// point, it places up to `max_partial_fill_retries` additional
    /// market orders for the unfilled remainder before giving up and
    /// canceling the leg via [`OrderEvent::Timeout`].
    async fn place_and_confirm_leg(
        &self,
        intent_id: &str,
        leg: Leg,
        symbol: &str,
        side: Side,
        qty: BaseQty,
        limit_price: Option<QuoteAmount>,
    ) -> Result<ManagedOrder, ExecutionError> {
        const POLL_INTERVAL: Duration = Duration::from_millis(100);

        let mut order = ManagedOrder::new(intent_id, leg, symbol, side, qty, limit_price);
        order_sm::apply_event(&mut order, OrderEvent::Submit, &self.store, intent_id)?;

        let ack_result = tokio::time::timeout(
            Duration::from_millis(self.config.ack_timeout_ms),
            self.breaker.execute(|| {
                self.venue.place_order(PlaceOrderRequest {
                    symbol: symbol.to_string(),
                    side,
                    qty,
                    limit_price,
                })
            }),
        )
        .await;

        let ack = match ack_result {
            Ok(result) => result?,
            Err(_) => {
                warn!(intent_id, symbol, "order ack timed out");
                order_sm::apply_event(&mut order, OrderEvent::Timeout, &self.store, intent_id)?;
                self.store.upsert_order(order.clone());
                return Err(ExecutionError::PartialExecution(format!("{symbol} leg never acked within timeout")));
            }
        };
        order_sm::apply_event(&mut order, OrderEvent::Ack, &self.store, intent_id)?;
        self.store.upsert_order(order.clone());

        let max_polls = (self.config.fill_timeout_ms / POLL_INTERVAL.as_millis() as u64).max(1) as u32;
        let mut venue_order_id = ack.venue_order_id;

        for attempt in 0..max_polls {
            let status = self.breaker.execute(|| self.venue.get_order_status(symbol, &venue_order_id)).await?;

            if status.filled_qty.raw() > order.filled_qty.raw() {
                order.filled_qty = status.filled_qty;
                let event = if status.is_done { OrderEvent::Fill } else { OrderEvent::PartialFill };
                order_sm::apply_event(&mut order, event, &self.store, intent_id)?;
                self.store.upsert_order(order.clone());
            }

            if status.is_done {
                return Ok(order);
            }

            if attempt + 1 == max_polls {
                return self.retry_partial_remainder(intent_id, symbol, side, limit_price, &mut order, &mut venue_order_id).await;
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Ok(order)
    }

    /// Place additional market orders for whatever remains unfilled after
    /// the fill-timeout poll loop gives up, up to `max_partial_fill_retries`
    /// attempts. Cancels and times out the leg if the remainder still
    /// isn't filled after exhausting those attempts.
    async fn retry_partial_remainder(
        &self,
        intent_id: &str,
        symbol: &str,
        side: Side,
        limit_price: Option<QuoteAmount>,
        order: &mut ManagedOrder,
        venue_order_id: &mut String,
    ) -> Result<ManagedOrder, ExecutionError> {
        for retry in 0..self.config.max_partial_fill_retries {
            let remaining = order.remaining_qty();
            if remaining.is_zero() {
                break;
            }

            warn!(intent_id, symbol, retry, remaining = %remaining, "placing remainder order after fill timeout");
            let ack = self
                .breaker
                .execute(|| {
                    self.venue.place_order(PlaceOrderRequest {
                        symbol: symbol.to_string(),
                        side,
                        qty: remaining,
                        limit_price,
                    })
                })
                .await?;
            *venue_order_id = ack.venue_order_id;

            let status = self.breaker.execute(|| self.venue.get_order_status(symbol, venue_order_id)).await?;
            if status.filled_qty.raw() > 0 {
                order.filled_qty = order.filled_qty + status.filled_qty;
                let event = if order.filled_qty.raw() >= order.requested_qty.raw() { OrderEvent::Fill } else { OrderEvent::PartialFill };
                order_sm::apply_event(order, event, &self.store, intent_id)?;
                self.store.upsert_order(order.clone());
            }

            if order.filled_qty.raw() >= order.requested_qty.raw() {
                return Ok(order.clone());
            }
        }

        warn!(intent_id, symbol, "leg left at partial execution after exhausting remainder retries");
        order_sm::apply_event(order, OrderEvent::Timeout, &self.store, intent_id)?;
        self.store.upsert_order(order.clone());
        Err(ExecutionError::PartialExecution(format!("{symbol} leg filled {}/{}", order.filled_qty, order.requested_qty)))
    }

    /// Enter a hedge: slippage-guard check, perp leg, spot leg, then a
    /// drift check between the two confirmed fills.
    pub async fn enter_hedge(
        &self,
        intent_id: &str,
        symbol: &str,
        spot_asset: &str,
        size_quote: QuoteAmount,
        mut hedge_state: HedgeState,
    ) -> Result<(HedgeState, ManagedOrder, ManagedOrder), ExecutionError> {
        let ask = self.check_slippage_guard(symbol).await?;
        let qty = qty_from_notional(size_quote, ask);

        hedge_state = hedge_sm::apply_event(intent_id, hedge_state, HedgeEvent::StartEntry, &self.store, intent_id)?;

        let perp_order = self.place_and_confirm_leg(intent_id, Leg::Perp, symbol, Side::Sell, qty, Some(ask)).await?;
        hedge_state = hedge_sm::apply_event(intent_id, hedge_state, HedgeEvent::PerpLegFilled, &self.store, intent_id)?;

        let spot_order = self.place_and_confirm_leg(intent_id, Leg::Spot, spot_asset, Side::Buy, qty, Some(ask)).await?;
        hedge_state = hedge_sm::apply_event(intent_id, hedge_state, HedgeEvent::SpotLegFilled, &self.store, intent_id)?;

        self.check_hedge_drift(&perp_order, &spot_order)?;

        info!(intent_id, symbol, "hedge entered");
        Ok((hedge_state, perp_order, spot_order))
    }

    /// Unwind a hedge: spot leg first, then perp leg (mirror of entry).
    pub async fn exit_hedge(
        &self,
        intent_id: &str,
        symbol: &str,
        spot_asset: &str,
        perp_qty: BaseQty,
        mut hedge_state: HedgeState,
    ) -> Result<HedgeState, ExecutionError> {
        let ask = self.check_slippage_guard(symbol).await?;

        hedge_state = hedge_sm::apply_event(intent_id, hedge_state, HedgeEvent::StartExit, &self.store, intent_id)?;

        self.place_and_confirm_leg(intent_id, Leg::Spot, spot_asset, Side::Sell, perp_qty, Some(ask)).await?;
        hedge_state = hedge_sm::apply_event(intent_id, hedge_state, HedgeEvent::SpotLegExited, &self.store, intent_id)?;

        self.place_and_confirm_leg(intent_id, Leg::Perp, symbol, Side::Buy, perp_qty, Some(ask)).await?;
        hedge_state = hedge_sm::apply_event(intent_id, hedge_state, HedgeEvent::PerpLegExited, &self.store, intent_id)?;

        info!(intent_id, symbol, "hedge exited");
        Ok(hedge_state)
    }

    /// Read the dedicated execution breaker's current state, for the
    /// observability surface named in §6.
    pub fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Compare confirmed fills between legs; a drift beyond tolerance is
    /// reported but does not itself unwind the hedge — callers decide
    /// whether to issue a corrective order or escalate to an exit,
    /// which may re-enter [`Self::place_and_confirm_leg`]'s completion
    /// loop.
    fn check_hedge_drift(&self, perp: &ManagedOrder, spot: &ManagedOrder) -> Result<(), ExecutionError> {
        let perp_notional = notional(perp.filled_qty, perp.limit_price.unwrap_or(QuoteAmount::ZERO), RoundingMode::Ceil);
        let spot_notional = notional(spot.filled_qty, spot.limit_price.unwrap_or(QuoteAmount::ZERO), RoundingMode::Ceil);
        let diff = QuoteAmount((perp_notional.raw() - spot_notional.raw()).abs());
        let denom = QuoteAmount(perp_notional.raw().max(spot_notional.raw()).max(1));
        let drift_bps = Bps::ratio(diff, denom, RoundingMode::Ceil, Bps::ZERO);

        if drift_bps.0 > self.config.hedge_drift_tolerance_bps {
            return Err(ExecutionError::BusinessRuleViolation(format!(
                "hedge drift {drift_bps} exceeds tolerance {}bps",
                self.config.hedge_drift_tolerance_bps
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::paper::{FillPlan, PaperVenue};
    use crate::venue::OrderBookTop;

    fn engine(venue: Arc<PaperVenue>, store: Arc<StateStore>) -> ExecutionEngine {
        ExecutionEngine::new(venue, store, ExecutionConfig::default())
    }

    #[tokio::test]
    async fn enter_hedge_succeeds_with_tight_spread_and_immediate_fills() {
        let venue = Arc::new(PaperVenue::new());
        venue.set_order_book("BTCUSDT", OrderBookTop { best_bid: QuoteAmount(50_000 * SCALE), best_ask: QuoteAmount(50_005 * SCALE) });
        let store = Arc::new(StateStore::new());
        let engine = engine(venue, store);

        let result = engine
            .enter_hedge("intent-1", "BTCUSDT", "BTCUSDT-SPOT", QuoteAmount(10_000 * SCALE), HedgeState::Idle)
            .await
            .unwrap();
        assert_eq!(result.0, HedgeState::Active);
    }

    #[tokio::test]
    async fn enter_hedge_rejects_on_wide_spread() {
        let venue = Arc::new(PaperVenue::new());
        venue.set_order_book("BTCUSDT", OrderBookTop { best_bid: QuoteAmount(50_000 * SCALE), best_ask: QuoteAmount(55_000 * SCALE) });
        let store = Arc::new(StateStore::new());
        let engine = engine(venue, store);

        let result = engine
            .enter_hedge("intent-1", "BTCUSDT", "BTCUSDT-SPOT", QuoteAmount(10_000 * SCALE), HedgeState::Idle)
            .await;
        assert!(matches!(result, Err(ExecutionError::SlippageExceeded { .. })));
    }

    #[tokio::test]
    async fn scenario_s3_partial_fill_completes_across_polls() {
        // ask = 50,000 and size = 50,000 quote -> exactly 1.0 BTC (1e8 sats)
        // requested, matching the 60M + 40M fill plan below exactly.
        let venue = Arc::new(PaperVenue::new());
        venue.set_order_book("BTCUSDT", OrderBookTop { best_bid: QuoteAmount(49_995 * SCALE), best_ask: QuoteAmount(50_000 * SCALE) });
        venue.queue_fill_plan("BTCUSDT", FillPlan(vec![BaseQty(60_000_000), BaseQty(40_000_000)]));
        let store = Arc::new(StateStore::new());
        let engine = engine(venue.clone(), store);

        let venue_for_task = venue.clone();
        let driver = tokio::spawn(async move {
            for _ in 0..2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let orders = venue_for_task.get_open_orders("BTCUSDT").await.unwrap();
                if let Some(order) = orders.first() {
                    venue_for_task.advance_fill(&order.venue_order_id);
                }
            }
        });

        let result = engine
            .enter_hedge("intent-1", "BTCUSDT", "BTCUSDT-SPOT", QuoteAmount(50_000 * SCALE), HedgeState::Idle)
            .await
            .unwrap();
        driver.await.unwrap();
        assert_eq!(result.0, HedgeState::Active);
        assert_eq!(result.1.filled_qty, BaseQty(100_000_000));
    }

    #[tokio::test]
    async fn remainder_order_completes_leg_after_fill_timeout() {
        let venue = Arc::new(PaperVenue::new());
        venue.set_order_book("BTCUSDT", OrderBookTop { best_bid: QuoteAmount(49_995 * SCALE), best_ask: QuoteAmount(50_000 * SCALE) });
        venue.queue_fill_plan("BTCUSDT", FillPlan(vec![BaseQty(60_000_000)]));
        let store = Arc::new(StateStore::new());
        let config = ExecutionConfig { fill_timeout_ms: 250, max_partial_fill_retries: 1, ..ExecutionConfig::default() };
        let engine = ExecutionEngine::new(venue.clone(), store, config);

        let venue_for_task = venue.clone();
        let driver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let orders = venue_for_task.get_open_orders("BTCUSDT").await.unwrap();
            if let Some(order) = orders.first() {
                venue_for_task.advance_fill(&order.venue_order_id);
            }
        });

        let result = engine
            .enter_hedge("intent-1", "BTCUSDT", "BTCUSDT-SPOT", QuoteAmount(50_000 * SCALE), HedgeState::Idle)
            .await
            .unwrap();
        driver.await.unwrap();
        assert_eq!(result.0, HedgeState::Active);
        // 60M filled by the original order, 40M by the retry's remainder order.
        assert_eq!(result.1.filled_qty, BaseQty(100_000_000));
    }

    #[tokio::test]
    async fn leg_times_out_after_exhausting_remainder_retries() {
        let venue = Arc::new(PaperVenue::new());
        venue.set_order_book("BTCUSDT", OrderBookTop { best_bid: QuoteAmount(49_995 * SCALE), best_ask: QuoteAmount(50_000 * SCALE) });
        venue.queue_fill_plan("BTCUSDT", FillPlan(vec![BaseQty(60_000_000)]));
        let store = Arc::new(StateStore::new());
        let config = ExecutionConfig { fill_timeout_ms: 250, max_partial_fill_retries: 0, ..ExecutionConfig::default() };
        let engine = ExecutionEngine::new(venue.clone(), store, config);

        let venue_for_task = venue.clone();
        let driver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let orders = venue_for_task.get_open_orders("BTCUSDT").await.unwrap();
            if let Some(order) = orders.first() {
                venue_for_task.advance_fill(&order.venue_order_id);
            }
        });

        let result = engine
            .enter_hedge("intent-1", "BTCUSDT", "BTCUSDT-SPOT", QuoteAmount(50_000 * SCALE), HedgeState::Idle)
            .await;
        driver.await.unwrap();
        assert!(matches!(result, Err(ExecutionError::PartialExecution(_))));
    }
}
