//! In-process paper venue adapter.
//!
//! A test collaborator, not a production exchange integration (§9: "a
//! paper-adapter test double... is explicitly in scope as a test
//! collaborator"). Orders fill according to a configurable schedule so
//! that execution-engine tests can exercise the partial-fill completion
//! loop deterministically, mirroring the way the teacher's
//! `execute_demo` path fabricates a synthetic fill without touching a
//! real exchange.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::VenueError;
use crate::types::{Balance, Fill, Side, VenuePosition};
use crate::units::{BaseQty, Bps, QuoteAmount};
use crate::venue::{OrderBookTop, OrderStatusReport, PlaceOrderAck, PlaceOrderRequest, Venue};

/// A planned sequence of partial fills for one order. An empty schedule
/// means "fill the whole requested quantity immediately".
#[derive(Debug, Clone, Default)]
pub struct FillPlan(pub Vec<BaseQty>);

struct OrderRecord {
    symbol: String,
    side: Side,
    requested_qty: BaseQty,
    filled_qty: BaseQty,
    plan: Vec<BaseQty>,
    fills: Vec<Fill>,
}

struct Inner {
    equity: QuoteAmount,
    balances: HashMap<String, Balance>,
    positions: HashMap<String, VenuePosition>,
    order_book: HashMap<String, OrderBookTop>,
    funding_rate_bps: HashMap<String, Bps>,
    orders: HashMap<String, OrderRecord>,
    pending_plans: HashMap<String, FillPlan>,
    subscribed_tickers: std::collections::HashSet<String>,
}

/// Deterministic in-memory venue simulator used across execution-engine,
/// evaluator, and worker tests.
pub struct PaperVenue {
    inner: RwLock<Inner>,
    next_order_id: AtomicU64,
    connected: std::sync::atomic::AtomicBool,
}

impl PaperVenue {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                equity: QuoteAmount::ZERO,
                balances: HashMap::new(),
                positions: HashMap::new(),
                order_book: HashMap::new(),
                funding_rate_bps: HashMap::new(),
                orders: HashMap::new(),
                pending_plans: HashMap::new(),
                subscribed_tickers: std::collections::HashSet::new(),
            }),
            next_order_id: AtomicU64::new(1),
            connected: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_equity(&self, equity: QuoteAmount) {
        self.inner.write().equity = equity;
    }

    pub fn set_balance(&self, asset: &str, balance: Balance) {
        self.inner.write().balances.insert(asset.to_string(), balance);
    }

    pub fn set_position(&self, symbol: &str, position: VenuePosition) {
        self.inner.write().positions.insert(symbol.to_string(), position);
    }

    pub fn set_order_book(&self, symbol: &str, top: OrderBookTop) {
        self.inner.write().order_book.insert(symbol.to_string(), top);
    }

    pub fn set_funding_rate_bps(&self, symbol: &str, rate: Bps) {
        self.inner.write().funding_rate_bps.insert(symbol.to_string(), rate);
    }

    /// Install a fill plan that the *next* order placed for `symbol` will
    /// follow instead of filling immediately.
    pub fn queue_fill_plan(&self, symbol: &str, plan: FillPlan) {
        self.inner.write().pending_plans.insert(symbol.to_string(), plan);
    }

    /// Advance the given order's next scheduled partial fill (no-op if
    /// the order has no remaining planned fills). Used by tests driving
    /// the partial-fill completion loop step by step.
    pub fn advance_fill(&self, venue_order_id: &str) {
        let mut inner = self.inner.write();
        if let Some(order) = inner.orders.get_mut(venue_order_id) {
            if let Some(next_qty) = order.plan.first().copied() {
                order.plan.remove(0);
                order.filled_qty = order.filled_qty + next_qty;
                order.fills.push(Fill {
                    qty: next_qty,
                    price: QuoteAmount::ZERO,
                    fee_quote: QuoteAmount::ZERO,
                    at: chrono::Utc::now(),
                });
            }
        }
    }
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Venue for PaperVenue {
    async fn connect(&self) -> Result<(), VenueError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VenueError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe_ticker(&self, symbol: &str) -> Result<(), VenueError> {
        self.inner.write().subscribed_tickers.insert(symbol.to_string());
        Ok(())
    }

    async fn unsubscribe_ticker(&self, symbol: &str) -> Result<(), VenueError> {
        self.inner.write().subscribed_tickers.remove(symbol);
        Ok(())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<OrderBookTop, VenueError> {
        self.inner
            .read()
            .order_book
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::Malformed(format!("no ticker for {symbol}")))
    }

    async fn get_account_equity(&self) -> Result<QuoteAmount, VenueError> {
        Ok(self.inner.read().equity)
    }

    async fn get_balance(&self, asset: &str) -> Result<Balance, VenueError> {
        Ok(self
            .inner
            .read()
            .balances
            .get(asset)
            .copied()
            .unwrap_or(Balance { free: BaseQty::ZERO, locked: BaseQty::ZERO }))
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<VenuePosition>, VenueError> {
        Ok(self.inner.read().positions.get(symbol).copied())
    }

    async fn get_order_book_top(&self, symbol: &str) -> Result<OrderBookTop, VenueError> {
        self.inner
            .read()
            .order_book
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::Malformed(format!("no order book for {symbol}")))
    }

    async fn get_funding_rate_bps(&self, symbol: &str) -> Result<Bps, VenueError> {
        Ok(self.inner.read().funding_rate_bps.get(symbol).copied().unwrap_or(Bps::ZERO))
    }

    async fn place_order(&self, request: PlaceOrderRequest) -> Result<PlaceOrderAck, VenueError> {
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let venue_order_id = format!("paper-{id}");

        let mut inner = self.inner.write();
        let plan = inner
            .pending_plans
            .remove(&request.symbol)
            .map(|p| p.0)
            .unwrap_or_default();

        let (filled_qty, fills) = if plan.is_empty() {
            (
                request.qty,
                vec![Fill {
                    qty: request.qty,
                    price: request.limit_price.unwrap_or(QuoteAmount::ZERO),
                    fee_quote: QuoteAmount::ZERO,
                    at: chrono::Utc::now(),
                }],
            )
        } else {
            (BaseQty::ZERO, Vec::new())
        };

        inner.orders.insert(
            venue_order_id.clone(),
            OrderRecord {
                symbol: request.symbol,
                side: request.side,
                requested_qty: request.qty,
                filled_qty,
                plan,
                fills,
            },
        );

        Ok(PlaceOrderAck { venue_order_id })
    }

    async fn cancel_order(&self, _symbol: &str, venue_order_id: &str) -> Result<(), VenueError> {
        self.inner.write().orders.remove(venue_order_id);
        Ok(())
    }

    async fn get_order_status(&self, _symbol: &str, venue_order_id: &str) -> Result<OrderStatusReport, VenueError> {
        let inner = self.inner.read();
        let order = inner
            .orders
            .get(venue_order_id)
            .ok_or_else(|| VenueError::Malformed(format!("unknown order {venue_order_id}")))?;
        Ok(OrderStatusReport {
            venue_order_id: venue_order_id.to_string(),
            filled_qty: order.filled_qty,
            remaining_qty: order.requested_qty.saturating_sub(order.filled_qty),
            fills: order.fills.clone(),
            is_done: order.filled_qty == order.requested_qty,
        })
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderStatusReport>, VenueError> {
        let inner = self.inner.read();
        Ok(inner
            .orders
            .iter()
            .filter(|(_, o)| o.symbol == symbol && o.filled_qty != o.requested_qty)
            .map(|(id, o)| OrderStatusReport {
                venue_order_id: id.clone(),
                filled_qty: o.filled_qty,
                remaining_qty: o.requested_qty.saturating_sub(o.filled_qty),
                fills: o.fills.clone(),
                is_done: false,
            })
            .collect())
    }
}
