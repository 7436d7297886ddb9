//! Venue Interface (§4.B) — a narrow async trait every concrete exchange
//! adapter implements, and the in-process paper adapter test double
//! (`paper`) that satisfies it for development and testing. A real
//! exchange adapter (HMAC-signed REST client, websocket feed) is out of
//! scope for this crate; see `spec.md` §1.

pub mod paper;

use async_trait::async_trait;

use crate::errors::VenueError;
use crate::types::{Balance, Fill, Side, VenuePosition};
use crate::units::{BaseQty, QuoteAmount};

/// A request to place an order on one leg of the hedge.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub qty: BaseQty,
    pub limit_price: Option<QuoteAmount>,
}

/// Venue's acknowledgement of an order placement.
#[derive(Debug, Clone)]
pub struct PlaceOrderAck {
    pub venue_order_id: String,
}

/// Current status of an order as reported by the venue.
#[derive(Debug, Clone)]
pub struct OrderStatusReport {
    pub venue_order_id: String,
    pub filled_qty: BaseQty,
    pub remaining_qty: BaseQty,
    pub fills: Vec<Fill>,
    pub is_done: bool,
}

/// Top-of-book snapshot used for slippage estimation.
#[derive(Debug, Clone, Copy)]
pub struct OrderBookTop {
    pub best_bid: QuoteAmount,
    pub best_ask: QuoteAmount,
}

/// Narrow polymorphic interface every concrete venue adapter implements
/// (§4.B). All monetary/quantity fields are integer-unit types per the
/// crate-wide "no floats in any decision path" invariant.
#[async_trait]
pub trait Venue: Send + Sync {
    /// Establish the venue connection (REST auth, websocket handshake).
    /// Idempotent: calling it again while already connected is a no-op.
    async fn connect(&self) -> Result<(), VenueError>;
    /// Tear down the venue connection. Idempotent.
    async fn disconnect(&self) -> Result<(), VenueError>;
    fn is_connected(&self) -> bool;

    async fn subscribe_ticker(&self, symbol: &str) -> Result<(), VenueError>;
    async fn unsubscribe_ticker(&self, symbol: &str) -> Result<(), VenueError>;
    async fn get_ticker(&self, symbol: &str) -> Result<OrderBookTop, VenueError>;

    async fn get_account_equity(&self) -> Result<QuoteAmount, VenueError>;
    async fn get_balance(&self, asset: &str) -> Result<Balance, VenueError>;
    async fn get_position(&self, symbol: &str) -> Result<Option<VenuePosition>, VenueError>;
    async fn get_order_book_top(&self, symbol: &str) -> Result<OrderBookTop, VenueError>;
    async fn get_funding_rate_bps(&self, symbol: &str) -> Result<crate::units::Bps, VenueError>;

    async fn place_order(&self, request: PlaceOrderRequest) -> Result<PlaceOrderAck, VenueError>;
    async fn cancel_order(&self, symbol: &str, venue_order_id: &str) -> Result<(), VenueError>;
    async fn get_order_status(&self, symbol: &str, venue_order_id: &str) -> Result<OrderStatusReport, VenueError>;
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderStatusReport>, VenueError>;
}
