//! Position Derivation (§4.E) — combines the exchange-reported perp
//! position, the spot balance, any pending (not-yet-confirmed) fills, and
//! the current mark price into a single [`DerivedPosition`].
//!
//! Every ratio here is risk-increasing (notional, margin utilization) or
//! safety-reporting (liquidation distance, margin buffer); per the
//! crate-wide rounding invariant, risk-increasing quantities always round
//! up and safety-reporting quantities always round down, so derived state
//! never understates the engine's actual exposure.

use chrono::{DateTime, Utc};

use crate::types::{Balance, DerivedPosition, PositionSource, Side, VenuePosition};
use crate::units::{notional, BaseQty, Bps, QuoteAmount, RoundingMode};

const FULL_DISTANCE_BPS: Bps = Bps(10_000);

fn clamp_bps(value: Bps) -> Bps {
    Bps(value.0.clamp(0, 10_000))
}

/// Derive the combined position view for one symbol.
///
/// `pending_perp_fills` is the signed quantity of fills the Execution
/// Engine has observed but the venue's REST position snapshot has not yet
/// reflected (positive = additional long, negative = additional short).
/// `entry_time`/`entry_funding_rate_bps` come from whatever opened the
/// current hedge (the Evaluator tracks them per symbol) since the venue's
/// position snapshot alone doesn't carry them.
pub fn derive_position(
    perp: Option<VenuePosition>,
    spot_balance: Balance,
    pending_perp_fills: BaseQty,
    mark_price: QuoteAmount,
    account_equity: QuoteAmount,
    entry_time: Option<DateTime<Utc>>,
    entry_funding_rate_bps: Option<Bps>,
    source: PositionSource,
) -> DerivedPosition {
    let reported_perp_qty = perp.map(|p| p.qty).unwrap_or(BaseQty::ZERO);
    let perp_qty = reported_perp_qty + pending_perp_fills;
    let spot_qty = spot_balance.total();
    let open = perp_qty.raw() != 0;

    let side = if perp_qty.raw() > 0 {
        Some(Side::Buy)
    } else if perp_qty.raw() < 0 {
        Some(Side::Sell)
    } else {
        None
    };

    let notional_quote = notional(perp_qty.abs(), mark_price, RoundingMode::Ceil);

    let unrealized_pnl_quote = match perp {
        Some(p) => {
            let entry_notional = notional(perp_qty.abs(), p.entry_price, RoundingMode::Floor);
            if perp_qty.raw() >= 0 {
                notional_quote - entry_notional
            } else {
                entry_notional - notional_quote
            }
        }
        None => QuoteAmount::ZERO,
    };

    // Margin used is approximated as the full notional: the engine does
    // not track venue-side leverage settings independently, so treating
    // every unit of notional as margin-consuming never understates
    // utilization.
    let margin_used_quote = notional_quote;
    let margin_utilization_bps = Bps::ratio(notional_quote, account_equity, RoundingMode::Ceil, FULL_DISTANCE_BPS);

    let liquidation_distance_bps = match perp.and_then(|p| p.liquidation_price) {
        Some(liq) => {
            let diff = if mark_price.raw() >= liq.raw() { mark_price - liq } else { liq - mark_price };
            clamp_bps(Bps::ratio(diff, mark_price, RoundingMode::Floor, Bps::ZERO))
        }
        None => FULL_DISTANCE_BPS,
    };

    let margin_buffer_bps = clamp_bps(Bps(10_000 - margin_utilization_bps.0));

    DerivedPosition {
        open,
        side,
        perp_qty,
        spot_qty,
        notional_quote,
        unrealized_pnl_quote,
        entry_time,
        entry_price_quote: perp.map(|p| p.entry_price),
        entry_funding_rate_bps,
        mark_price_quote: mark_price,
        funding_accrued_quote: QuoteAmount::ZERO,
        margin_used_quote,
        margin_utilization_bps,
        liquidation_distance_bps,
        margin_buffer_bps,
        source,
        as_of: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::SCALE;

    fn qty(whole: i128) -> BaseQty {
        BaseQty(whole * SCALE)
    }
    fn quote(whole: i128) -> QuoteAmount {
        QuoteAmount(whole * SCALE)
    }

    #[test]
    fn no_venue_position_yields_zero_notional() {
        let derived = derive_position(
            None,
            Balance { free: BaseQty::ZERO, locked: BaseQty::ZERO },
            BaseQty::ZERO,
            quote(50_000),
            quote(10_000),
            None,
            None,
            PositionSource::Derived,
        );
        assert_eq!(derived.notional_quote, QuoteAmount::ZERO);
        assert_eq!(derived.unrealized_pnl_quote, QuoteAmount::ZERO);
        assert!(!derived.open);
        assert!(derived.side.is_none());
    }

    #[test]
    fn short_perp_position_notional_is_absolute_value() {
        let perp = VenuePosition {
            qty: qty(-1),
            entry_price: quote(50_000),
            mark_price: quote(49_000),
            liquidation_price: Some(quote(60_000)),
        };
        let derived = derive_position(
            Some(perp),
            Balance { free: BaseQty::ZERO, locked: BaseQty::ZERO },
            BaseQty::ZERO,
            quote(49_000),
            quote(10_000),
            None,
            None,
            PositionSource::Rest,
        );
        assert_eq!(derived.notional_quote, quote(49_000));
        assert!(derived.open);
        assert_eq!(derived.side, Some(crate::types::Side::Sell));
        // Short position profits as price falls below entry.
        assert!(derived.unrealized_pnl_quote.raw() > 0);
    }

    #[test]
    fn pending_fills_adjust_derived_qty_before_rest_catches_up() {
        let derived = derive_position(
            None,
            Balance { free: BaseQty::ZERO, locked: BaseQty::ZERO },
            qty(-1),
            quote(50_000),
            quote(10_000),
            None,
            None,
            PositionSource::Derived,
        );
        assert_eq!(derived.perp_qty, qty(-1));
        assert_eq!(derived.notional_quote, quote(50_000));
    }

    #[test]
    fn liquidation_distance_defaults_to_full_buffer_without_liquidation_price() {
        let perp = VenuePosition {
            qty: qty(1),
            entry_price: quote(50_000),
            mark_price: quote(50_000),
            liquidation_price: None,
        };
        let derived = derive_position(
            Some(perp),
            Balance { free: BaseQty::ZERO, locked: BaseQty::ZERO },
            BaseQty::ZERO,
            quote(50_000),
            quote(10_000),
            None,
            None,
            PositionSource::Rest,
        );
        assert_eq!(derived.liquidation_distance_bps, Bps(10_000));
    }
}
