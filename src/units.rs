//! Integer-only unit types for the trading core.
//!
//! Every quantity that feeds a sizing, risk, or P&L decision is represented
//! as a signed 128-bit integer scaled by a fixed exponent, never as a float.
//! `BaseQty` and `QuoteAmount` carry a scale of 10^8 (satoshi-like base
//! units, micro-quote units); `Bps` is a plain integer count of basis
//! points (1 bps = 1/10000). Conversions between scales always go through
//! an explicit rounding mode so that "rounding never favors more risk" is a
//! property of the call site, not an accident of `From`/`Into`.

use std::fmt;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Number of decimal places carried by [`BaseQty`] and [`QuoteAmount`].
pub const SCALE_EXPONENT: u32 = 8;
/// `10^SCALE_EXPONENT`, the divisor between a whole unit and its smallest
/// represented fraction.
pub const SCALE: i128 = 100_000_000;

/// Rounding direction for a division that cannot be represented exactly.
///
/// `Ceil` never under-counts risk (leverage, utilization); `Floor` never
/// over-counts capacity (max position size, available margin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    Ceil,
    Floor,
}

fn div_rounded(numerator: i128, denominator: i128, mode: RoundingMode) -> i128 {
    assert!(denominator != 0, "division by zero in unit conversion");
    let q = numerator / denominator;
    let r = numerator % denominator;
    if r == 0 {
        return q;
    }
    // Same-sign remainder means truncation rounded toward zero; adjust
    // according to the requested mode and the sign of the result.
    let positive = (numerator >= 0) == (denominator >= 0);
    match (mode, positive) {
        (RoundingMode::Ceil, true) => q + 1,
        (RoundingMode::Floor, false) => q - 1,
        _ => q,
    }
}

macro_rules! scaled_amount {
    ($name:ident, $unit:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i128);

        impl $name {
            pub const ZERO: $name = $name(0);

            pub fn from_raw(raw: i128) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> i128 {
                self.0
            }

            pub fn is_zero(self) -> bool {
                self.0 == 0
            }

            pub fn is_negative(self) -> bool {
                self.0 < 0
            }

            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            pub fn checked_add(self, other: Self) -> Option<Self> {
                self.0.checked_add(other.0).map(Self)
            }

            pub fn checked_sub(self, other: Self) -> Option<Self> {
                self.0.checked_sub(other.0).map(Self)
            }

            pub fn saturating_sub(self, other: Self) -> Self {
                Self(self.0.saturating_sub(other.0))
            }

            /// Multiply by a basis-point ratio, rounding per `mode`.
            pub fn mul_bps(self, bps: Bps, mode: RoundingMode) -> Self {
                let numerator = self.0 * bps.0 as i128;
                Self(div_rounded(numerator, 10_000, mode))
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let whole = self.0 / SCALE;
                let frac = (self.0 % SCALE).abs();
                write!(f, "{}.{:08}{}", whole, frac, $unit)
            }
        }
    };
}

scaled_amount!(BaseQty, "");
scaled_amount!(QuoteAmount, "");

/// Basis points (1/10000). Used for rates, tolerances, and ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Bps(pub i64);

impl Bps {
    pub const ZERO: Bps = Bps(0);

    /// Ratio of `numerator` to `denominator`, expressed in bps, rounded per
    /// `mode`. Used for leverage, margin utilization, and drift checks —
    /// all of which must round away from safety per the "never favors more
    /// risk" invariant at their call sites. `zero_denominator` is returned
    /// verbatim when `denominator` is zero, since the safe default differs
    /// by call site (e.g. margin utilization reports full utilization
    /// against zero equity; a drift ratio reports zero drift against two
    /// zero-sized legs).
    pub fn ratio(numerator: QuoteAmount, denominator: QuoteAmount, mode: RoundingMode, zero_denominator: Bps) -> Self {
        if denominator.0 == 0 {
            return zero_denominator;
        }
        let numerator_scaled = numerator.0 * 10_000;
        Bps(div_rounded(numerator_scaled, denominator.0, mode) as i64)
    }
}

impl Add for Bps {
    type Output = Bps;
    fn add(self, rhs: Bps) -> Bps {
        Bps(self.0 + rhs.0)
    }
}

impl Sub for Bps {
    type Output = Bps;
    fn sub(self, rhs: Bps) -> Bps {
        Bps(self.0 - rhs.0)
    }
}

impl Neg for Bps {
    type Output = Bps;
    fn neg(self) -> Bps {
        Bps(-self.0)
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

/// Price expressed as quote units per one whole base unit, same scale as
/// [`QuoteAmount`]. Kept distinct so `notional = qty * price / SCALE` reads
/// unambiguously at call sites.
pub fn notional(qty: BaseQty, price: QuoteAmount, mode: RoundingMode) -> QuoteAmount {
    let numerator = qty.0 * price.0;
    QuoteAmount(div_rounded(numerator, SCALE, mode))
}
