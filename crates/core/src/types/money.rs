//! Money helpers using decimal arithmetic.
//!
//! All monetary values in the system are [`Decimal`] amounts in the
//! currency's standard unit (dollars, not cents). Every derived amount is
//! rounded to two decimal places at the point of computation with standard
//! round-half-up, so `25.50 * 0.15 = 3.825` becomes `3.83` before it is
//! used anywhere else. Totals are sums of already-rounded parts, never a
//! single rounding of an unrounded accumulation.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places for monetary amounts.
pub const MONEY_SCALE: u32 = 2;

/// Round a monetary amount to two decimal places, half-up.
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Format a monetary amount with exactly two decimal places (e.g. "12.30").
///
/// This is the wire format the payment gateway expects for amounts and unit
/// prices.
#[must_use]
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", round_money(amount))
}
