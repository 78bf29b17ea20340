//! Cart line items and computed totals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::id::ProductId;
use crate::types::money::round_money;

/// A single line in a shopping cart.
///
/// Identity key is [`product_id`](Self::product_id): a cart never holds two
/// items for the same product, repeated adds accumulate into `quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product this line refers to.
    pub product_id: ProductId,
    /// Product name as shown to the shopper.
    pub display_name: String,
    /// Unit price in dollars. Never negative.
    pub unit_price: Decimal,
    /// Number of units. Always positive; a quantity of zero means the line
    /// is removed instead.
    pub quantity: u32,
    /// Reference to the product image (URL or asset path).
    pub image_ref: String,
}

impl CartItem {
    /// Line total: unit price times quantity, rounded at this step.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        round_money(self.unit_price * Decimal::from(self.quantity))
    }
}

/// Monetary totals derived from a cart's items.
///
/// Each component is rounded independently; `total` is the rounded sum of
/// the already-rounded `subtotal` and `tax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    /// Sum of rounded line totals.
    pub subtotal: Decimal,
    /// Tax on the subtotal at the configured rate.
    pub tax: Decimal,
    /// `subtotal + tax`, rounded.
    pub total: Decimal,
}

impl CartTotals {
    /// Compute totals from items and a tax rate.
    #[must_use]
    pub fn compute(items: &[CartItem], tax_rate: Decimal) -> Self {
        let subtotal = round_money(items.iter().map(CartItem::line_total).sum());
        let tax = round_money(subtotal * tax_rate);
        let total = round_money(subtotal + tax);
        Self {
            subtotal,
            tax,
            total,
        }
    }
}
