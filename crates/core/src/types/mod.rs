//! Core types for Vitrina.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod checkout;
pub mod id;
pub mod money;

pub use cart::{CartItem, CartTotals};
pub use checkout::{
    BillingAddress, CheckoutSession, CustomerIdentity, PaymentOutcome, ShippingAddress,
};
pub use id::*;
pub use money::{format_amount, round_money};
