//! Vitrina Core - Shared types library.
//!
//! This crate provides common types used across all Vitrina components:
//! - `storefront` - Public-facing e-commerce site
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no
//! database access, no HTTP clients. This keeps it lightweight and allows
//! it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, money helpers, cart
//!   line items, and checkout/payment data

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
