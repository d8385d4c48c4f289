//! Core types for Quick Basket.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod cart;
pub mod id;
pub mod price;
pub mod product;

pub use cart::{CartItem, CartItemId, CartMutation, CartSnapshot};
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use product::ProductSnapshot;
