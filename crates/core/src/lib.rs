//! Quick Basket Core - Shared cart types library.
//!
//! This crate provides the types used across all Quick Basket components:
//! - `cart` - Cart synchronization engine (optimistic updates, remote sync)
//! - `cli` - Command-line driver for the cart and database migrations
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere, including inside UI render paths.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, prices, product snapshots, cart items and snapshots
//! - [`selectors`] - Derived projections over a cart snapshot (totals, savings)

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod selectors;
pub mod types;

pub use types::*;
