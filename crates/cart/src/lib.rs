//! Quick Basket cart synchronization engine.
//!
//! Keeps the client-side cart in step with the remote cart service:
//!
//! - [`CartStore`] holds the current [`CartSnapshot`](quick_basket_core::CartSnapshot)
//!   and notifies observers synchronously on every change
//! - [`CartSync`] applies `add_item` / `remove_item` / `clear_cart`
//!   optimistically, then confirms them with the cart service or rolls back
//! - [`RemoteCartService`] is implemented for Supabase ([`SupabaseCartClient`])
//!   and, with the `postgres` feature, for a direct database connection
//! - [`IdentityProvider`] answers who is signed in
//!
//! # Example
//!
//! ```rust,ignore
//! let config = CartSyncConfig::from_env()?;
//! let remote = SupabaseCartClient::new(&config.supabase);
//! let identity = SupabaseIdentity::new(&config.supabase, &config.sync);
//! let cart = CartSync::new(remote, identity, config.sync);
//!
//! let _subscription = cart.subscribe(|snapshot| render(snapshot));
//! cart.fetch_cart().await;
//! cart.add_item(product).await;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod identity;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod store;
pub mod sync;

pub use config::{CartSyncConfig, ConfigError, SupabaseConfig, SyncConfig};
pub use error::CartError;
pub use identity::{IdentityProvider, StaticIdentity, SupabaseIdentity};
#[cfg(feature = "postgres")]
pub use remote::PgCartStore;
pub use remote::{CartRow, RemoteCartService, RemoteError, SupabaseCartClient};
pub use store::{CartStore, Subscription};
pub use sync::{CartSync, MutationOutcome, SkipReason};
