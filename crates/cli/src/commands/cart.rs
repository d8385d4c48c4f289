//! Cart commands.
//!
//! # Usage
//!
//! ```bash
//! # Show the signed-in user's cart (Supabase, SUPABASE_ACCESS_TOKEN)
//! qb-cli cart show
//!
//! # Add / remove one unit of a product
//! qb-cli cart add 0b6f4c1e-5d8a-4a53-9f7e-2b1f3c4d5e6f
//! qb-cli cart remove 0b6f4c1e-5d8a-4a53-9f7e-2b1f3c4d5e6f
//!
//! # Empty the cart, talking to Postgres directly as a given user
//! qb-cli --backend postgres --user 6a1f... cart clear
//! ```

use std::future::Future;

use quick_basket_cart::{
    CartSync, ConfigError, IdentityProvider, MutationOutcome, PgCartStore, RemoteCartService,
    RemoteError, SkipReason, SupabaseCartClient,
};
use quick_basket_core::selectors::{total_item_count, total_price, total_savings};
use quick_basket_core::{CartSnapshot, CurrencyCode, Price, ProductId, ProductSnapshot};
use thiserror::Error;

/// Errors from cart commands.
#[derive(Debug, Error)]
pub enum CartCommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cart service error: {0}")]
    Remote(#[from] RemoteError),

    #[error("--user is required with the postgres backend")]
    MissingUser,

    #[error("Missing environment variable: CART_DATABASE_URL (or DATABASE_URL)")]
    MissingDatabaseUrl,

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Cart change failed: {0}")]
    Failed(String),
}

/// What to do with the cart.
#[derive(Debug, Clone, Copy)]
pub enum CartAction {
    Show,
    Add(ProductId),
    Remove(ProductId),
    Clear,
}

/// Catalog lookup used to build the snapshot for `cart add`.
pub trait ProductLookup: Send + Sync {
    fn product(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<ProductSnapshot, RemoteError>> + Send;
}

impl ProductLookup for SupabaseCartClient {
    async fn product(&self, product_id: ProductId) -> Result<ProductSnapshot, RemoteError> {
        self.fetch_product(product_id).await
    }
}

impl ProductLookup for PgCartStore {
    async fn product(&self, product_id: ProductId) -> Result<ProductSnapshot, RemoteError> {
        self.fetch_product(product_id).await
    }
}

/// Load the cart, apply `action`, and print the result.
///
/// # Errors
///
/// Returns `CartCommandError` if nobody is signed in, the product cannot be
/// found, or the change was rolled back.
pub async fn run<R, I, C>(
    cart: &CartSync<R, I>,
    catalog: &C,
    action: CartAction,
) -> Result<(), CartCommandError>
where
    R: RemoteCartService,
    I: IdentityProvider,
    C: ProductLookup,
{
    check(cart.fetch_cart().await)?;

    match action {
        CartAction::Show => {}
        CartAction::Add(product_id) => {
            let product = catalog.product(product_id).await?;
            tracing::info!(product = %product.name, "Adding to cart");
            check(cart.add_item(product).await)?;
        }
        CartAction::Remove(product_id) => check(cart.remove_item(product_id).await)?,
        CartAction::Clear => check(cart.clear_cart().await)?,
    }

    print_cart(&cart.snapshot());
    Ok(())
}

fn check(outcome: MutationOutcome) -> Result<(), CartCommandError> {
    match outcome {
        MutationOutcome::Applied => Ok(()),
        MutationOutcome::Skipped(SkipReason::Unauthenticated) => {
            Err(CartCommandError::Unauthenticated)
        }
        MutationOutcome::Skipped(reason) => {
            tracing::warn!(?reason, "Nothing to do");
            Ok(())
        }
        MutationOutcome::RolledBack(message) => Err(CartCommandError::Failed(message)),
    }
}

#[allow(clippy::print_stdout)]
fn print_cart(snapshot: &CartSnapshot) {
    let inr = |amount| Price::new(amount, CurrencyCode::INR);

    if snapshot.is_empty() {
        println!("Cart is empty");
        return;
    }

    for item in &snapshot.items {
        println!(
            "{:>3} × {:<32} {:>10}  ({})",
            item.quantity,
            item.product.name,
            inr(item.line_total()).display(),
            item.id
        );
    }

    println!();
    println!("Items:   {}", total_item_count(snapshot));
    println!("Total:   {}", inr(total_price(snapshot)));
    println!("Savings: {}", inr(total_savings(snapshot)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_maps_outcomes() {
        assert!(check(MutationOutcome::Applied).is_ok());
        assert!(check(MutationOutcome::Skipped(SkipReason::NotInCart)).is_ok());
        assert!(matches!(
            check(MutationOutcome::Skipped(SkipReason::Unauthenticated)),
            Err(CartCommandError::Unauthenticated)
        ));
        assert!(matches!(
            check(MutationOutcome::RolledBack("boom".to_string())),
            Err(CartCommandError::Failed(ref m)) if m == "boom"
        ));
    }
}
