//! Remote cart service contract and implementations.
//!
//! # Architecture
//!
//! - The remote service is the source of truth for persisted cart rows
//! - Single-row CRUD only: no multi-row transactions are exposed to the client
//! - Calls may be delivered at least once; updates and deletes are idempotent,
//!   inserts are not
//!
//! # Implementations
//!
//! - [`SupabaseCartClient`] - PostgREST over HTTPS (`cart_items` joined with `products`)
//! - `PgCartStore` - direct `PostgreSQL` access (feature `postgres`)

#[cfg(feature = "postgres")]
mod postgres;
mod supabase;

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use quick_basket_core::{CartItem, CartItemId, CartRowId, ProductId, ProductSnapshot, UserId};

#[cfg(feature = "postgres")]
pub use postgres::PgCartStore;
pub use supabase::SupabaseCartClient;

/// Columns selected for a cart row joined with its product.
pub const CART_ROW_SELECT: &str =
    "id,product_id,quantity,products(id,name,price,original_price,weight,image_url,is_veg)";

/// A persisted cart row joined with its product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartRow {
    /// Server-assigned row ID.
    pub id: CartRowId,
    /// Product the row refers to.
    pub product_id: ProductId,
    /// Persisted quantity.
    pub quantity: u32,
    /// Joined catalog fields.
    #[serde(rename = "products")]
    pub product: ProductSnapshot,
}

impl CartRow {
    /// Convert into a confirmed cart entry.
    #[must_use]
    pub fn into_item(self) -> CartItem {
        CartItem {
            id: CartItemId::Canonical(self.id),
            product_id: self.product_id,
            quantity: self.quantity,
            product: self.product,
        }
    }
}

/// Errors that can occur when talking to the remote cart service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Response status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Rate limited by the service.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The call did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Endpoint URL could not be built.
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    /// Expected row was not returned.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database operation failed.
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RemoteError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status >= 500,
            Self::RateLimited(_) | Self::Timeout(_) => true,
            Self::Parse(_) | Self::Endpoint(_) | Self::NotFound(_) => false,
            #[cfg(feature = "postgres")]
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
        }
    }

    /// Whether an insert that failed this way may still have left a row for
    /// the product: the answer was lost in transit, or the row already exists.
    #[must_use]
    pub fn row_may_exist(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout(),
            Self::Status { status, .. } => *status == 409,
            #[cfg(feature = "postgres")]
            Self::Database(sqlx::Error::Database(e)) => e.is_unique_violation(),
            _ => false,
        }
    }
}

/// Persistence backend for per-user cart rows.
///
/// Implementations must be cheap to share across tasks; the engine holds one
/// instance for its whole lifetime.
pub trait RemoteCartService: Send + Sync + 'static {
    /// Load every cart row for a user.
    fn fetch_cart(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<CartRow>, RemoteError>> + Send;

    /// Insert a row and return it joined with its product.
    fn insert_cart_row(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<CartRow, RemoteError>> + Send;

    /// Set the quantity of an existing row.
    fn update_cart_row_quantity(
        &self,
        row_id: CartRowId,
        quantity: u32,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Delete one row.
    fn delete_cart_row(&self, row_id: CartRowId)
    -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Delete every row belonging to a user.
    fn delete_all_cart_rows(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::NotFound("cart row".to_string());
        assert_eq!(err.to_string(), "Not found: cart row");

        let err = RemoteError::Status {
            status: 409,
            body: "duplicate key".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 409: duplicate key");
    }

    #[test]
    fn test_row_may_exist_after_lost_answer_or_conflict() {
        assert!(RemoteError::Timeout(Duration::from_secs(1)).row_may_exist());
        assert!(
            RemoteError::Status {
                status: 409,
                body: "duplicate key".to_string()
            }
            .row_may_exist()
        );
        assert!(
            !RemoteError::Status {
                status: 503,
                body: String::new()
            }
            .row_may_exist()
        );
        assert!(!RemoteError::RateLimited(1).row_may_exist());
    }

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::RateLimited(1).is_transient());
        assert!(RemoteError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            RemoteError::Status {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !RemoteError::Status {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!RemoteError::NotFound(String::new()).is_transient());
    }

    #[test]
    fn test_cart_row_deserializes_joined_shape() {
        let row_id = CartRowId::random();
        let product_id = ProductId::random();
        let json = format!(
            r#"{{"id":"{row_id}","product_id":"{product_id}","quantity":2,
                "products":{{"id":"{product_id}","name":"Curd","price":35,"original_price":null,
                "weight":"400 g","image_url":null,"is_veg":true}}}}"#
        );

        let row: CartRow = serde_json::from_str(&json).unwrap();
        let item = row.into_item();

        assert_eq!(item.id, CartItemId::Canonical(row_id));
        assert_eq!(item.product_id, product_id);
        assert_eq!(item.quantity, 2);
        assert_eq!(item.product.name, "Curd");
    }
}
