//! Direct `PostgreSQL` implementation of the remote cart service.
//!
//! Uses the same `cart_items` / `products` schema as the Supabase project
//! (see `crates/cart/migrations/`). Handy for local development and for
//! server-side jobs that bypass PostgREST.

use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, instrument};

use quick_basket_core::{CartRowId, ProductId, ProductSnapshot, UserId};

use super::{CartRow, RemoteCartService, RemoteError};

const JOINED_ROW_COLUMNS: &str = r"
    ci.id, ci.product_id, ci.quantity,
    p.name, p.price, p.original_price, p.weight, p.image_url, p.is_veg
";

/// Flat record for a cart row joined with its product.
#[derive(sqlx::FromRow)]
struct JoinedRow {
    id: CartRowId,
    product_id: ProductId,
    quantity: i32,
    name: String,
    price: Decimal,
    original_price: Option<Decimal>,
    weight: Option<String>,
    image_url: Option<String>,
    is_veg: bool,
}

impl JoinedRow {
    fn into_cart_row(self) -> CartRow {
        CartRow {
            id: self.id,
            product_id: self.product_id,
            quantity: u32::try_from(self.quantity).unwrap_or(0),
            product: ProductSnapshot {
                id: self.product_id,
                name: self.name,
                price: self.price,
                original_price: self.original_price,
                weight: self.weight,
                image_url: self.image_url,
                is_veg: self.is_veg,
            },
        }
    }
}

/// Cart rows stored in a `PostgreSQL` database.
#[derive(Clone)]
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a connection pool with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Database` if the connection cannot be established.
    pub async fn connect(database_url: &SecretString) -> Result<Self, RemoteError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url.expose_secret())
            .await?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Look up a product in the catalog.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::NotFound` if no product has this ID, or
    /// `RemoteError::Database` if the query fails.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn fetch_product(&self, product_id: ProductId) -> Result<ProductSnapshot, RemoteError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, price, original_price, weight, image_url, is_veg
             FROM products
             WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RemoteError::NotFound(format!("product {product_id}")))?;

        Ok(row.into())
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    price: Decimal,
    original_price: Option<Decimal>,
    weight: Option<String>,
    image_url: Option<String>,
    is_veg: bool,
}

impl From<ProductRow> for ProductSnapshot {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            price: row.price,
            original_price: row.original_price,
            weight: row.weight,
            image_url: row.image_url,
            is_veg: row.is_veg,
        }
    }
}

fn quantity_param(quantity: u32) -> i32 {
    i32::try_from(quantity).unwrap_or(i32::MAX)
}

impl RemoteCartService for PgCartStore {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn fetch_cart(&self, user_id: UserId) -> Result<Vec<CartRow>, RemoteError> {
        let rows = sqlx::query_as::<_, JoinedRow>(&format!(
            "SELECT {JOINED_ROW_COLUMNS}
             FROM cart_items ci
             JOIN products p ON p.id = ci.product_id
             WHERE ci.user_id = $1
             ORDER BY ci.created_at, ci.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(rows = rows.len(), "Fetched cart rows");
        Ok(rows.into_iter().map(JoinedRow::into_cart_row).collect())
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    async fn insert_cart_row(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartRow, RemoteError> {
        let row = sqlx::query_as::<_, JoinedRow>(&format!(
            "WITH ci AS (
                 INSERT INTO cart_items (user_id, product_id, quantity)
                 VALUES ($1, $2, $3)
                 RETURNING id, product_id, quantity, created_at
             )
             SELECT {JOINED_ROW_COLUMNS}
             FROM ci
             JOIN products p ON p.id = ci.product_id"
        ))
        .bind(user_id)
        .bind(product_id)
        .bind(quantity_param(quantity))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RemoteError::NotFound(format!("product {product_id}")))?;

        debug!(row_id = %row.id, "Inserted cart row");
        Ok(row.into_cart_row())
    }

    #[instrument(skip(self), fields(row_id = %row_id))]
    async fn update_cart_row_quantity(
        &self,
        row_id: CartRowId,
        quantity: u32,
    ) -> Result<(), RemoteError> {
        sqlx::query("UPDATE cart_items SET quantity = $2, updated_at = now() WHERE id = $1")
            .bind(row_id)
            .bind(quantity_param(quantity))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(row_id = %row_id))]
    async fn delete_cart_row(&self, row_id: CartRowId) -> Result<(), RemoteError> {
        sqlx::query("DELETE FROM cart_items WHERE id = $1")
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn delete_all_cart_rows(&self, user_id: UserId) -> Result<(), RemoteError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        debug!(deleted = result.rows_affected(), "Cleared cart rows");
        Ok(())
    }
}
