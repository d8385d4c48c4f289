//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! qb-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `CART_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! `crates/cart/migrations/`:
//! ```text
//! migrations/
//! ├── 20260301000001_create_products.sql
//! └── 20260301000002_create_cart_items.sql
//! ```

use quick_basket_cart::{PgCartStore, RemoteError};
use secrecy::SecretString;
use thiserror::Error;

/// Errors from running migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Missing environment variable: CART_DATABASE_URL (or DATABASE_URL)")]
    MissingDatabaseUrl,

    #[error("Connection error: {0}")]
    Connect(#[from] RemoteError),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run cart database migrations.
///
/// # Errors
///
/// Returns `MigrationError` if the database URL is missing, the connection
/// fails, or a migration fails.
pub async fn run(database_url: Option<&SecretString>) -> Result<(), MigrationError> {
    let database_url = database_url.ok_or(MigrationError::MissingDatabaseUrl)?;

    tracing::info!("Connecting to cart database...");
    let store = PgCartStore::connect(database_url).await?;

    tracing::info!("Running cart migrations...");
    sqlx::migrate!("../cart/migrations").run(store.pool()).await?;

    tracing::info!("Cart migrations complete!");
    Ok(())
}
