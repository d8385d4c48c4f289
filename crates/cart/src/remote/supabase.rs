//! Supabase (PostgREST) implementation of the remote cart service.
//!
//! Talks to `/rest/v1/cart_items` and `/rest/v1/products` with `reqwest`.
//! Row-level security on the project scopes every request to the user that
//! owns the bearer token; the explicit `user_id` filters mirror that scope.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, HeaderValue, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use quick_basket_core::{CartRowId, ProductId, ProductSnapshot, UserId};

use super::{CART_ROW_SELECT, CartRow, RemoteCartService, RemoteError};
use crate::config::SupabaseConfig;

const CART_TABLE: &str = "cart_items";
const PRODUCTS_TABLE: &str = "products";
const PRODUCT_SELECT: &str = "id,name,price,original_price,weight,image_url,is_veg";

/// Ask PostgREST to answer with a single JSON object instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Truncation limit for response bodies carried in errors and logs.
const BODY_PREVIEW_CHARS: usize = 300;

/// Client for the Supabase REST API.
///
/// Cheaply cloneable; clones share the underlying connection pool.
#[derive(Clone)]
pub struct SupabaseCartClient {
    inner: Arc<SupabaseCartClientInner>,
}

struct SupabaseCartClientInner {
    client: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    bearer_token: SecretString,
}

#[derive(Serialize)]
struct NewCartRow {
    user_id: UserId,
    product_id: ProductId,
    quantity: u32,
}

#[derive(Serialize)]
struct QuantityPatch {
    quantity: u32,
    updated_at: DateTime<Utc>,
}

impl SupabaseCartClient {
    /// Create a new Supabase REST client.
    #[must_use]
    pub fn new(config: &SupabaseConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &SupabaseConfig) -> Self {
        Self {
            inner: Arc::new(SupabaseCartClientInner {
                client,
                base_url: config.url.clone(),
                anon_key: config.anon_key.clone(),
                bearer_token: SecretString::from(config.bearer_token()),
            }),
        }
    }

    /// Look up a product in the catalog.
    ///
    /// Used to build the snapshot passed to `CartSync::add_item`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::NotFound` if no product has this ID, or another
    /// `RemoteError` if the request fails.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn fetch_product(&self, product_id: ProductId) -> Result<ProductSnapshot, RemoteError> {
        let url = self.table_url(
            PRODUCTS_TABLE,
            &[
                ("select", PRODUCT_SELECT.to_string()),
                ("id", format!("eq.{product_id}")),
            ],
        )?;

        let products: Vec<ProductSnapshot> = self.send_json(self.request(Method::GET, url)).await?;

        products
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("product {product_id}")))
    }

    /// Build a REST URL for a table with query parameters.
    fn table_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url, RemoteError> {
        let mut url = self
            .inner
            .base_url
            .join(&format!("rest/v1/{table}"))?;

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Start a request with the project API key and bearer token attached.
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.inner
            .client
            .request(method, url)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(self.inner.bearer_token.expose_secret())
    }

    /// Send a request and return the body of a successful response.
    async fn send(&self, request: RequestBuilder) -> Result<String, RemoteError> {
        let response = request.send().await?;
        let status = response.status();

        // Check for rate limiting
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(RemoteError::RateLimited(retry_after));
        }

        let body = response.text().await?;

        if !status.is_success() {
            tracing::warn!(
                status = %status,
                body = %preview(&body),
                "Cart service returned non-success status"
            );
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: preview(&body),
            });
        }

        Ok(body)
    }

    /// Send a request and parse the JSON body.
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let body = self.send(request).await?;

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %preview(&body),
                "Failed to parse cart service response"
            );
            RemoteError::Parse(e)
        })
    }
}

impl RemoteCartService for SupabaseCartClient {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn fetch_cart(&self, user_id: UserId) -> Result<Vec<CartRow>, RemoteError> {
        let url = self.table_url(
            CART_TABLE,
            &[
                ("select", CART_ROW_SELECT.to_string()),
                ("user_id", format!("eq.{user_id}")),
            ],
        )?;

        let rows: Vec<CartRow> = self.send_json(self.request(Method::GET, url)).await?;
        debug!(rows = rows.len(), "Fetched cart rows");
        Ok(rows)
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    async fn insert_cart_row(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartRow, RemoteError> {
        let url = self.table_url(CART_TABLE, &[("select", CART_ROW_SELECT.to_string())])?;

        let request = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .header(ACCEPT, HeaderValue::from_static(SINGLE_OBJECT))
            .json(&NewCartRow {
                user_id,
                product_id,
                quantity,
            });

        let row: CartRow = self.send_json(request).await?;
        debug!(row_id = %row.id, "Inserted cart row");
        Ok(row)
    }

    #[instrument(skip(self), fields(row_id = %row_id))]
    async fn update_cart_row_quantity(
        &self,
        row_id: CartRowId,
        quantity: u32,
    ) -> Result<(), RemoteError> {
        let url = self.table_url(CART_TABLE, &[("id", format!("eq.{row_id}"))])?;

        let request = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=minimal")
            .json(&QuantityPatch {
                quantity,
                updated_at: Utc::now(),
            });

        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(row_id = %row_id))]
    async fn delete_cart_row(&self, row_id: CartRowId) -> Result<(), RemoteError> {
        let url = self.table_url(CART_TABLE, &[("id", format!("eq.{row_id}"))])?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn delete_all_cart_rows(&self, user_id: UserId) -> Result<(), RemoteError> {
        let url = self.table_url(CART_TABLE, &[("user_id", format!("eq.{user_id}"))])?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }
}

/// First few hundred characters of a response body.
fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> SupabaseCartClient {
        SupabaseCartClient::new(&SupabaseConfig {
            url: Url::parse("https://project.supabase.co").unwrap(),
            anon_key: SecretString::from("anon"),
            access_token: None,
        })
    }

    #[test]
    fn test_table_url_encodes_filters() {
        let user_id = UserId::random();
        let url = client()
            .table_url(
                CART_TABLE,
                &[
                    ("select", CART_ROW_SELECT.to_string()),
                    ("user_id", format!("eq.{user_id}")),
                ],
            )
            .unwrap();

        assert_eq!(url.path(), "/rest/v1/cart_items");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("select".to_string(), CART_ROW_SELECT.to_string()),
                ("user_id".to_string(), format!("eq.{user_id}")),
            ]
        );
    }

    #[test]
    fn test_preview_truncates() {
        let body = "x".repeat(1000);
        assert_eq!(preview(&body).len(), BODY_PREVIEW_CHARS);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_quantity_patch_serializes_timestamp() {
        let patch = QuantityPatch {
            quantity: 3,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["quantity"], 3);
        assert!(json["updated_at"].is_string());
    }
}
