//! Supabase Auth (GoTrue) identity provider.
//!
//! Resolves the session access token to a user via `GET /auth/v1/user`.
//! Successful lookups are cached in `moka` so a burst of cart mutations does
//! not hit the auth endpoint once per click.

use std::sync::Arc;

use moka::future::Cache;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use quick_basket_core::UserId;

use super::IdentityProvider;
use crate::config::{SupabaseConfig, SyncConfig};

const CACHE_KEY: &str = "current_user";

/// Subset of the GoTrue user object we need.
#[derive(Debug, Deserialize)]
struct AuthUser {
    id: UserId,
}

/// Identity provider backed by Supabase Auth.
#[derive(Clone)]
pub struct SupabaseIdentity {
    inner: Arc<SupabaseIdentityInner>,
}

struct SupabaseIdentityInner {
    client: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    access_token: Option<SecretString>,
    cache: Cache<&'static str, UserId>,
}

impl SupabaseIdentity {
    /// Create a provider for the session configured in `config`.
    #[must_use]
    pub fn new(config: &SupabaseConfig, sync: &SyncConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(sync.identity_cache_ttl)
            .build();

        Self {
            inner: Arc::new(SupabaseIdentityInner {
                client: reqwest::Client::new(),
                base_url: config.url.clone(),
                anon_key: config.anon_key.clone(),
                access_token: config.access_token.clone(),
                cache,
            }),
        }
    }

    /// Drop the cached user, forcing the next lookup to hit the auth endpoint.
    pub async fn invalidate(&self) {
        self.inner.cache.invalidate(CACHE_KEY).await;
    }

    async fn lookup(&self, access_token: &SecretString) -> Option<UserId> {
        let url = match self.inner.base_url.join("auth/v1/user") {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Invalid Supabase auth endpoint");
                return None;
            }
        };

        let response = match self
            .inner
            .client
            .get(url)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to reach Supabase auth");
                return None;
            }
        };

        match response.status() {
            status if status.is_success() => match response.json::<AuthUser>().await {
                Ok(user) => Some(user.id),
                Err(e) => {
                    warn!(error = %e, "Failed to parse Supabase auth user");
                    None
                }
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("Session token rejected, treating as signed out");
                None
            }
            status => {
                warn!(status = %status, "Supabase auth returned unexpected status");
                None
            }
        }
    }
}

impl IdentityProvider for SupabaseIdentity {
    #[instrument(skip(self))]
    async fn current_user(&self) -> Option<UserId> {
        let Some(access_token) = self.inner.access_token.as_ref() else {
            debug!("No session token configured");
            return None;
        };

        if let Some(user_id) = self.inner.cache.get(CACHE_KEY).await {
            debug!("Cache hit for current user");
            return Some(user_id);
        }

        let user_id = self.lookup(access_token).await?;
        self.inner.cache.insert(CACHE_KEY, user_id).await;
        Some(user_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_access_token_is_signed_out() {
        let config = SupabaseConfig {
            url: Url::parse("https://project.supabase.co").unwrap(),
            anon_key: SecretString::from("anon"),
            access_token: None,
        };
        let identity = SupabaseIdentity::new(&config, &SyncConfig::default());
        assert_eq!(identity.current_user().await, None);
    }
}
