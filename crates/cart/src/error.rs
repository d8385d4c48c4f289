//! Engine error taxonomy and Sentry helpers.
//!
//! Cart operations never return these to callers: they are logged, recorded
//! on the snapshot's `error` field, and summarized in a
//! [`MutationOutcome`](crate::MutationOutcome).

use thiserror::Error;

use quick_basket_core::{ProductId, UserId};

use crate::remote::RemoteError;

/// Failures the sync engine can run into.
#[derive(Debug, Error)]
pub enum CartError {
    /// No signed-in user.
    #[error("Not signed in")]
    Unauthenticated,

    /// The product has no entry in the cart.
    #[error("Product {0} is not in the cart")]
    NotFound(ProductId),

    /// The remote call failed or timed out.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The caller stopped waiting before the cart service answered.
    #[error("Cart update was interrupted")]
    Interrupted,

    /// A confirmed row could not be linked to a local entry.
    #[error("Confirmed cart row for product {0} has no matching local entry")]
    ReconciliationAmbiguity(ProductId),
}

impl CartError {
    /// Message stored on the snapshot.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote(RemoteError::Timeout(_)) => {
                "Cart service took too long to respond".to_string()
            }
            Self::Remote(RemoteError::RateLimited(_)) => {
                "Too many cart updates, please try again shortly".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Set the Sentry user context for the cart's owner.
pub fn set_sentry_user(user_id: UserId) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on sign-out so later events are not attributed to the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a cart action.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart
/// changes leading up to a failure.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added item", Some(&[("product_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_cart_error_display() {
        assert_eq!(CartError::Unauthenticated.to_string(), "Not signed in");

        let product_id = ProductId::random();
        assert_eq!(
            CartError::NotFound(product_id).to_string(),
            format!("Product {product_id} is not in the cart")
        );

        let err = CartError::from(RemoteError::Status {
            status: 500,
            body: "boom".to_string(),
        });
        assert_eq!(err.to_string(), "HTTP 500: boom");
    }

    #[test]
    fn test_user_message_for_timeout() {
        let err = CartError::from(RemoteError::Timeout(Duration::from_secs(10)));
        assert_eq!(err.user_message(), "Cart service took too long to respond");
    }

    #[test]
    fn test_breadcrumb_without_client_is_noop() {
        add_breadcrumb("cart", "Added item", Some(&[("product_id", "abc")]));
        set_sentry_user(UserId::random());
        clear_sentry_user();
    }
}
