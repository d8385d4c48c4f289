//! Identity providers: who is the current authenticated user?
//!
//! The cart engine asks at the start of every mutation and every fetch. A
//! provider answers `None` when nobody is signed in; lookup failures are also
//! reported as `None` (and logged) so the engine can treat them as a no-op.

mod supabase;

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use quick_basket_core::UserId;

pub use supabase::SupabaseIdentity;

/// Source of the current authenticated user.
pub trait IdentityProvider: Send + Sync + 'static {
    /// The signed-in user, or `None`.
    fn current_user(&self) -> impl Future<Output = Option<UserId>> + Send;
}

/// Identity held in memory and switched explicitly.
///
/// Clones share the same slot, so a test or a UI shell can keep one handle to
/// sign users in and out while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Arc<RwLock<Option<UserId>>>,
}

impl StaticIdentity {
    /// Start signed in as `user_id`.
    #[must_use]
    pub fn signed_in(user_id: UserId) -> Self {
        Self {
            user: Arc::new(RwLock::new(Some(user_id))),
        }
    }

    /// Start signed out.
    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Switch to a signed-in user.
    pub fn sign_in(&self, user_id: UserId) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id);
    }

    /// Forget the current user.
    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Current user without going through the async trait.
    #[must_use]
    pub fn get(&self) -> Option<UserId> {
        *self.user.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Option<UserId> {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_identity_sign_in_out() {
        let identity = StaticIdentity::signed_out();
        assert_eq!(identity.current_user().await, None);

        let user_id = UserId::random();
        let handle = identity.clone();
        handle.sign_in(user_id);
        assert_eq!(identity.current_user().await, Some(user_id));

        handle.sign_out();
        assert_eq!(identity.current_user().await, None);
    }
}
