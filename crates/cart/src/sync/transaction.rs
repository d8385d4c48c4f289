//! Optimistic change records.

use std::sync::Arc;

use tracing::error;

use quick_basket_core::{CartMutation, CartSnapshot, ProductId};

use crate::error::{CartError, add_breadcrumb};
use crate::store::CartStore;

/// Result of a cart operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The change was applied and the cart service agreed.
    Applied,
    /// Nothing was changed.
    Skipped(SkipReason),
    /// The cart was left as it was before the operation and `error` was set
    /// to the contained message.
    RolledBack(String),
}

impl MutationOutcome {
    /// Whether the operation went through.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Why an operation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No signed-in user.
    Unauthenticated,
    /// The product has no entry in the cart.
    NotInCart,
    /// The product's entry has no confirmed row to update. Operations on a
    /// product wait for its insert to finish, so this is not expected.
    Unconfirmed,
    /// The entry was removed by a fetch or reset before its insert was
    /// confirmed; the confirmed row was deleted again.
    Superseded,
}

/// An optimistic change that has been shown to observers but not yet
/// confirmed by the cart service.
///
/// Dropping a transaction that was neither committed nor reverted (the
/// caller gave up on the operation's future) rolls the change back.
#[derive(Debug)]
pub(crate) struct Transaction {
    store: CartStore,
    operation: &'static str,
    before: Arc<CartSnapshot>,
    applied_version: u64,
    mutation: CartMutation,
    settled: bool,
}

impl Transaction {
    /// Apply `mutation` to the store and remember what it replaced.
    pub(crate) fn begin(store: &CartStore, operation: &'static str, mutation: CartMutation) -> Self {
        let before = store.apply(&mutation);

        match mutation.product_id() {
            Some(product_id) => add_breadcrumb(
                "cart",
                operation,
                Some(&[("product_id", product_id.to_string().as_str())]),
            ),
            None => add_breadcrumb("cart", operation, None),
        }

        Self {
            store: store.clone(),
            operation,
            // Installs bump the version by exactly one under the store's lock
            applied_version: before.version + 1,
            before,
            mutation,
            settled: false,
        }
    }

    /// Product this change targets, if it targets one.
    pub(crate) const fn product_id(&self) -> Option<ProductId> {
        self.mutation.product_id()
    }

    /// The cart service accepted the change.
    pub(crate) fn commit(mut self) -> MutationOutcome {
        self.settled = true;
        MutationOutcome::Applied
    }

    /// The local entry was replaced by a fetch or reset while the change was
    /// in flight; there is nothing left to undo.
    pub(crate) fn supersede(mut self) -> MutationOutcome {
        self.settled = true;
        MutationOutcome::Skipped(SkipReason::Superseded)
    }

    /// The cart service rejected the change: undo it and record the error.
    pub(crate) fn revert(mut self, err: &CartError) -> MutationOutcome {
        self.settled = true;
        MutationOutcome::RolledBack(self.roll_back(err))
    }

    fn roll_back(&self, err: &CartError) -> String {
        let message = err.user_message();

        error!(
            operation = self.operation,
            product_id = ?self.product_id(),
            error = %err,
            "Cart change failed, rolling back"
        );

        match self.product_id() {
            Some(product_id) => {
                let undo = CartMutation::Restore {
                    product_id,
                    entry: self.before.entry(product_id),
                };
                self.store
                    .revert(self.applied_version, &self.before, &undo, message.clone());
            }
            None => {
                self.store.restore(&self.before, message.clone());
            }
        }

        message
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.settled {
            self.roll_back(&CartError::Interrupted);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use quick_basket_core::{CartItem, LocalId, ProductSnapshot};

    use super::*;
    use crate::remote::RemoteError;

    fn product(name: &str) -> ProductSnapshot {
        ProductSnapshot {
            id: ProductId::random(),
            name: name.to_string(),
            price: Decimal::from(40),
            original_price: None,
            weight: None,
            image_url: None,
            is_veg: true,
        }
    }

    #[test]
    fn test_revert_restores_before_snapshot() {
        let store = CartStore::new();
        let tea = product("Tea");
        let before = store.snapshot();

        let tx = Transaction::begin(
            &store,
            "add_item",
            CartMutation::Insert(CartItem::provisional(LocalId::next(), tea.clone())),
        );
        assert_eq!(tx.product_id(), Some(tea.id));
        assert_eq!(store.snapshot().len(), 1);

        let outcome = tx.revert(&CartError::from(RemoteError::NotFound(
            "product".to_string(),
        )));

        let after = store.snapshot();
        assert_eq!(after.items, before.items);
        assert_eq!(outcome, MutationOutcome::RolledBack("Not found: product".to_string()));
        assert_eq!(after.error.as_deref(), Some("Not found: product"));
    }

    #[test]
    fn test_commit_keeps_optimistic_state() {
        let store = CartStore::new();
        let tx = Transaction::begin(
            &store,
            "add_item",
            CartMutation::Insert(CartItem::provisional(LocalId::next(), product("Jam"))),
        );
        assert!(tx.commit().is_applied());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_unsettled_transaction_rolls_back_on_drop() {
        let store = CartStore::new();
        let kept = CartItem::provisional(LocalId::next(), product("Rice"));
        store.apply(&CartMutation::Insert(kept.clone()));
        let before = store.snapshot();

        let tx = Transaction::begin(
            &store,
            "add_item",
            CartMutation::Insert(CartItem::provisional(LocalId::next(), product("Oats"))),
        );
        assert_eq!(store.snapshot().len(), 2);
        drop(tx);

        let after = store.snapshot();
        assert_eq!(after.items, before.items);
        assert_eq!(after.error.as_deref(), Some("Cart update was interrupted"));
    }

    #[test]
    fn test_superseded_transaction_leaves_store_alone() {
        let store = CartStore::new();
        let tx = Transaction::begin(
            &store,
            "add_item",
            CartMutation::Insert(CartItem::provisional(LocalId::next(), product("Ghee"))),
        );
        store.reset();
        let version = store.snapshot().version;

        assert_eq!(tx.supersede(), MutationOutcome::Skipped(SkipReason::Superseded));
        assert_eq!(store.snapshot().version, version);
        assert_eq!(store.snapshot().error, None);
    }
}
