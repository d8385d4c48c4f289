//! Optimistic cart mutator.
//!
//! # Flow
//!
//! Every mutating operation:
//!
//! 1. takes a place in its product's queue when it is called,
//! 2. waits for earlier operations on the same product (and any running
//!    `clear_cart`),
//! 3. checks identity, then applies the change to the [`CartStore`] so
//!    observers see it immediately,
//! 4. calls the cart service and, on failure, puts the cart back and records
//!    the error.
//!
//! Operations on different products run concurrently. `clear_cart` runs
//! alone: it waits for running product operations to finish and holds later
//! ones until it is done. Full fetches are not serialized.
//!
//! Nothing is returned as an error; each call resolves to a
//! [`MutationOutcome`].

mod transaction;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use quick_basket_core::selectors::quantity_of;
use quick_basket_core::{
    CartItem, CartItemId, CartMutation, CartRowId, CartSnapshot, LocalId, ProductId, ProductSnapshot,
    UserId,
};

use crate::config::SyncConfig;
use crate::error::{CartError, clear_sentry_user, set_sentry_user};
use crate::identity::IdentityProvider;
use crate::queue::KeyedQueue;
use crate::remote::{CartRow, RemoteCartService, RemoteError};
use crate::retry::RetryPolicy;
use crate::store::{CartStore, Subscription};

pub use transaction::{MutationOutcome, SkipReason};
use transaction::Transaction;

/// Cart engine for one client session.
///
/// Cheaply cloneable; clones share the store, queues and service handles.
pub struct CartSync<R, I> {
    inner: Arc<CartSyncInner<R, I>>,
}

struct CartSyncInner<R, I> {
    remote: R,
    identity: I,
    store: CartStore,
    queue: KeyedQueue<ProductId>,
    /// Held shared by product operations, exclusively by `clear_cart`.
    barrier: RwLock<()>,
    retry: RetryPolicy,
}

impl<R, I> Clone for CartSync<R, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteCartService, I: IdentityProvider> CartSync<R, I> {
    /// Create an engine with an empty cart.
    #[must_use]
    pub fn new(remote: R, identity: I, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(CartSyncInner {
                remote,
                identity,
                store: CartStore::new(),
                queue: KeyedQueue::new(),
                barrier: RwLock::new(()),
                retry: RetryPolicy::from(&config),
            }),
        }
    }

    /// Read access to the cart state. Only the engine writes to it.
    #[must_use]
    pub fn store(&self) -> &CartStore {
        &self.inner.store
    }

    /// Current immutable view of the cart.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CartSnapshot> {
        self.inner.store.snapshot()
    }

    /// Observe every snapshot change. See [`CartStore::subscribe`].
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&CartSnapshot) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(observer)
    }

    /// Products with an operation running or queued.
    #[must_use]
    pub fn pending_products(&self) -> usize {
        self.inner.queue.active_keys()
    }

    /// Forget the last recorded failure.
    pub fn clear_error(&self) {
        self.inner.store.clear_error();
    }

    /// Empty the local cart without touching the cart service, e.g. on
    /// sign-out.
    pub fn reset(&self) {
        self.inner.store.reset();
    }

    /// Load the signed-in user's cart from the cart service.
    ///
    /// Without a signed-in user the local cart is reset to empty.
    pub fn fetch_cart(&self) -> impl Future<Output = MutationOutcome> + Send + use<R, I> {
        let this = self.clone();
        async move { this.run_fetch().await }
    }

    /// Add one unit of `product`.
    ///
    /// The queue position is taken when this is called, not when the returned
    /// future is first polled.
    pub fn add_item(
        &self,
        product: ProductSnapshot,
    ) -> impl Future<Output = MutationOutcome> + Send + use<R, I> {
        let this = self.clone();
        let ticket = self.inner.queue.enqueue(product.id);

        async move {
            let _turn = ticket.ready().await;
            let _shared = this.inner.barrier.read().await;
            this.run_add(product).await
        }
    }

    /// Remove one unit of a product, dropping the entry at zero.
    pub fn remove_item(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = MutationOutcome> + Send + use<R, I> {
        let this = self.clone();
        let ticket = self.inner.queue.enqueue(product_id);

        async move {
            let _turn = ticket.ready().await;
            let _shared = this.inner.barrier.read().await;
            this.run_remove(product_id).await
        }
    }

    /// Remove every entry, locally and on the cart service.
    pub fn clear_cart(&self) -> impl Future<Output = MutationOutcome> + Send + use<R, I> {
        let this = self.clone();

        async move {
            let _exclusive = this.inner.barrier.write().await;
            this.run_clear().await
        }
    }

    async fn current_user(&self, operation: &'static str) -> Option<UserId> {
        let user_id = self.inner.identity.current_user().await;
        if user_id.is_none() {
            warn!(operation, error = %CartError::Unauthenticated, "Ignoring cart operation");
        }
        user_id
    }

    #[instrument(skip(self))]
    async fn run_fetch(&self) -> MutationOutcome {
        let store = &self.inner.store;

        let Some(user_id) = self.current_user("fetch_cart").await else {
            clear_sentry_user();
            store.reset();
            return MutationOutcome::Skipped(SkipReason::Unauthenticated);
        };
        set_sentry_user(user_id);

        store.begin_fetch();

        let remote = &self.inner.remote;
        match self
            .inner
            .retry
            .idempotent("fetch_cart", || remote.fetch_cart(user_id))
            .await
        {
            Ok(rows) => {
                info!(user_id = %user_id, rows = rows.len(), "Cart loaded");
                store.replace(rows.into_iter().map(CartRow::into_item).collect());
                MutationOutcome::Applied
            }
            Err(e) => {
                let err = CartError::from(e);
                error!(user_id = %user_id, error = %err, "Failed to load cart");
                let message = err.user_message();
                store.fetch_failed(message.clone());
                MutationOutcome::RolledBack(message)
            }
        }
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    async fn run_add(&self, product: ProductSnapshot) -> MutationOutcome {
        let Some(user_id) = self.current_user("add_item").await else {
            return MutationOutcome::Skipped(SkipReason::Unauthenticated);
        };

        match self.inner.store.snapshot().find(product.id) {
            Some(existing) => self.increment(existing).await,
            None => self.insert(user_id, product).await,
        }
    }

    async fn increment(&self, existing: &CartItem) -> MutationOutcome {
        // A provisional entry only exists while its insert holds the product's turn
        debug_assert!(!existing.id.is_provisional(), "add_item ran beside an insert");
        let Some(row_id) = existing.id.canonical() else {
            warn!(item_id = %existing.id, "Entry not confirmed yet, ignoring add");
            return MutationOutcome::Skipped(SkipReason::Unconfirmed);
        };

        let quantity = existing.quantity.saturating_add(1);
        self.update_quantity(existing.product_id, row_id, quantity, "add_item")
            .await
    }

    async fn insert(&self, user_id: UserId, product: ProductSnapshot) -> MutationOutcome {
        let store = &self.inner.store;
        let product_id = product.id;
        let local_id = LocalId::next();

        let tx = Transaction::begin(
            store,
            "add_item",
            CartMutation::Insert(CartItem::provisional(local_id, product)),
        );
        debug!(local_id = %local_id, "Optimistic insert");

        // Not retried: a timed-out insert may still have created the row.
        let result = self
            .inner
            .retry
            .once(self.inner.remote.insert_cart_row(user_id, product_id, 1))
            .await;

        match result {
            Ok(row) => self.reconcile(tx, row).await,
            Err(e) if e.row_may_exist() => self.recover_insert(tx, user_id, product_id, e).await,
            Err(e) => tx.revert(&CartError::from(e)),
        }
    }

    /// The insert's answer was lost, or a row for the product already
    /// exists. Look the row up and adopt it; roll back if it is not there.
    async fn recover_insert(
        &self,
        tx: Transaction,
        user_id: UserId,
        product_id: ProductId,
        err: RemoteError,
    ) -> MutationOutcome {
        warn!(error = %err, "Insert result unknown, looking up the row");

        let remote = &self.inner.remote;
        let row = match self
            .inner
            .retry
            .idempotent("fetch_cart", || remote.fetch_cart(user_id))
            .await
        {
            Ok(rows) => rows.into_iter().find(|row| row.product_id == product_id),
            Err(e) => {
                warn!(error = %e, "Row lookup failed");
                None
            }
        };

        let Some(row) = row else {
            return tx.revert(&CartError::from(err));
        };

        let quantity = row.quantity;
        let outcome = self.reconcile(tx, row).await;

        let store = &self.inner.store;
        if outcome.is_applied() && quantity_of(&store.snapshot(), product_id) != quantity {
            // The row was there before this insert; show what the service holds
            info!(quantity, "Adopted existing cart row");
            store.apply(&CartMutation::SetQuantity {
                product_id,
                quantity,
            });
        }
        outcome
    }

    /// Swap the provisional entry for the confirmed row.
    async fn reconcile(&self, tx: Transaction, row: CartRow) -> MutationOutcome {
        let store = &self.inner.store;
        let product_id = row.product_id;
        let row_id = row.id;

        match store.snapshot().find(product_id).map(|entry| entry.id) {
            Some(CartItemId::Provisional(local_id)) => {
                debug!(local_id = %local_id, row_id = %row_id, "Reconciled provisional entry");
                store.apply(&CartMutation::Reconcile {
                    product_id,
                    item: row.into_item(),
                });
                tx.commit()
            }
            Some(CartItemId::Canonical(existing)) => {
                warn!(
                    row_id = %row_id,
                    existing = %existing,
                    "Entry already confirmed, keeping it"
                );
                tx.commit()
            }
            None => {
                let outcome = tx.supersede();
                let err = CartError::ReconciliationAmbiguity(product_id);
                warn!(row_id = %row_id, error = %err, "Deleting orphaned cart row");

                let remote = &self.inner.remote;
                if let Err(e) = self
                    .inner
                    .retry
                    .idempotent("delete_cart_row", || remote.delete_cart_row(row_id))
                    .await
                {
                    error!(row_id = %row_id, error = %e, "Failed to delete orphaned cart row");
                }
                outcome
            }
        }
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn run_remove(&self, product_id: ProductId) -> MutationOutcome {
        if self.current_user("remove_item").await.is_none() {
            return MutationOutcome::Skipped(SkipReason::Unauthenticated);
        }

        let snapshot = self.inner.store.snapshot();
        let Some(existing) = snapshot.find(product_id) else {
            warn!(error = %CartError::NotFound(product_id), "Ignoring remove");
            return MutationOutcome::Skipped(SkipReason::NotInCart);
        };

        debug_assert!(!existing.id.is_provisional(), "remove_item ran beside an insert");
        let Some(row_id) = existing.id.canonical() else {
            warn!(item_id = %existing.id, "Entry not confirmed yet, ignoring remove");
            return MutationOutcome::Skipped(SkipReason::Unconfirmed);
        };

        if existing.quantity > 1 {
            return self
                .update_quantity(product_id, row_id, existing.quantity - 1, "remove_item")
                .await;
        }

        let store = &self.inner.store;
        let tx = Transaction::begin(store, "remove_item", CartMutation::Remove { product_id });

        let remote = &self.inner.remote;
        match self
            .inner
            .retry
            .idempotent("delete_cart_row", || remote.delete_cart_row(row_id))
            .await
        {
            Ok(()) => tx.commit(),
            Err(e) => tx.revert(&CartError::from(e)),
        }
    }

    async fn update_quantity(
        &self,
        product_id: ProductId,
        row_id: CartRowId,
        quantity: u32,
        operation: &'static str,
    ) -> MutationOutcome {
        let store = &self.inner.store;
        let tx = Transaction::begin(
            store,
            operation,
            CartMutation::SetQuantity {
                product_id,
                quantity,
            },
        );
        debug!(row_id = %row_id, quantity, "Optimistic quantity change");

        let remote = &self.inner.remote;
        match self
            .inner
            .retry
            .idempotent("update_cart_row_quantity", || {
                remote.update_cart_row_quantity(row_id, quantity)
            })
            .await
        {
            Ok(()) => tx.commit(),
            Err(e) => tx.revert(&CartError::from(e)),
        }
    }

    #[instrument(skip(self))]
    async fn run_clear(&self) -> MutationOutcome {
        let Some(user_id) = self.current_user("clear_cart").await else {
            return MutationOutcome::Skipped(SkipReason::Unauthenticated);
        };

        let store = &self.inner.store;
        let tx = Transaction::begin(store, "clear_cart", CartMutation::Clear);

        let remote = &self.inner.remote;
        match self
            .inner
            .retry
            .idempotent("delete_all_cart_rows", || remote.delete_all_cart_rows(user_id))
            .await
        {
            Ok(()) => {
                info!(user_id = %user_id, "Cart cleared");
                tx.commit()
            }
            Err(e) => tx.revert(&CartError::from(e)),
        }
    }
}
