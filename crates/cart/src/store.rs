//! In-memory cart state.
//!
//! [`CartStore`] owns the current [`CartSnapshot`] and is the only place a new
//! snapshot is installed. Every install bumps the snapshot's `version` and
//! notifies observers before the installing call returns.
//!
//! Writes are serialized by an internal lock that is held while observers
//! run, so observers see snapshots in version order. Only the cart engine
//! writes; everyone else gets read access (`snapshot`, `subscribe`, `watch`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;
use tracing::trace;

use quick_basket_core::{CartItem, CartMutation, CartSnapshot};

type Observer = Arc<dyn Fn(&CartSnapshot) + Send + Sync>;

/// Shared handle to the cart state.
///
/// Cheaply cloneable; clones see the same cart. Installing snapshots is
/// reserved to [`CartSync`](crate::CartSync).
///
/// ```compile_fail
/// fn bypass_engine(store: &quick_basket_cart::CartStore) {
///     store.reset();
/// }
/// ```
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartStoreInner>,
}

struct CartStoreInner {
    current: Mutex<Arc<CartSnapshot>>,
    /// Serializes installs together with their notifications.
    writer: Mutex<()>,
    observers: Mutex<Vec<(u64, Observer)>>,
    next_observer: AtomicU64,
    watch: watch::Sender<Arc<CartSnapshot>>,
}

impl std::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStore")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl CartStore {
    /// Create a store holding an empty cart.
    #[must_use]
    pub(crate) fn new() -> Self {
        let empty = Arc::new(CartSnapshot::empty());
        let (watch, _) = watch::channel(Arc::clone(&empty));

        Self {
            inner: Arc::new(CartStoreInner {
                current: Mutex::new(empty),
                writer: Mutex::new(()),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(0),
                watch,
            }),
        }
    }

    /// Current immutable view of the cart.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CartSnapshot> {
        Arc::clone(&self.inner.current.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install a full item list, e.g. after a fetch. Ends any loading state;
    /// `error` is kept.
    pub(crate) fn replace(&self, items: Vec<CartItem>) -> Arc<CartSnapshot> {
        self.install(|current| CartSnapshot {
            is_loading: false,
            error: current.error.clone(),
            ..CartSnapshot::with_items(items)
        })
    }

    /// Install an incremental change and return the snapshot it replaced.
    pub(crate) fn apply(&self, mutation: &CartMutation) -> Arc<CartSnapshot> {
        self.install(|current| current.apply(mutation))
    }

    /// Undo a failed change and record `error`.
    ///
    /// If nothing else was installed since `applied_version` (the version
    /// produced by the failed change), the items of `before` come back
    /// exactly. Otherwise only `undo` is applied to the current cart so that
    /// changes to other products survive.
    pub(crate) fn revert(
        &self,
        applied_version: u64,
        before: &CartSnapshot,
        undo: &CartMutation,
        error: String,
    ) -> Arc<CartSnapshot> {
        self.install(|current| {
            let items = if current.version == applied_version {
                before.items.clone()
            } else {
                trace!(
                    applied_version,
                    current_version = current.version,
                    "Cart changed since optimistic step, reverting one product"
                );
                current.apply(undo).items
            };

            CartSnapshot {
                items,
                is_loading: current.is_loading,
                error: Some(error),
                version: current.version,
            }
        })
    }

    /// Put back every item of `before` and record `error`.
    pub(crate) fn restore(&self, before: &CartSnapshot, error: String) -> Arc<CartSnapshot> {
        self.install(|current| CartSnapshot {
            items: before.items.clone(),
            is_loading: current.is_loading,
            error: Some(error),
            version: current.version,
        })
    }

    /// A full fetch started: loading, with any previous error cleared.
    pub(crate) fn begin_fetch(&self) -> Arc<CartSnapshot> {
        self.install(|current| CartSnapshot {
            is_loading: true,
            error: None,
            ..current.clone()
        })
    }

    /// A full fetch failed: items stay, loading ends, `error` is recorded.
    pub(crate) fn fetch_failed(&self, error: String) -> Arc<CartSnapshot> {
        self.install(|current| CartSnapshot {
            is_loading: false,
            error: Some(error),
            ..current.clone()
        })
    }

    /// Forget the last failure.
    pub(crate) fn clear_error(&self) -> Arc<CartSnapshot> {
        self.install(|current| CartSnapshot {
            error: None,
            ..current.clone()
        })
    }

    /// Back to an empty, idle cart with no error.
    pub(crate) fn reset(&self) -> Arc<CartSnapshot> {
        self.install(|_| CartSnapshot::empty())
    }

    /// Call `observer` with every snapshot installed from now on.
    ///
    /// The observer runs synchronously on the thread that installed the
    /// snapshot. Dropping the returned [`Subscription`] stops notifications.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&CartSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(observer)));

        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Receiver that always holds the latest snapshot, for async consumers.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<CartSnapshot>> {
        self.inner.watch.subscribe()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Compute and install the next snapshot, then notify. Returns the prior
    /// snapshot.
    fn install(&self, next: impl FnOnce(&CartSnapshot) -> CartSnapshot) -> Arc<CartSnapshot> {
        let _writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (prior, installed) = {
            let mut current = self
                .inner
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let mut snapshot = next(&current);
            snapshot.version = current.version + 1;
            let installed = Arc::new(snapshot);
            let prior = std::mem::replace(&mut *current, Arc::clone(&installed));
            (prior, installed)
        };

        trace!(
            version = installed.version,
            items = installed.len(),
            "Installed cart snapshot"
        );

        let observers: Vec<Observer> = self
            .inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer(&installed);
        }
        self.inner.watch.send_replace(installed);

        prior
    }
}

/// Handle for an observer registered with [`CartStore::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    store: Weak<CartStoreInner>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store
                .observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use quick_basket_core::{CartItemId, CartRowId, LocalId, ProductId, ProductSnapshot};

    use super::*;

    fn item(name: &str, quantity: u32) -> CartItem {
        let id = ProductId::random();
        CartItem {
            id: CartItemId::Canonical(CartRowId::random()),
            product_id: id,
            quantity,
            product: ProductSnapshot {
                id,
                name: name.to_string(),
                price: Decimal::from(20),
                original_price: None,
                weight: None,
                image_url: None,
                is_veg: true,
            },
        }
    }

    #[test]
    fn test_apply_returns_prior_and_bumps_version() {
        let store = CartStore::new();
        let milk = item("Milk", 1);

        let prior = store.apply(&CartMutation::Insert(milk.clone()));
        assert!(prior.is_empty());
        assert_eq!(prior.version, 0);

        let now = store.snapshot();
        assert_eq!(now.version, 1);
        assert_eq!(now.items, vec![milk]);
        // The old snapshot is untouched
        assert!(prior.is_empty());
    }

    #[test]
    fn test_observers_notified_before_return() {
        let store = CartStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        let _subscription = store.subscribe(move |snapshot| {
            log.lock().unwrap().push(snapshot.len());
        });

        store.apply(&CartMutation::Insert(item("Bread", 1)));
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        store.apply(&CartMutation::Clear);
        assert_eq!(*seen.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_observer_may_read_store() {
        let store = CartStore::new();
        let versions = Arc::new(Mutex::new(Vec::new()));

        let reader = store.clone();
        let log = Arc::clone(&versions);
        let _subscription = store.subscribe(move |snapshot| {
            assert_eq!(reader.snapshot().version, snapshot.version);
            log.lock().unwrap().push(snapshot.version);
        });

        store.begin_fetch();
        store.fetch_failed("offline".to_string());
        assert_eq!(*versions.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let store = CartStore::new();
        let calls = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&calls);
        let subscription = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(store.observer_count(), 1);

        store.reset();
        drop(subscription);
        store.reset();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn test_replace_ends_loading_and_keeps_error() {
        let store = CartStore::new();
        store.begin_fetch();
        store.restore(&CartSnapshot::empty(), "offline".to_string());
        assert!(store.snapshot().is_loading);

        store.replace(vec![item("Eggs", 2), item("Rice", 1)]);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.error.as_deref(), Some("offline"));

        store.clear_error();
        assert_eq!(store.snapshot().error, None);
    }

    #[test]
    fn test_revert_restores_exact_snapshot_when_unchanged() {
        let store = CartStore::new();
        let a = item("A", 1);
        let b = item("B", 2);
        store.replace(vec![a.clone(), b.clone()]);

        let before = store.apply(&CartMutation::Remove {
            product_id: a.product_id,
        });
        let applied = store.snapshot().version;

        store.revert(
            applied,
            &before,
            &CartMutation::Restore {
                product_id: a.product_id,
                entry: before.entry(a.product_id),
            },
            "boom".to_string(),
        );

        let after = store.snapshot();
        assert_eq!(after.items, before.items);
        assert_eq!(after.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_revert_keeps_later_changes_to_other_products() {
        let store = CartStore::new();
        let a = item("A", 1);
        store.replace(vec![a.clone()]);

        let provisional = CartItem {
            id: CartItemId::Provisional(LocalId::new(1)),
            ..item("B", 1)
        };
        let before = store.apply(&CartMutation::Insert(provisional.clone()));
        let applied = store.snapshot().version;

        // Another product changes while B's insert is in flight
        store.apply(&CartMutation::SetQuantity {
            product_id: a.product_id,
            quantity: 4,
        });

        store.revert(
            applied,
            &before,
            &CartMutation::Restore {
                product_id: provisional.product_id,
                entry: None,
            },
            "insert failed".to_string(),
        );

        let after = store.snapshot();
        assert_eq!(after.len(), 1);
        assert_eq!(after.find(a.product_id).map(|i| i.quantity), Some(4));
    }

    #[test]
    fn test_fetch_lifecycle() {
        let store = CartStore::new();
        store.fetch_failed("stale".to_string());

        store.begin_fetch();
        let loading = store.snapshot();
        assert!(loading.is_loading);
        assert_eq!(loading.error, None);

        store.fetch_failed("offline".to_string());
        let failed = store.snapshot();
        assert!(!failed.is_loading);
        assert_eq!(failed.error.as_deref(), Some("offline"));
    }

    #[test]
    fn test_restore_brings_back_all_items() {
        let store = CartStore::new();
        store.replace(vec![item("A", 1), item("B", 3)]);

        let before = store.apply(&CartMutation::Clear);
        store.restore(&before, "clear failed".to_string());

        let after = store.snapshot();
        assert_eq!(after.items, before.items);
        assert_eq!(after.error.as_deref(), Some("clear failed"));
        assert!(after.version > before.version);
    }

    #[tokio::test]
    async fn test_watch_sees_latest_snapshot() {
        let store = CartStore::new();
        let mut rx = store.watch();

        store.apply(&CartMutation::Insert(item("Curd", 1)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }
}
