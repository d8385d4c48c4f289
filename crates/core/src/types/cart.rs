//! Cart entries, mutations, and immutable cart snapshots.
//!
//! A [`CartSnapshot`] is the value observers render from. It is never
//! modified in place: [`CartSnapshot::apply`] produces the next snapshot from
//! a [`CartMutation`], preserving the invariant that entries are unique by
//! product and every entry has a quantity of at least one.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{CartRowId, LocalId, ProductId};
use super::product::ProductSnapshot;

// =============================================================================
// Cart Items
// =============================================================================

/// Identifier of a cart entry.
///
/// Provisional IDs exist only between an optimistic insert and the cart
/// service confirming the row; after that the entry carries the canonical row
/// ID for all further updates and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartItemId {
    /// Assigned client-side, not known to the server.
    Provisional(LocalId),
    /// Assigned by the cart service.
    Canonical(CartRowId),
}

impl CartItemId {
    /// The server row ID, if the entry has been confirmed.
    #[must_use]
    pub const fn canonical(&self) -> Option<CartRowId> {
        match self {
            Self::Canonical(row_id) => Some(*row_id),
            Self::Provisional(_) => None,
        }
    }

    /// Whether the entry is still awaiting confirmation.
    #[must_use]
    pub const fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl core::fmt::Display for CartItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Provisional(local) => write!(f, "{local}"),
            Self::Canonical(row_id) => write!(f, "{row_id}"),
        }
    }
}

/// A single product line in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Entry identifier (provisional or canonical).
    pub id: CartItemId,
    /// Product this entry refers to. Never reassigned.
    pub product_id: ProductId,
    /// Number of units, always at least one.
    pub quantity: u32,
    /// Catalog fields captured when the entry was created.
    pub product: ProductSnapshot,
}

impl CartItem {
    /// Create a provisional entry with quantity one.
    #[must_use]
    pub fn provisional(local_id: LocalId, product: ProductSnapshot) -> Self {
        Self {
            id: CartItemId::Provisional(local_id),
            product_id: product.id,
            quantity: 1,
            product,
        }
    }

    /// Line total (`quantity × price`).
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        Decimal::from(self.quantity) * self.product.price
    }

    /// Line savings (`quantity × unit savings`).
    #[must_use]
    pub fn line_savings(&self) -> Decimal {
        Decimal::from(self.quantity) * self.product.unit_savings()
    }
}

// =============================================================================
// Mutations
// =============================================================================

/// An incremental change to the cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartMutation {
    /// Append a new entry. Replaces any existing entry for the same product in
    /// place so products stay unique.
    Insert(CartItem),
    /// Set the quantity of an existing entry. Zero removes the entry.
    SetQuantity {
        product_id: ProductId,
        quantity: u32,
    },
    /// Remove the entry for a product.
    Remove { product_id: ProductId },
    /// Swap the provisional entry for a product with the confirmed entry.
    /// Only applies while the current entry is still provisional.
    Reconcile {
        product_id: ProductId,
        item: CartItem,
    },
    /// Put back a single product's entry exactly as it was at `position`
    /// (or drop it when `entry` is `None`), leaving other products untouched.
    Restore {
        product_id: ProductId,
        entry: Option<(usize, CartItem)>,
    },
    /// Remove every entry.
    Clear,
}

impl CartMutation {
    /// Product affected by this mutation, if it targets a single product.
    #[must_use]
    pub const fn product_id(&self) -> Option<ProductId> {
        match self {
            Self::Insert(item) => Some(item.product_id),
            Self::SetQuantity { product_id, .. }
            | Self::Remove { product_id }
            | Self::Reconcile { product_id, .. }
            | Self::Restore { product_id, .. } => Some(*product_id),
            Self::Clear => None,
        }
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Immutable view of the cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    /// Entries in display order, unique by product.
    pub items: Vec<CartItem>,
    /// True only while the full cart is being fetched.
    pub is_loading: bool,
    /// Last failure, if any.
    pub error: Option<String>,
    /// Change counter, bumped on every installed snapshot.
    pub version: u64,
}

impl CartSnapshot {
    /// An empty cart.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from a full item list.
    ///
    /// Entries with quantity zero are dropped and duplicate products keep only
    /// their first entry.
    #[must_use]
    pub fn with_items(items: Vec<CartItem>) -> Self {
        Self {
            items: normalize(items),
            ..Self::default()
        }
    }

    /// Entry for a product, if present.
    #[must_use]
    pub fn find(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Position of a product's entry, if present.
    #[must_use]
    pub fn position(&self, product_id: ProductId) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.product_id == product_id)
    }

    /// Whether the cart has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of distinct products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Capture a product's entry together with its position, for a later
    /// [`CartMutation::Restore`].
    #[must_use]
    pub fn entry(&self, product_id: ProductId) -> Option<(usize, CartItem)> {
        self.items
            .iter()
            .enumerate()
            .find(|(_, item)| item.product_id == product_id)
            .map(|(index, item)| (index, item.clone()))
    }

    /// Produce the next snapshot after applying `mutation`.
    ///
    /// `is_loading` and `error` carry over; `version` is left for the owner of
    /// the snapshot to bump.
    #[must_use]
    pub fn apply(&self, mutation: &CartMutation) -> Self {
        let mut items = self.items.clone();

        match mutation {
            CartMutation::Insert(item) => {
                match items.iter_mut().find(|i| i.product_id == item.product_id) {
                    Some(existing) => *existing = item.clone(),
                    None => items.push(item.clone()),
                }
            }
            CartMutation::SetQuantity {
                product_id,
                quantity: 0,
            }
            | CartMutation::Remove { product_id } => {
                items.retain(|i| i.product_id != *product_id);
            }
            CartMutation::SetQuantity {
                product_id,
                quantity,
            } => {
                if let Some(existing) = items.iter_mut().find(|i| i.product_id == *product_id) {
                    existing.quantity = *quantity;
                }
            }
            CartMutation::Reconcile { product_id, item } => {
                if let Some(existing) = items
                    .iter_mut()
                    .find(|i| i.product_id == *product_id && i.id.is_provisional())
                {
                    // Keep the quantity shown locally; the row only supplies identity
                    // and fresh catalog fields.
                    *existing = CartItem {
                        quantity: existing.quantity,
                        ..item.clone()
                    };
                }
            }
            CartMutation::Restore { product_id, entry } => {
                items.retain(|i| i.product_id != *product_id);
                if let Some((position, item)) = entry {
                    let at = (*position).min(items.len());
                    items.insert(at, item.clone());
                }
            }
            CartMutation::Clear => items.clear(),
        }

        Self {
            items,
            is_loading: self.is_loading,
            error: self.error.clone(),
            version: self.version,
        }
    }
}

/// Drop zero-quantity entries and keep the first entry per product.
fn normalize(items: Vec<CartItem>) -> Vec<CartItem> {
    let mut seen = std::collections::HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| item.quantity > 0 && seen.insert(item.product_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str, price: i64) -> ProductSnapshot {
        ProductSnapshot {
            id: ProductId::random(),
            name: name.to_string(),
            price: Decimal::from(price),
            original_price: None,
            weight: None,
            image_url: None,
            is_veg: true,
        }
    }

    fn canonical(product: ProductSnapshot, quantity: u32) -> CartItem {
        CartItem {
            id: CartItemId::Canonical(CartRowId::random()),
            product_id: product.id,
            quantity,
            product,
        }
    }

    #[test]
    fn test_insert_appends_and_keeps_products_unique() {
        let milk = product("Milk", 30);
        let snapshot = CartSnapshot::empty()
            .apply(&CartMutation::Insert(CartItem::provisional(
                LocalId::new(1),
                milk.clone(),
            )))
            .apply(&CartMutation::Insert(canonical(milk.clone(), 3)));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.find(milk.id).map(|i| i.quantity), Some(3));
    }

    #[test]
    fn test_set_quantity_zero_removes_entry() {
        let eggs = product("Eggs", 72);
        let snapshot = CartSnapshot::with_items(vec![canonical(eggs.clone(), 1)]).apply(
            &CartMutation::SetQuantity {
                product_id: eggs.id,
                quantity: 0,
            },
        );
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_set_quantity_on_absent_product_is_noop() {
        let snapshot = CartSnapshot::empty().apply(&CartMutation::SetQuantity {
            product_id: ProductId::random(),
            quantity: 4,
        });
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_reconcile_only_replaces_provisional_entry() {
        let bread = product("Bread", 45);
        let provisional = CartItem::provisional(LocalId::new(9), bread.clone());
        let mut confirmed = canonical(bread.clone(), 1);

        let snapshot = CartSnapshot::with_items(vec![CartItem {
            quantity: 2,
            ..provisional
        }])
        .apply(&CartMutation::Reconcile {
            product_id: bread.id,
            item: confirmed.clone(),
        });

        let entry = snapshot.find(bread.id).cloned();
        assert_eq!(entry.as_ref().map(|i| i.id), Some(confirmed.id));
        // Local quantity wins over the row's
        assert_eq!(entry.map(|i| i.quantity), Some(2));

        // A second reconcile against a canonical entry changes nothing
        confirmed.id = CartItemId::Canonical(CartRowId::random());
        let again = snapshot.apply(&CartMutation::Reconcile {
            product_id: bread.id,
            item: confirmed,
        });
        assert_eq!(again, snapshot);
    }

    #[test]
    fn test_restore_puts_entry_back_at_position() {
        let a = canonical(product("A", 1), 1);
        let b = canonical(product("B", 2), 2);
        let c = canonical(product("C", 3), 3);
        let before = CartSnapshot::with_items(vec![a.clone(), b.clone(), c.clone()]);
        let saved = before.entry(b.product_id);

        let after = before
            .apply(&CartMutation::Remove {
                product_id: b.product_id,
            })
            .apply(&CartMutation::Restore {
                product_id: b.product_id,
                entry: saved,
            });

        assert_eq!(after.items, vec![a, b, c]);
    }

    #[test]
    fn test_restore_without_entry_removes_product() {
        let a = canonical(product("A", 1), 1);
        let after = CartSnapshot::with_items(vec![a.clone()]).apply(&CartMutation::Restore {
            product_id: a.product_id,
            entry: None,
        });
        assert!(after.is_empty());
    }

    #[test]
    fn test_with_items_normalizes() {
        let a = product("A", 1);
        let snapshot = CartSnapshot::with_items(vec![
            canonical(a.clone(), 2),
            canonical(a, 5),
            canonical(product("B", 2), 0),
        ]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.items.first().map(|i| i.quantity), Some(2));
    }

    #[test]
    fn test_apply_carries_error_and_loading() {
        let snapshot = CartSnapshot {
            error: Some("boom".to_string()),
            is_loading: true,
            version: 4,
            ..CartSnapshot::default()
        };
        let next = snapshot.apply(&CartMutation::Clear);
        assert_eq!(next.error.as_deref(), Some("boom"));
        assert!(next.is_loading);
        assert_eq!(next.version, 4);
    }

    #[test]
    fn test_cart_item_id_helpers() {
        let row = CartRowId::random();
        assert_eq!(CartItemId::Canonical(row).canonical(), Some(row));
        assert!(CartItemId::Provisional(LocalId::new(1)).is_provisional());
        assert_eq!(CartItemId::Provisional(LocalId::new(1)).canonical(), None);
    }
}
