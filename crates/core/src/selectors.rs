//! Derived projections over a cart snapshot.
//!
//! Pure functions: no side effects, no network access. Call them on every
//! render instead of caching totals in the cart state.

use rust_decimal::Decimal;

use crate::types::{CartSnapshot, ProductId};

/// Total number of units across all entries.
#[must_use]
pub fn total_item_count(snapshot: &CartSnapshot) -> u64 {
    snapshot
        .items
        .iter()
        .map(|item| u64::from(item.quantity))
        .sum()
}

/// Sum of `quantity × price` over all entries.
#[must_use]
pub fn total_price(snapshot: &CartSnapshot) -> Decimal {
    snapshot.items.iter().map(|item| item.line_total()).sum()
}

/// Sum of `quantity × max(0, original_price − price)` over all entries.
///
/// Entries without an original price contribute nothing.
#[must_use]
pub fn total_savings(snapshot: &CartSnapshot) -> Decimal {
    snapshot.items.iter().map(|item| item.line_savings()).sum()
}

/// Quantity of a single product, zero when it is not in the cart.
#[must_use]
pub fn quantity_of(snapshot: &CartSnapshot, product_id: ProductId) -> u32 {
    snapshot.find(product_id).map_or(0, |item| item.quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CartItem, CartItemId, CartRowId, ProductSnapshot};

    fn item(price: i64, original: Option<i64>, quantity: u32) -> CartItem {
        let product = ProductSnapshot {
            id: ProductId::random(),
            name: "item".to_string(),
            price: Decimal::from(price),
            original_price: original.map(Decimal::from),
            weight: None,
            image_url: None,
            is_veg: false,
        };
        CartItem {
            id: CartItemId::Canonical(CartRowId::random()),
            product_id: product.id,
            quantity,
            product,
        }
    }

    #[test]
    fn test_totals_for_mixed_cart() {
        let snapshot = CartSnapshot::with_items(vec![item(10, None, 2), item(5, Some(8), 1)]);

        assert_eq!(total_price(&snapshot), Decimal::from(25));
        assert_eq!(total_savings(&snapshot), Decimal::from(3));
        assert_eq!(total_item_count(&snapshot), 3);
    }

    #[test]
    fn test_totals_for_empty_cart() {
        let snapshot = CartSnapshot::empty();
        assert_eq!(total_price(&snapshot), Decimal::ZERO);
        assert_eq!(total_savings(&snapshot), Decimal::ZERO);
        assert_eq!(total_item_count(&snapshot), 0);
    }

    #[test]
    fn test_savings_never_negative() {
        let snapshot = CartSnapshot::with_items(vec![item(12, Some(10), 3)]);
        assert_eq!(total_savings(&snapshot), Decimal::ZERO);
    }

    #[test]
    fn test_fractional_prices() {
        let mut line = item(0, None, 3);
        line.product.price = Decimal::new(1999, 2);
        let snapshot = CartSnapshot::with_items(vec![line]);
        assert_eq!(total_price(&snapshot), Decimal::new(5997, 2));
    }

    #[test]
    fn test_quantity_of() {
        let line = item(10, None, 4);
        let product_id = line.product_id;
        let snapshot = CartSnapshot::with_items(vec![line]);

        assert_eq!(quantity_of(&snapshot, product_id), 4);
        assert_eq!(quantity_of(&snapshot, ProductId::random()), 0);
    }
}
