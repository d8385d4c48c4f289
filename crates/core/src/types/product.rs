//! Denormalized product data carried by cart entries.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// Copy of the catalog fields a cart entry needs for display and pricing.
///
/// Field names follow the `products` table columns so the joined cart row
/// deserializes directly. The snapshot may be stale relative to the catalog;
/// the cart never re-validates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    /// Catalog ID.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Current selling price.
    pub price: Decimal,
    /// Price before discount, if the product is on offer.
    #[serde(default)]
    pub original_price: Option<Decimal>,
    /// Pack size label (e.g., "500 g").
    #[serde(default)]
    pub weight: Option<String>,
    /// Image reference.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Vegetarian flag.
    #[serde(default)]
    pub is_veg: bool,
}

impl ProductSnapshot {
    /// Savings on a single unit; zero when there is no original price or it is
    /// not above the selling price.
    #[must_use]
    pub fn unit_savings(&self) -> Decimal {
        self.original_price
            .map_or(Decimal::ZERO, |original| (original - self.price).max(Decimal::ZERO))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn product(price: i64, original: Option<i64>) -> ProductSnapshot {
        ProductSnapshot {
            id: ProductId::random(),
            name: "Amul Taaza Toned Milk".to_string(),
            price: Decimal::from(price),
            original_price: original.map(Decimal::from),
            weight: Some("500 ml".to_string()),
            image_url: None,
            is_veg: true,
        }
    }

    #[test]
    fn test_unit_savings() {
        assert_eq!(product(5, Some(8)).unit_savings(), Decimal::from(3));
        assert_eq!(product(5, None).unit_savings(), Decimal::ZERO);
        // Original price below selling price never yields negative savings
        assert_eq!(product(8, Some(5)).unit_savings(), Decimal::ZERO);
    }

    #[test]
    fn test_deserialize_joined_row_product() {
        let id = ProductId::random();
        let json = format!(
            r#"{{"id":"{id}","name":"Brown Bread","price":45,"original_price":50.5,"weight":"400 g","image_url":"/img/bread.avif","is_veg":true}}"#
        );
        let snapshot: ProductSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.id, id);
        assert_eq!(snapshot.price, Decimal::from(45));
        assert_eq!(snapshot.original_price, Some(Decimal::new(505, 1)));
    }

    #[test]
    fn test_deserialize_missing_optional_fields() {
        let id = ProductId::random();
        let json = format!(r#"{{"id":"{id}","name":"Eggs","price":"72.00"}}"#);
        let snapshot: ProductSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.original_price, None);
        assert!(!snapshot.is_veg);
    }
}
