use garde::Validate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use super::non_negative;
use super::Product;

/// A cart line. Lines are keyed by product id and selected variant: the same product in two variants makes two
/// lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Product id.
    #[garde(length(min = 1))]
    pub id:               String,
    #[serde(default)]
    #[garde(skip)]
    pub name:             String,
    #[serde(with = "super::money")]
    #[garde(custom(non_negative))]
    pub price:            Decimal,
    #[serde(default = "one")]
    #[garde(skip)]
    pub quantity:         u32,
    #[serde(default)]
    #[garde(skip)]
    pub image:            String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub selected_variant: Option<String>,
}

fn one() -> u32 {
    1
}

impl CartItem {
    pub fn new<I, N>(id: I, name: N, price: Decimal, quantity: u32) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            quantity,
            image: String::new(),
            selected_variant: None,
        }
    }

    /// A line for `quantity` units of `product`.
    pub fn from_product(product: &Product, quantity: u32) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            price: product.price,
            quantity,
            image: product.image.clone(),
            selected_variant: None,
        }
    }

    pub fn with_variant<S: Into<String>>(mut self, variant: S) -> Self {
        self.selected_variant = Some(variant.into());
        self
    }

    pub fn with_image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = image.into();
        self
    }

    pub fn is_line(&self, id: &str, variant: Option<&str>) -> bool {
        self.id == id && self.selected_variant.as_deref() == variant
    }

    pub fn line_total(&self) -> Decimal {
        self.price.saturating_mul(Decimal::from(self.quantity))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;
    use super::*;

    #[test]
    fn test_line_identity() {
        let plain = CartItem::new("prod_2", "Farm Fresh Eggs", dec!(4.50), 1);
        let dozen = plain.clone().with_variant("dozen");
        assert!(plain.is_line("prod_2", None));
        assert!(!plain.is_line("prod_2", Some("dozen")));
        assert!(dozen.is_line("prod_2", Some("dozen")));
    }

    #[test]
    fn test_stored_shape() {
        let item: CartItem = serde_json::from_value(json!({"id": "prod_1", "name": "Organic Apples", "price": 2.99}))
            .unwrap();
        assert_eq!(item.quantity, 1);
        assert_eq!(item.line_total(), dec!(2.99));

        let value = serde_json::to_value(item.with_variant("large")).unwrap();
        assert_eq!(value["selectedVariant"], json!("large"));
    }
}
