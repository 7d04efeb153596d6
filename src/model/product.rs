use chrono::DateTime;
use chrono::Utc;
use crate::{error::{Result, StoreError}, types::{Document, Fields}};
use garde::Validate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use std::fmt::Display;
use super::{money, non_negative, timestamp};

/// Product category. Seller-managed products use the fixed names; customer-facing catalogs may carry arbitrary
/// categories, kept as [`Category::Custom`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Fruits,
    Vegetables,
    Dairy,
    Meat,
    Bakery,
    Beverages,
    #[default]
    Other,
    Custom(String),
}

impl Category {
    pub const FIXED: [Category; 7] = [
        Category::Fruits,
        Category::Vegetables,
        Category::Dairy,
        Category::Meat,
        Category::Bakery,
        Category::Beverages,
        Category::Other,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Fruits => "fruits",
            Self::Vegetables => "vegetables",
            Self::Dairy => "dairy",
            Self::Meat => "meat",
            Self::Bakery => "bakery",
            Self::Beverages => "beverages",
            Self::Other => "other",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        match name.to_lowercase().as_str() {
            "fruits" => Self::Fruits,
            "vegetables" => Self::Vegetables,
            "dairy" => Self::Dairy,
            "meat" => Self::Meat,
            "bakery" => Self::Bakery,
            "beverages" => Self::Beverages,
            "other" => Self::Other,
            _ => Self::Custom(name),
        }
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(skip)]
    pub id:          String,
    pub name:        String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "super::money")]
    pub price:       Decimal,
    #[serde(default)]
    pub stock:       u32,
    #[serde(default)]
    pub category:    Category,
    #[serde(default)]
    pub image:       String,
    #[serde(with = "timestamp", default)]
    pub created_at:  DateTime<Utc>,
    #[serde(default)]
    pub seller_id:   String,
}

impl Product {
    pub fn from_document(doc: &Document) -> Result<Product> {
        let mut product: Product = serde_json::from_value(doc.data.clone()).map_err(|e| StoreError::MalformedDocument {
            id:      doc.id.clone(),
            message: e.to_string(),
        })?;
        if product.price.is_sign_negative() && !product.price.is_zero() {
            return Err(StoreError::MalformedDocument {
                id:      doc.id.clone(),
                message: format!("negative price {}", product.price),
            });
        }
        product.id = doc.id.clone();
        Ok(product)
    }

    pub fn to_data(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Out-of-stock products stay listed but cannot be added to a cart.
    pub fn is_sellable(&self) -> bool {
        self.stock > 0
    }

    /// Case-insensitive substring match over name and description. `needle` must already be lowercase.
    pub(crate) fn matches_search(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle) || self.description.to_lowercase().contains(needle)
    }

    pub(crate) fn apply_patch(&mut self, patch: &ProductPatch) {
        if let Some(ref name) = patch.name {
            self.name = name.clone();
        }
        if let Some(ref description) = patch.description {
            self.description = description.clone();
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(stock) = patch.stock {
            self.stock = stock;
        }
        if let Some(ref category) = patch.category {
            self.category = category.clone();
        }
        if let Some(ref image) = patch.image {
            self.image = image.clone();
        }
    }
}

/// Input of [`add_product`](crate::catalog::ProductCatalog::add_product). The seller is taken from the
/// authenticated session.
#[derive(Debug, Clone, Default, Validate)]
pub struct NewProduct {
    #[garde(length(min = 1))]
    pub name:        String,
    #[garde(skip)]
    pub description: String,
    #[garde(custom(non_negative))]
    pub price:       Decimal,
    #[garde(skip)]
    pub stock:       u32,
    #[garde(skip)]
    pub category:    Category,
    #[garde(skip)]
    pub image:       String,
}

impl NewProduct {
    pub fn into_product(self, seller_id: &str, now: DateTime<Utc>) -> Result<Product> {
        self.validate()?;
        Ok(Product {
            id: String::new(),
            name: self.name,
            description: self.description,
            price: self.price,
            stock: self.stock,
            category: self.category,
            image: self.image,
            created_at: now,
            seller_id: seller_id.to_string(),
        })
    }
}

/// Partial product update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Validate)]
pub struct ProductPatch {
    #[garde(length(min = 1))]
    pub name:        Option<String>,
    #[garde(skip)]
    pub description: Option<String>,
    #[garde(skip)]
    pub price:       Option<Decimal>,
    #[garde(skip)]
    pub stock:       Option<u32>,
    #[garde(skip)]
    pub category:    Option<Category>,
    #[garde(skip)]
    pub image:       Option<String>,
}

impl ProductPatch {
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if let Some(price) = self.price {
            non_negative(&price, &()).map_err(|e| StoreError::Validation(format!("price: {e}")))?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.stock.is_none()
            && self.category.is_none()
            && self.image.is_none()
    }

    /// The stored fields this patch changes.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        if let Some(ref name) = self.name {
            fields.insert("name".to_string(), json!(name));
        }
        if let Some(ref description) = self.description {
            fields.insert("description".to_string(), json!(description));
        }
        if let Some(price) = self.price {
            fields.insert("price".to_string(), money::to_value(&price).unwrap_or_else(|| json!(price)));
        }
        if let Some(stock) = self.stock {
            fields.insert("stock".to_string(), json!(stock));
        }
        if let Some(ref category) = self.category {
            fields.insert("category".to_string(), json!(category.as_str()));
        }
        if let Some(ref image) = self.image {
            fields.insert("image".to_string(), json!(image));
        }
        fields
    }
}
