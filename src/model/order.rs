use chrono::DateTime;
use chrono::Utc;
use crate::{error::{Result, StoreError}, types::{Document, Fields}};
use garde::Validate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use strum::{AsRefStr, Display as StrumDisplay, EnumIter, EnumString};
use super::money;
use super::timestamp;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    // Position along the fulfillment path. Cancellation is off the path.
    fn stage(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Processing => Some(1),
            Self::Shipped => Some(2),
            Self::Delivered => Some(3),
            Self::Cancelled => None,
        }
    }

    /// Whether `self -> to` is allowed under `policy`. Re-setting the current status is always allowed.
    pub fn can_transition_to(&self, to: OrderStatus, policy: StatusPolicy) -> bool {
        if *self == to {
            return true;
        }

        match policy {
            StatusPolicy::Unrestricted => true,
            StatusPolicy::ForwardOnly => {
                if self.is_terminal() {
                    false
                }
                else if to == Self::Cancelled {
                    true
                }
                else {
                    matches!((self.stage(), to.stage()), (Some(from), Some(to)) if to > from)
                }
            }
        }
    }
}

/// Which status changes [`OrderStore::update_order_status`](crate::orders::OrderStore::update_order_status) accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Orders move forward along pending, processing, shipped, delivered, possibly skipping steps. Any non-terminal
    /// order can be cancelled. Delivered and cancelled orders are final.
    #[default]
    ForwardOnly,
    /// Any status can be set at any time.
    Unrestricted,
}

impl StatusPolicy {
    pub fn check(&self, from: OrderStatus, to: OrderStatus) -> Result<()> {
        if from.can_transition_to(to, *self) {
            Ok(())
        }
        else {
            Err(StoreError::InvalidTransition { from, to })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id:       String,
    /// Product name at the time of ordering.
    pub product_name:     String,
    pub quantity:         u32,
    /// Product price at the time of ordering.
    #[serde(with = "super::money")]
    pub unit_price:       Decimal,
    #[serde(with = "super::money")]
    pub total_price:      Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image:            Option<String>,
}

/// An order line as supplied to [`create_order`](crate::orders::OrderStore::create_order) or as found in a stored
/// document. Older documents name the product by `id`/`name` and carry a single `price`; [`normalize`] settles all
/// of that into an [`OrderItem`].
///
/// [`normalize`]: NewOrderItem::normalize
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderItem {
    #[serde(default)]
    #[garde(length(min = 1))]
    pub product_id:       Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub id:               Option<String>,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub product_name:     Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub name:             Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub quantity:         Option<u32>,
    #[serde(default, with = "super::money::option")]
    #[garde(skip)]
    pub unit_price:       Option<Decimal>,
    #[serde(default, with = "super::money::option")]
    #[garde(skip)]
    pub price:            Option<Decimal>,
    #[serde(default, with = "super::money::option")]
    #[garde(skip)]
    pub total_price:      Option<Decimal>,
    #[serde(default)]
    #[garde(skip)]
    pub selected_variant: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub image:            Option<String>,
}

impl NewOrderItem {
    pub fn new<I, N>(product_id: I, product_name: N, quantity: u32, unit_price: Decimal) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        Self {
            product_id: Some(product_id.into()),
            product_name: Some(product_name.into()),
            quantity: Some(quantity),
            unit_price: Some(unit_price),
            ..Default::default()
        }
    }

    pub fn with_variant<S: Into<String>>(mut self, variant: Option<S>) -> Self {
        self.selected_variant = variant.map(Into::into);
        self
    }

    pub fn with_image<S: Into<String>>(mut self, image: Option<S>) -> Self {
        self.image = image.map(Into::into).filter(|i: &String| !i.is_empty());
        self
    }

    /// Settle the price fields: `unitPrice` falls back to `price`, `totalPrice` to `unitPrice × quantity`, and a
    /// missing or zero quantity counts as 1.
    pub fn normalize(self) -> Result<OrderItem> {
        let product_id = non_empty(self.product_id)
            .or_else(|| non_empty(self.id))
            .ok_or_else(|| StoreError::Validation("order item has no product id".to_string()))?;
        let product_name = non_empty(self.product_name)
            .or_else(|| non_empty(self.name))
            .unwrap_or_default();
        let quantity = match self.quantity {
            Some(q) if q > 0 => q,
            _ => 1,
        };
        let unit_price = self
            .unit_price
            .or(self.price)
            .ok_or_else(|| StoreError::Validation(format!("order item '{product_id}' has no price")))?;
        let total_price = match self.total_price {
            Some(total) => total,
            None => unit_price
                .checked_mul(Decimal::from(quantity))
                .ok_or_else(|| StoreError::Validation(format!("order item '{product_id}' total is out of range")))?,
        };

        if unit_price.is_sign_negative() || total_price.is_sign_negative() {
            return Err(StoreError::Validation(format!(
                "order item '{product_id}' has a negative price"
            )));
        }

        Ok(OrderItem {
            product_id,
            product_name,
            quantity,
            unit_price,
            total_price,
            selected_variant: non_empty(self.selected_variant),
            image: non_empty(self.image),
        })
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Input of [`create_order`](crate::orders::OrderStore::create_order). The customer identity is taken from the
/// authenticated session, not from here.
#[derive(Debug, Clone, Default, Validate)]
pub struct NewOrder {
    #[garde(length(min = 1))]
    pub customer_name:    String,
    #[garde(length(min = 3), contains("@"))]
    pub customer_email:   String,
    #[garde(skip)]
    pub customer_phone:   Option<String>,
    #[garde(length(min = 1))]
    pub shipping_address: String,
    #[garde(length(min = 1), dive)]
    pub items:            Vec<NewOrderItem>,
}

impl NewOrder {
    /// Validate, normalize items and stamp a pending order for `customer_id`. The id is left empty until the store
    /// assigns one.
    pub fn into_order(self, customer_id: &str, now: DateTime<Utc>) -> Result<Order> {
        self.validate()?;

        let items = self
            .items
            .into_iter()
            .map(NewOrderItem::normalize)
            .collect::<Result<Vec<_>>>()?;
        let total_amount = money::checked_sum(items.iter().map(|i| i.total_price))
            .ok_or_else(|| StoreError::Validation("order total is out of range".to_string()))?;

        Ok(Order {
            id: String::new(),
            customer_id: customer_id.to_string(),
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            customer_phone: non_empty(self.customer_phone),
            shipping_address: self.shipping_address,
            items,
            status: OrderStatus::Pending,
            total_amount,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Document identity; not part of the stored fields.
    #[serde(skip)]
    pub id:               String,
    pub customer_id:      String,
    pub customer_name:    String,
    pub customer_email:   String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone:   Option<String>,
    pub shipping_address: String,
    pub items:            Vec<OrderItem>,
    pub status:           OrderStatus,
    #[serde(serialize_with = "super::money::serialize")]
    pub total_amount:     Decimal,
    #[serde(serialize_with = "timestamp::serialize")]
    pub created_at:       DateTime<Utc>,
    #[serde(serialize_with = "timestamp::serialize")]
    pub updated_at:       DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDocument {
    #[serde(default)]
    customer_id:      String,
    #[serde(default)]
    customer_name:    String,
    #[serde(default)]
    customer_email:   String,
    #[serde(default)]
    customer_phone:   Option<String>,
    #[serde(default)]
    shipping_address: String,
    #[serde(default)]
    items:            Vec<NewOrderItem>,
    #[serde(default)]
    status:           OrderStatus,
    #[serde(default, with = "super::money::option")]
    total_amount:     Option<Decimal>,
    #[serde(default)]
    created_at:       Option<String>,
    #[serde(default)]
    updated_at:       Option<String>,
}

impl Order {
    /// Map a stored document, repairing items that lack unit or total prices.
    pub fn from_document(doc: &Document) -> Result<Order> {
        let malformed = |message: String| StoreError::MalformedDocument {
            id: doc.id.clone(),
            message,
        };

        let raw: OrderDocument = serde_json::from_value(doc.data.clone()).map_err(|e| malformed(e.to_string()))?;

        let items = raw
            .items
            .into_iter()
            .map(NewOrderItem::normalize)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| malformed(e.to_string()))?;

        let created_at = match raw.created_at {
            Some(ref s) => timestamp::parse(s).map_err(|e| malformed(format!("createdAt: {e}")))?,
            None => return Err(malformed("missing createdAt".to_string())),
        };
        let updated_at = match raw.updated_at {
            Some(ref s) => timestamp::parse(s).map_err(|e| malformed(format!("updatedAt: {e}")))?,
            None => created_at,
        };
        let total_amount = raw
            .total_amount
            .or_else(|| money::checked_sum(items.iter().map(|i| i.total_price)))
            .ok_or_else(|| malformed("order total is out of range".to_string()))?;

        Ok(Order {
            id: doc.id.clone(),
            customer_id: raw.customer_id,
            customer_name: raw.customer_name,
            customer_email: raw.customer_email,
            customer_phone: non_empty(raw.customer_phone),
            shipping_address: raw.shipping_address,
            items,
            status: raw.status,
            total_amount,
            created_at,
            updated_at,
        })
    }

    /// Stored representation of the order, without its identity.
    pub fn to_data(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// The fields written by a status change.
    pub fn status_fields(status: OrderStatus, updated_at: &DateTime<Utc>) -> Fields {
        let mut fields = Fields::new();
        fields.insert("status".to_string(), json!(status));
        fields.insert("updatedAt".to_string(), json!(timestamp::format(updated_at)));
        fields
    }

    pub fn items_total(&self) -> Decimal {
        money::saturating_sum(self.items.iter().map(|i| i.total_price))
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().fold(0u32, |acc, i| acc.saturating_add(i.quantity))
    }
}
