use crate::model::StatusPolicy;
use crate::types::CollectionRef;
use fieldx::fxstruct;

/// Store configuration. Every field has a default, so `StoreConfig::builder().build()` yields a working setup.
///
/// ```ignore
/// let config = StoreConfig::builder()
///     .orders_collection("shop_orders")
///     .top_products_limit(10)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
#[fxstruct(no_new, builder, get(copy))]
pub struct StoreConfig {
    #[fieldx(get(copy(off)), builder(into), default(String::from("orders")))]
    pub orders_collection:   String,
    #[fieldx(get(copy(off)), builder(into), default(String::from("products")))]
    pub products_collection: String,
    /// Carts are stored one document per user, keyed by user id.
    #[fieldx(get(copy(off)), builder(into), default(String::from("carts")))]
    pub carts_collection:    String,
    #[fieldx(get(copy(off)), builder(into), default(String::from("users")))]
    pub users_collection:    String,
    /// Precomputed summary documents, when the deployment maintains them.
    #[fieldx(get(copy(off)), builder(into), default(String::from("stats")))]
    pub stats_collection:    String,
    #[fieldx(get(copy(off)), builder(into), default(String::from("sales")))]
    pub sales_collection:    String,
    /// Maximum number of entries per local cache.
    #[fieldx(default(1_000))]
    pub cache_capacity:      u64,
    #[fieldx(default(5))]
    pub top_products_limit:  usize,
    #[fieldx(default(StatusPolicy::ForwardOnly))]
    pub status_policy:       StatusPolicy,
}

impl StoreConfig {
    pub fn orders(&self) -> CollectionRef {
        CollectionRef::new(self.orders_collection.as_str())
    }

    pub fn products(&self) -> CollectionRef {
        CollectionRef::new(self.products_collection.as_str())
    }

    pub fn carts(&self) -> CollectionRef {
        CollectionRef::new(self.carts_collection.as_str())
    }

    pub fn users(&self) -> CollectionRef {
        CollectionRef::new(self.users_collection.as_str())
    }

    pub fn stats(&self) -> CollectionRef {
        CollectionRef::new(self.stats_collection.as_str())
    }

    pub fn sales(&self) -> CollectionRef {
        CollectionRef::new(self.sales_collection.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::builder().build().unwrap();
        assert_eq!(config.orders().name(), "orders");
        assert_eq!(config.carts().name(), "carts");
        assert_eq!(config.top_products_limit, 5);
        assert_eq!(config.status_policy, StatusPolicy::ForwardOnly);
    }

    #[test]
    fn test_overrides() {
        let config = StoreConfig::builder()
            .orders_collection("shop_orders")
            .top_products_limit(3)
            .status_policy(StatusPolicy::Unrestricted)
            .build()
            .unwrap();
        assert_eq!(config.orders().name(), "shop_orders");
        assert_eq!(config.products().name(), "products");
        assert_eq!(config.top_products_limit, 3);
        assert_eq!(config.status_policy, StatusPolicy::Unrestricted);
    }
}
