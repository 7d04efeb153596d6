//! Last-known-good copies of orders, products and carts.
//!
//! Each collection is an L1 [`moka`] cache of whole snapshots. When a [`KeyValueStorage`] is attached every write
//! also goes to it as JSON, and an L1 miss falls back to it, so snapshots survive a restart.

use crate::{error::Result, model::{CartItem, Order, Product}, traits::KeyValueStorage, types::Document};
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;
use tracing::warn;

/// Storage key of the cart kept for an unauthenticated session.
pub const GUEST_CART_KEY: &str = "guest";

const PRODUCTS_KEY: &str = "products";

// Entities are persisted together with their identities, which are not part of their stored fields.
#[derive(Serialize, Deserialize)]
struct StoredDocument {
    id:   String,
    data: Value,
}

trait Persisted: Sized + Send + Sync + 'static {
    fn to_document(&self) -> Result<Document>;
    fn from_document(doc: &Document) -> Result<Self>;
}

impl Persisted for Order {
    fn to_document(&self) -> Result<Document> {
        Ok(Document::new(self.id.clone(), self.to_data()?))
    }

    fn from_document(doc: &Document) -> Result<Self> {
        Order::from_document(doc)
    }
}

impl Persisted for Product {
    fn to_document(&self) -> Result<Document> {
        Ok(Document::new(self.id.clone(), self.to_data()?))
    }

    fn from_document(doc: &Document) -> Result<Self> {
        Product::from_document(doc)
    }
}

impl Persisted for CartItem {
    fn to_document(&self) -> Result<Document> {
        Ok(Document::new(self.id.clone(), serde_json::to_value(self)?))
    }

    fn from_document(doc: &Document) -> Result<Self> {
        Ok(serde_json::from_value(doc.data.clone())?)
    }
}

fn encode<T: Persisted>(items: &[T]) -> Result<String> {
    let stored = items
        .iter()
        .map(|item| {
            item.to_document().map(|doc| StoredDocument {
                id:   doc.id,
                data: doc.data,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_string(&stored)?)
}

fn decode<T: Persisted>(raw: &str) -> Result<Vec<T>> {
    let stored: Vec<StoredDocument> = serde_json::from_str(raw)?;
    stored
        .into_iter()
        .map(|s| T::from_document(&Document::new(s.id, s.data)))
        .collect()
}

type SnapshotCache<T> = Cache<String, Arc<Vec<T>>>;

/// Cloneable handle; clones share the same caches.
#[derive(Clone)]
pub struct LocalCache {
    orders:   SnapshotCache<Order>,
    products: SnapshotCache<Product>,
    carts:    SnapshotCache<CartItem>,
    storage:  Option<Arc<dyn KeyValueStorage>>,
}

impl LocalCache {
    /// A memory-only cache holding at most `capacity` snapshots per collection.
    pub fn new(capacity: u64) -> Self {
        Self {
            orders:   Self::build_cache("orders", capacity),
            products: Self::build_cache("products", capacity),
            carts:    Self::build_cache("carts", capacity),
            storage:  None,
        }
    }

    pub fn with_storage(capacity: u64, storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage: Some(storage),
            ..Self::new(capacity)
        }
    }

    fn build_cache<T>(name: &str, capacity: u64) -> SnapshotCache<T>
    where
        T: Send + Sync + 'static,
    {
        Cache::builder()
            .max_capacity(capacity)
            .name(name)
            .eviction_policy(EvictionPolicy::tiny_lfu())
            .build()
    }

    pub async fn orders(&self, scope_key: &str) -> Option<Arc<Vec<Order>>> {
        self.load(&self.orders, &format!("orders:{scope_key}")).await
    }

    pub async fn set_orders(&self, scope_key: &str, orders: Arc<Vec<Order>>) {
        self.store(&self.orders, &format!("orders:{scope_key}"), orders).await
    }

    pub async fn products(&self) -> Option<Arc<Vec<Product>>> {
        self.load(&self.products, PRODUCTS_KEY).await
    }

    pub async fn set_products(&self, products: Arc<Vec<Product>>) {
        self.store(&self.products, PRODUCTS_KEY, products).await
    }

    /// The cart of `owner`, a user id or [`GUEST_CART_KEY`].
    pub async fn cart(&self, owner: &str) -> Option<Arc<Vec<CartItem>>> {
        self.load(&self.carts, &format!("cart:{owner}")).await
    }

    pub async fn set_cart(&self, owner: &str, items: Arc<Vec<CartItem>>) {
        self.store(&self.carts, &format!("cart:{owner}"), items).await
    }

    pub async fn remove_cart(&self, owner: &str) {
        let key = format!("cart:{owner}");
        self.carts.invalidate(&key).await;
        if let Some(ref storage) = self.storage {
            if let Err(err) = storage.remove_item(&key).await {
                warn!(key, %err, "local storage removal failed");
            }
        }
    }

    async fn load<T>(&self, cache: &SnapshotCache<T>, key: &str) -> Option<Arc<Vec<T>>>
    where
        T: Persisted + Debug,
    {
        if let Some(snapshot) = cache.get(key).await {
            return Some(snapshot);
        }

        let storage = self.storage.as_ref()?;
        let raw = match storage.get_item(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, %err, "local storage read failed");
                return None;
            }
        };

        match decode::<T>(&raw) {
            Ok(items) => {
                debug!(key, count = items.len(), "restored snapshot from local storage");
                let snapshot = Arc::new(items);
                cache.insert(key.to_string(), Arc::clone(&snapshot)).await;
                Some(snapshot)
            }
            Err(err) => {
                warn!(key, %err, "discarding unreadable local snapshot");
                None
            }
        }
    }

    async fn store<T>(&self, cache: &SnapshotCache<T>, key: &str, snapshot: Arc<Vec<T>>)
    where
        T: Persisted + Debug,
    {
        if let Some(ref storage) = self.storage {
            match encode(snapshot.as_slice()) {
                Ok(raw) => {
                    if let Err(err) = storage.set_item(key, raw).await {
                        warn!(key, %err, "local storage write failed");
                    }
                }
                Err(err) => warn!(key, %err, "snapshot encoding failed"),
            }
        }
        cache.insert(key.to_string(), snapshot).await;
    }
}

impl Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("orders", &self.orders.entry_count())
            .field("products", &self.products.entry_count())
            .field("carts", &self.carts.entry_count())
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}
