//! Product catalog: CRUD over product documents.
//!
//! Reads are unscoped. Mutations need a signed-in seller, who may only change their own products. When the remote
//! write fails, the mutation is still applied to the local view and the failure is reported with
//! [`Fallback::AppliedLocally`](crate::error::Fallback::AppliedLocally).

use crate::{
    context::StoreContext,
    error::{EntityKind, Result, StoreError},
    live::LiveSnapshot,
    model::{timestamp, Category, NewProduct, Product, ProductPatch, User},
    traits::DocumentStore,
    types::{Document, SubscriptionEvent, SyncState, WatchTarget},
};
use std::sync::Arc;
use std::sync::Weak;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

struct CatalogInner<S>
where
    S: DocumentStore,
{
    ctx:      StoreContext<S>,
    snapshot: LiveSnapshot<Product>,
}

pub struct ProductCatalog<S>
where
    S: DocumentStore,
{
    inner: Arc<CatalogInner<S>>,
}

impl<S> Clone for ProductCatalog<S>
where
    S: DocumentStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> ProductCatalog<S>
where
    S: DocumentStore,
{
    pub fn new(ctx: StoreContext<S>) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                ctx,
                snapshot: LiveSnapshot::new(),
            }),
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.snapshot.stop().await;

        if matches!(inner.snapshot.state(), SyncState::Idle) {
            if let Some(cached) = inner.ctx.cache.products().await {
                debug!(count = cached.len(), "seeded products from local cache");
                inner.snapshot.replace(cached);
            }
        }

        let query = inner.ctx.config.products().query();
        let mut subscription = match inner.ctx.remote.subscribe(WatchTarget::Query(query)).await {
            Ok(subscription) => subscription,
            Err(err) => {
                let err = StoreError::RemoteSubscription(err);
                error!(%err, "cannot subscribe to products");
                inner.snapshot.set_state(SyncState::Stale(err.clone()));
                inner.ctx.report_error(&err).await;
                return Err(err);
            }
        };

        let weak: Weak<CatalogInner<S>> = Arc::downgrade(inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(inner) = weak.upgrade()
                else {
                    break;
                };
                match event {
                    SubscriptionEvent::Snapshot(docs) => {
                        inner.reconcile(docs).await;
                        inner.snapshot.set_state(SyncState::Live);
                    }
                    SubscriptionEvent::Error(err) => {
                        let err = StoreError::RemoteSubscription(err);
                        error!(%err, "product subscription failed; catalog is stale");
                        inner.snapshot.set_state(SyncState::Stale(err.clone()));
                        inner.ctx.report_error(&err).await;
                        break;
                    }
                }
            }
        });
        inner.snapshot.set_listener(handle);

        Ok(())
    }

    pub async fn close(&self) {
        self.inner.snapshot.stop().await;
        if self.inner.snapshot.state().is_live() {
            self.inner.snapshot.set_state(SyncState::Idle);
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn refresh(&self) -> Result<()> {
        let query = self.inner.ctx.config.products().query();
        let docs = self
            .inner
            .ctx
            .remote
            .get_all(&query)
            .await
            .map_err(StoreError::RemoteRead)?;
        self.inner.reconcile(docs).await;
        Ok(())
    }

    pub fn get_product_by_id(&self, id: &str) -> Option<Product> {
        self.inner.snapshot.current().iter().find(|p| p.id == id).cloned()
    }

    pub fn products(&self) -> Arc<Vec<Product>> {
        self.inner.snapshot.current()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Vec<Product>>> {
        self.inner.snapshot.watch()
    }

    pub fn subscribe(&self) -> WatchStream<Arc<Vec<Product>>> {
        self.inner.snapshot.stream()
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.snapshot.state()
    }

    /// Products whose name or description contains `text`, ignoring case. Blank text matches everything.
    pub fn search(&self, text: &str) -> Vec<Product> {
        let needle = text.trim().to_lowercase();
        self.inner
            .snapshot
            .current()
            .iter()
            .filter(|p| needle.is_empty() || p.matches_search(&needle))
            .cloned()
            .collect()
    }

    /// Products of one category, or all of them for `None`.
    pub fn filter_by_category(&self, category: Option<&Category>) -> Vec<Product> {
        self.inner
            .snapshot
            .current()
            .iter()
            .filter(|p| category.is_none_or(|c| &p.category == c))
            .cloned()
            .collect()
    }

    pub fn seller_products(&self, seller_id: &str) -> Vec<Product> {
        self.inner
            .snapshot
            .current()
            .iter()
            .filter(|p| p.seller_id == seller_id)
            .cloned()
            .collect()
    }

    /// Products with `threshold` or fewer units left.
    pub fn low_stock(&self, threshold: u32) -> Vec<Product> {
        self.inner
            .snapshot
            .current()
            .iter()
            .filter(|p| p.stock <= threshold)
            .cloned()
            .collect()
    }

    /// Create a product owned by the signed-in seller and return its identity. If the remote store refuses it, the
    /// product is kept locally under a generated `local_` identity reported in the error.
    #[instrument(level = "debug", skip(self, new_product))]
    pub async fn add_product(&self, new_product: NewProduct) -> Result<String> {
        let ctx = &self.inner.ctx;
        let seller = ctx.auth.require_seller()?;
        let mut product = new_product.into_product(&seller.id, timestamp::now())?;
        let data = product.to_data()?;

        match ctx.remote.create_document(&ctx.config.products(), data).await {
            Ok(id) => {
                debug!(product = %id, "product created");
                product.id = id.clone();
                self.inner.upsert(product).await;
                Ok(id)
            }
            Err(err) => {
                let local_id = format!("local_{}", Uuid::new_v4().simple());
                warn!(%err, %local_id, "product creation failed; keeping it locally");
                product.id = local_id.clone();
                self.inner.upsert(product).await;
                let err = StoreError::remote_write_with_fallback(err, Some(local_id));
                ctx.report_error(&err).await;
                Err(err)
            }
        }
    }

    #[instrument(level = "debug", skip(self, patch))]
    pub async fn update_product(&self, id: &str, patch: ProductPatch) -> Result<()> {
        let ctx = &self.inner.ctx;
        let seller = ctx.auth.require_seller()?;
        patch.check()?;
        let mut product = self.owned_product(&seller, id)?;
        if patch.is_empty() {
            return Ok(());
        }

        product.apply_patch(&patch);
        let outcome = ctx
            .remote
            .update_fields(&ctx.config.products(), id, patch.to_fields())
            .await;
        self.inner.upsert(product).await;

        outcome.map_err(|err| {
            warn!(%err, product = id, "product update failed; applied locally");
            StoreError::remote_write_with_fallback(err, None)
        })
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn delete_product(&self, id: &str) -> Result<()> {
        let ctx = &self.inner.ctx;
        let seller = ctx.auth.require_seller()?;
        self.owned_product(&seller, id)?;

        let outcome = ctx.remote.delete_document(&ctx.config.products(), id).await;
        self.inner.remove(id).await;

        outcome.map_err(|err| {
            warn!(%err, product = id, "product deletion failed; removed locally");
            StoreError::remote_write_with_fallback(err, None)
        })
    }

    fn owned_product(&self, seller: &User, id: &str) -> Result<Product> {
        let product = self
            .get_product_by_id(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Product, id))?;
        if !product.seller_id.is_empty() && product.seller_id != seller.id {
            return Err(StoreError::PermissionDenied(format!(
                "product '{id}' belongs to another seller"
            )));
        }
        Ok(product)
    }
}

impl<S> CatalogInner<S>
where
    S: DocumentStore,
{
    async fn reconcile(&self, docs: Vec<Document>) {
        let mut products = Vec::with_capacity(docs.len());
        for doc in &docs {
            match Product::from_document(doc) {
                Ok(product) => products.push(product),
                Err(err) => self.ctx.report_warning(&format!("skipping product: {err}")).await,
            }
        }

        debug!(count = products.len(), "products reconciled");
        let products = Arc::new(products);
        self.snapshot.replace(Arc::clone(&products));
        self.ctx.cache.set_products(Arc::clone(&products)).await;
        self.ctx
            .report_snapshot(&self.ctx.config.products_collection, products.len())
            .await;
    }

    async fn upsert(&self, product: Product) {
        let updated = self.snapshot.modify(|products| {
            match products.iter_mut().find(|p| p.id == product.id) {
                Some(existing) => *existing = product,
                None => products.push(product),
            }
            true
        });
        if let Some(products) = updated {
            self.ctx.cache.set_products(products).await;
        }
    }

    async fn remove(&self, id: &str) {
        let updated = self.snapshot.modify(|products| {
            let before = products.len();
            products.retain(|p| p.id != id);
            products.len() != before
        });
        if let Some(products) = updated {
            self.ctx.cache.set_products(products).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{auth::AuthSession, config::StoreConfig, error::RemoteError, test::{fixtures, MemoryDocumentStore}};
    use rust_decimal_macros::dec;
    use super::*;

    async fn catalog(auth: AuthSession) -> (Arc<MemoryDocumentStore>, ProductCatalog<MemoryDocumentStore>) {
        let remote = Arc::new(MemoryDocumentStore::new());
        fixtures::seed_products(&remote).await;
        let config = StoreConfig::builder().build().unwrap();
        let catalog = ProductCatalog::new(StoreContext::new(remote.clone(), auth, config));
        catalog.refresh().await.unwrap();
        (remote, catalog)
    }

    #[tokio::test]
    async fn test_search_and_filter() {
        let (_, catalog) = catalog(AuthSession::new()).await;

        let found: Vec<_> = catalog.search("FARM").into_iter().map(|p| p.id).collect();
        assert_eq!(found, vec!["prod_2", "prod_5"]);
        assert_eq!(catalog.search("  ").len(), 5);
        assert_eq!(catalog.search("sourdough")[0].id, "prod_3");

        assert_eq!(catalog.filter_by_category(Some(&Category::Dairy))[0].id, "prod_2");
        assert_eq!(catalog.filter_by_category(None).len(), 5);
        assert!(catalog.filter_by_category(Some(&Category::Meat)).is_empty());
        assert_eq!(catalog.low_stock(20).len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_need_a_seller() {
        let (_, catalog) = catalog(AuthSession::new()).await;
        let err = catalog.add_product(fixtures::new_product()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_customers_cannot_change_the_catalog() {
        let (remote, catalog) = catalog(AuthSession::signed_in(fixtures::customer())).await;

        let err = catalog.add_product(fixtures::new_product()).await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
        let patch = ProductPatch {
            stock: Some(0),
            ..Default::default()
        };
        let err = catalog.update_product("prod_1", patch).await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
        let err = catalog.delete_product("prod_1").await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));

        assert_eq!(remote.document_count("products"), 5);
        assert_eq!(catalog.products().len(), 5);
        assert_eq!(catalog.get_product_by_id("prod_1").unwrap().stock, 50);
    }

    #[tokio::test]
    async fn test_other_sellers_products_are_off_limits() {
        let (remote, catalog) = catalog(AuthSession::signed_in(fixtures::other_seller())).await;
        let patch = ProductPatch {
            price: Some(dec!(1.00)),
            ..Default::default()
        };
        let err = catalog.update_product("prod_1", patch).await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
        let err = catalog.delete_product("prod_1").await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
        assert_eq!(remote.document_count("products"), 5);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (remote, catalog) = catalog(AuthSession::signed_in(fixtures::seller())).await;
        let patch = ProductPatch {
            stock: Some(0),
            ..Default::default()
        };
        catalog.update_product("prod_1", patch).await.unwrap();
        assert!(!catalog.get_product_by_id("prod_1").unwrap().is_sellable());
        assert_eq!(remote.document("products", "prod_1").unwrap()["stock"], serde_json::json!(0));

        catalog.delete_product("prod_4").await.unwrap();
        assert!(catalog.get_product_by_id("prod_4").is_none());
        assert!(remote.document("products", "prod_4").is_none());

        let err = catalog.delete_product("prod_4").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: EntityKind::Product, .. }));
    }

    #[tokio::test]
    async fn test_failed_update_applies_locally() {
        let (remote, catalog) = catalog(AuthSession::signed_in(fixtures::seller())).await;
        remote.fail_writes(Some(RemoteError::unavailable("offline")));

        let patch = ProductPatch {
            name: Some("Gala Apples".into()),
            ..Default::default()
        };
        let err = catalog.update_product("prod_1", patch).await.unwrap_err();
        assert!(err.fallback_applied());
        assert_eq!(catalog.get_product_by_id("prod_1").unwrap().name, "Gala Apples");
        assert_eq!(remote.document("products", "prod_1").unwrap()["name"], "Organic Apples");

        let err = catalog.delete_product("prod_2").await.unwrap_err();
        assert!(err.fallback_applied());
        assert!(catalog.get_product_by_id("prod_2").is_none());
    }
}
