//! The order store: a live view of the orders visible to the current actor.
//!
//! The view is seeded from the local cache, then kept in sync by a subscription to the remote query. Every snapshot
//! the subscription delivers replaces the view wholesale and wins over anything applied locally before it. Order
//! mutations never fall back to local-only state: an order that failed to reach the remote store does not exist.
//!
//! A started customer view belongs to the signed-in customer and follows the session: a sign-out empties the view and
//! a sign-in rebinds it to the new customer's orders.

use crate::{
    config::StoreConfig,
    context::StoreContext,
    error::{EntityKind, Result, StoreError},
    live::LiveSnapshot,
    model::{timestamp, NewOrder, Order, OrderStatus, User},
    traits::DocumentStore,
    types::{Direction, Document, Query, SubscriptionEvent, SyncState, WatchTarget},
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::Weak;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, instrument, warn};

/// Which orders the store follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderScope {
    /// Every order; the seller view.
    All,
    /// Orders placed by one customer.
    Customer(String),
}

impl OrderScope {
    pub fn cache_key(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Customer(id) => format!("customer:{id}"),
        }
    }

    pub fn includes(&self, order: &Order) -> bool {
        match self {
            Self::All => true,
            Self::Customer(id) => &order.customer_id == id,
        }
    }

    pub fn customer_id(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Customer(id) => Some(id),
        }
    }

    fn query(&self, config: &StoreConfig) -> Query {
        let query = config.orders().query();
        let query = match self {
            Self::All => query,
            Self::Customer(id) => query.where_eq("customerId", json!(id)),
        };
        query.order_by("createdAt", Direction::Descending)
    }
}

struct OrderStoreInner<S>
where
    S: DocumentStore,
{
    ctx:       StoreContext<S>,
    scope:     Mutex<OrderScope>,
    snapshot:  LiveSnapshot<Order>,
    auth_task: Mutex<Option<JoinHandle<()>>>,
    rebinding: tokio::sync::Mutex<()>,
}

/// Cloneable handle; clones share the same view and listener.
pub struct OrderStore<S>
where
    S: DocumentStore,
{
    inner: Arc<OrderStoreInner<S>>,
}

impl<S> Clone for OrderStore<S>
where
    S: DocumentStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> OrderStore<S>
where
    S: DocumentStore,
{
    pub fn new(ctx: StoreContext<S>, scope: OrderScope) -> Self {
        Self {
            inner: Arc::new(OrderStoreInner {
                ctx,
                scope: Mutex::new(scope),
                snapshot: LiveSnapshot::new(),
                auth_task: Mutex::new(None),
                rebinding: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn scope(&self) -> OrderScope {
        self.inner.scope.lock().clone()
    }

    /// The remote query backing the view: the scope's orders, newest first.
    pub fn query(&self) -> Query {
        self.scope().query(&self.inner.ctx.config)
    }

    /// Seed the view from the local cache and subscribe to the remote query. Calling it again replaces the current
    /// subscription, which is how a stale view is revived.
    ///
    /// A customer view binds to the signed-in customer, if any, and from then on follows the session.
    #[instrument(level = "debug", skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.scope().customer_id().is_none() {
            return self.inner.rebind(None, true).await;
        }

        let mut changes = self.inner.ctx.auth.subscribe();
        let current = changes.borrow_and_update().clone();
        let bound = self.inner.rebind(current.as_ref(), true).await;

        let weak: Weak<OrderStoreInner<S>> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let user = changes.borrow_and_update().clone();
                let Some(inner) = weak.upgrade()
                else {
                    break;
                };
                if let Some(user) = user {
                    // Failures are already reported by the subscription.
                    if let Err(err) = inner.rebind(Some(&user), false).await {
                        debug!(%err, "order view rebinding incomplete");
                    }
                }
                else {
                    inner.unbind().await;
                }
            }
        });
        if let Some(previous) = self.inner.auth_task.lock().replace(handle) {
            previous.abort();
        }

        bound
    }

    /// Stop following remote changes. The view keeps its last snapshot.
    pub async fn close(&self) {
        let auth_task = self.inner.auth_task.lock().take();
        if let Some(handle) = auth_task {
            handle.abort();
            let _ = handle.await;
        }
        self.inner.snapshot.stop().await;
        if self.inner.snapshot.state().is_live() {
            self.inner.snapshot.set_state(SyncState::Idle);
        }
    }

    /// Fetch the scope's orders once and replace the view with them.
    #[instrument(level = "debug", skip(self))]
    pub async fn refresh(&self) -> Result<()> {
        let scope = self.scope();
        let docs = self
            .inner
            .ctx
            .remote
            .get_all(&scope.query(&self.inner.ctx.config))
            .await
            .map_err(StoreError::RemoteRead)?;
        self.inner.reconcile(&scope, docs).await;
        Ok(())
    }

    /// Look an order up in the current view. Absence is not an error.
    pub fn get_order_by_id(&self, id: &str) -> Option<Order> {
        self.inner.snapshot.current().iter().find(|o| o.id == id).cloned()
    }

    pub fn orders(&self) -> Arc<Vec<Order>> {
        self.inner.snapshot.current()
    }

    /// Orders with the given status, or all of them for `None`.
    pub fn orders_with_status(&self, status: Option<OrderStatus>) -> Vec<Order> {
        self.inner
            .snapshot
            .current()
            .iter()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Vec<Order>>> {
        self.inner.snapshot.watch()
    }

    pub fn subscribe(&self) -> WatchStream<Arc<Vec<Order>>> {
        self.inner.snapshot.stream()
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.snapshot.state()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.snapshot.is_listening()
    }

    /// Create an order for the signed-in customer and return its identity. Nothing changes locally unless the remote
    /// store accepted the order.
    #[instrument(level = "debug", skip(self, new_order))]
    pub async fn create_order(&self, new_order: NewOrder) -> Result<String> {
        let ctx = &self.inner.ctx;
        let user = ctx.auth.require()?;
        let mut order = new_order.into_order(&user.id, timestamp::now())?;
        let data = order.to_data()?;

        let id = ctx
            .remote
            .create_document(&ctx.config.orders(), data)
            .await
            .map_err(|err| {
                warn!(%err, customer = %user.id, "order creation failed");
                StoreError::remote_write(err)
            })?;

        debug!(order = %id, total = %order.total_amount, "order created");
        order.id = id.clone();
        self.inner.upsert(order).await;
        Ok(id)
    }

    /// Set a new status. `updatedAt` always moves forward, also when the status does not change.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_order_status(&self, id: &str, status: OrderStatus) -> Result<()> {
        let ctx = &self.inner.ctx;
        let Some(mut order) = self.get_order_by_id(id)
        else {
            return Err(StoreError::not_found(EntityKind::Order, id));
        };

        ctx.config.status_policy.check(order.status, status)?;

        let updated_at = timestamp::after(order.updated_at);
        ctx.remote
            .update_fields(&ctx.config.orders(), id, Order::status_fields(status, &updated_at))
            .await
            .map_err(|err| {
                warn!(%err, order = id, %status, "status update failed");
                StoreError::remote_write(err)
            })?;

        debug!(order = id, from = %order.status, to = %status, "status updated");
        order.status = status;
        order.updated_at = updated_at;
        self.inner.upsert(order).await;
        Ok(())
    }
}

impl<S> OrderStoreInner<S>
where
    S: DocumentStore,
{
    // Bind a customer view to `user` and subscribe. With `force` the subscription is renewed even if the binding
    // does not change; otherwise a view already following `user` is left alone. Views of all orders ignore `user`.
    async fn rebind(self: &Arc<Self>, user: Option<&User>, force: bool) -> Result<()> {
        let _rebinding = self.rebinding.lock().await;

        let current = self.scope.lock().clone();
        let next = match (current.customer_id(), user) {
            (Some(bound), Some(user)) if bound != user.id => OrderScope::Customer(user.id.clone()),
            _ => current.clone(),
        };
        if next == current && !force && self.snapshot.is_listening() {
            return Ok(());
        }

        self.snapshot.stop().await;
        if next != current {
            debug!(customer = next.customer_id(), "order view rebound");
            *self.scope.lock() = next;
            self.snapshot.replace(Arc::new(Vec::new()));
            self.snapshot.set_state(SyncState::Idle);
        }
        self.listen().await
    }

    // Nobody is signed in: nothing of the previous customer stays visible.
    async fn unbind(&self) {
        let _rebinding = self.rebinding.lock().await;
        self.snapshot.stop().await;
        self.snapshot.replace(Arc::new(Vec::new()));
        self.snapshot.set_state(SyncState::Idle);
        debug!("order view unbound");
    }

    async fn listen(self: &Arc<Self>) -> Result<()> {
        let scope = self.scope.lock().clone();

        if matches!(self.snapshot.state(), SyncState::Idle) {
            if let Some(cached) = self.ctx.cache.orders(&scope.cache_key()).await {
                debug!(count = cached.len(), "seeded orders from local cache");
                self.snapshot.replace(cached);
            }
        }

        let query = scope.query(&self.ctx.config);
        let mut subscription = match self.ctx.remote.subscribe(WatchTarget::Query(query)).await {
            Ok(subscription) => subscription,
            Err(err) => {
                let err = StoreError::RemoteSubscription(err);
                error!(%err, "cannot subscribe to orders");
                self.snapshot.set_state(SyncState::Stale(err.clone()));
                self.ctx.report_error(&err).await;
                return Err(err);
            }
        };

        let weak: Weak<OrderStoreInner<S>> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(inner) = weak.upgrade()
                else {
                    break;
                };
                match event {
                    SubscriptionEvent::Snapshot(docs) => {
                        inner.reconcile(&scope, docs).await;
                        inner.snapshot.set_state(SyncState::Live);
                    }
                    SubscriptionEvent::Error(err) => {
                        let err = StoreError::RemoteSubscription(err);
                        error!(%err, "order subscription failed; view is stale");
                        inner.snapshot.set_state(SyncState::Stale(err.clone()));
                        inner.ctx.report_error(&err).await;
                        break;
                    }
                }
            }
        });
        self.snapshot.set_listener(handle);

        Ok(())
    }

    async fn reconcile(&self, scope: &OrderScope, docs: Vec<Document>) {
        let mut orders = Vec::with_capacity(docs.len());
        for doc in &docs {
            match Order::from_document(doc) {
                Ok(order) => orders.push(order),
                Err(err) => self.ctx.report_warning(&format!("skipping order: {err}")).await,
            }
        }

        debug!(count = orders.len(), "orders reconciled");
        let orders = Arc::new(orders);
        self.snapshot.replace(Arc::clone(&orders));
        self.ctx.cache.set_orders(&scope.cache_key(), Arc::clone(&orders)).await;
        self.ctx
            .report_snapshot(&self.ctx.config.orders_collection, orders.len())
            .await;
    }

    // Confirmed writes are reflected right away; the next subscription snapshot supersedes them.
    async fn upsert(&self, order: Order) {
        let scope = self.scope.lock().clone();
        if !scope.includes(&order) {
            return;
        }

        let updated = self.snapshot.modify(|orders| {
            match orders.iter_mut().find(|o| o.id == order.id) {
                Some(existing) => *existing = order,
                None => {
                    orders.push(order);
                    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                }
            }
            true
        });

        if let Some(orders) = updated {
            self.ctx.cache.set_orders(&scope.cache_key(), orders).await;
        }
    }
}

impl<S> Drop for OrderStoreInner<S>
where
    S: DocumentStore,
{
    fn drop(&mut self) {
        if let Some(handle) = self.auth_task.get_mut().take() {
            handle.abort();
        }
    }
}
