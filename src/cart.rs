//! The cart of the active session.
//!
//! Lines are keyed by product id and selected variant. Every mutation is applied in memory first and then persisted:
//! to the local cache always, and for a signed-in user also to the user's document in the carts collection. A failed
//! remote write keeps the in-memory change and is reported as [`StoreError::RemoteWrite`] with a local fallback.
//!
//! A cart belongs to exactly one owner at a time. When the owner changes, the lines are replaced by the new owner's
//! cart, never merged with the previous one.

use crate::{
    context::StoreContext,
    error::{Result, StoreError},
    live::LiveSnapshot,
    local_cache::GUEST_CART_KEY,
    model::{money, timestamp, CartItem, Product, User},
    traits::DocumentStore,
    types::{Fields, SubscriptionEvent, SyncState, WatchTarget},
};
use garde::Validate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use serde_json::Value;
use std::sync::{atomic::{AtomicBool, Ordering}, Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, instrument, warn};

struct CartInner<S>
where
    S: DocumentStore,
{
    ctx:       StoreContext<S>,
    // User id of the owner; `None` is the guest session.
    owner:     Mutex<Option<String>>,
    bound:     AtomicBool,
    following: AtomicBool,
    lines:     LiveSnapshot<CartItem>,
    auth_task: Mutex<Option<JoinHandle<()>>>,
    switching: tokio::sync::Mutex<()>,
}

pub struct Cart<S>
where
    S: DocumentStore,
{
    inner: Arc<CartInner<S>>,
}

impl<S> Clone for Cart<S>
where
    S: DocumentStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Cart<S>
where
    S: DocumentStore,
{
    pub fn new(ctx: StoreContext<S>) -> Self {
        Self {
            inner: Arc::new(CartInner {
                ctx,
                owner: Mutex::new(None),
                bound: AtomicBool::new(false),
                following: AtomicBool::new(false),
                lines: LiveSnapshot::new(),
                auth_task: Mutex::new(None),
                switching: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Bind to the current user and keep following sign-ins, sign-outs and remote changes of the bound user's cart.
    #[instrument(level = "debug", skip(self))]
    pub async fn start(&self) -> Result<()> {
        self.inner.following.store(true, Ordering::SeqCst);

        let mut changes = self.inner.ctx.auth.subscribe();
        let current = changes.borrow_and_update().clone();
        let bound = self.switch_user(current.as_ref()).await;

        let weak: Weak<CartInner<S>> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let user = changes.borrow_and_update().clone();
                let Some(inner) = weak.upgrade()
                else {
                    break;
                };
                let cart = Cart { inner };
                // Failures are already reported by switch_user.
                if let Err(err) = cart.switch_user(user.as_ref()).await {
                    debug!(%err, "cart rebinding incomplete");
                }
            }
        });
        if let Some(previous) = self.inner.auth_task.lock().replace(handle) {
            previous.abort();
        }

        bound
    }

    pub async fn close(&self) {
        self.inner.following.store(false, Ordering::SeqCst);
        let auth_task = self.inner.auth_task.lock().take();
        if let Some(handle) = auth_task {
            handle.abort();
            let _ = handle.await;
        }
        self.inner.lines.stop().await;
    }

    /// Replace the lines with the cart of `user`, or with the guest cart for `None`. Binding to the current owner
    /// again is a no-op.
    #[instrument(level = "debug", skip(self, user), fields(user = user.map(|u| u.id.as_str())))]
    pub async fn switch_user(&self, user: Option<&User>) -> Result<()> {
        let inner = &self.inner;
        let _switching = inner.switching.lock().await;
        let next = user.map(|u| u.id.clone());
        let following = inner.following.load(Ordering::SeqCst);

        {
            let mut owner = inner.owner.lock();
            let settled = inner.bound.load(Ordering::SeqCst)
                && (next.is_none() || !following || inner.lines.is_listening());
            if *owner == next && settled {
                return Ok(());
            }
            *owner = next.clone();
        }
        inner.bound.store(true, Ordering::SeqCst);

        inner.lines.stop().await;
        inner.lines.replace(Arc::new(Vec::new()));
        inner.lines.set_state(SyncState::Idle);

        match next {
            None => {
                if let Some(guest) = inner.ctx.cache.cart(GUEST_CART_KEY).await {
                    debug!(count = guest.len(), "restored guest cart");
                    inner.lines.replace(guest);
                }
                Ok(())
            }
            Some(user_id) => {
                let loaded = inner.load(&user_id).await;
                if following {
                    inner.follow(&user_id).await?;
                }
                loaded
            }
        }
    }

    /// User id of the current owner; `None` for the guest session.
    pub fn owner(&self) -> Option<String> {
        self.inner.owner.lock().clone()
    }

    pub fn lines(&self) -> Arc<Vec<CartItem>> {
        self.inner.lines.current()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lines.current().is_empty()
    }

    /// Σ price × quantity over all lines.
    pub fn total(&self) -> Decimal {
        money::saturating_sum(self.inner.lines.current().iter().map(CartItem::line_total))
    }

    /// Number of units in the cart.
    pub fn item_count(&self) -> u32 {
        self.inner
            .lines
            .current()
            .iter()
            .fold(0u32, |acc, l| acc.saturating_add(l.quantity))
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Vec<CartItem>>> {
        self.inner.lines.watch()
    }

    pub fn subscribe(&self) -> WatchStream<Arc<Vec<CartItem>>> {
        self.inner.lines.stream()
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.lines.state()
    }

    /// Add a line, or add to the quantity of the line with the same product and variant. Quantities below 1 count
    /// as 1.
    #[instrument(level = "debug", skip(self, item), fields(product = %item.id))]
    pub async fn add_item(&self, item: CartItem) -> Result<()> {
        item.validate()?;
        let mut item = item;
        item.quantity = item.quantity.max(1);

        self.mutate(move |lines| {
            match lines
                .iter()
                .position(|l| l.is_line(&item.id, item.selected_variant.as_deref()))
            {
                Some(pos) => lines[pos].quantity = lines[pos].quantity.saturating_add(item.quantity),
                None => lines.push(item),
            }
            true
        })
        .await
    }

    /// Add `quantity` units of a catalog product. Products out of stock are refused.
    pub async fn add_product(&self, product: &Product, quantity: u32, variant: Option<&str>) -> Result<()> {
        if !product.is_sellable() {
            return Err(StoreError::Validation(format!("'{}' is out of stock", product.name)));
        }
        let mut item = CartItem::from_product(product, quantity);
        item.selected_variant = variant.map(str::to_string);
        self.add_item(item).await
    }

    /// Remove a line. Removing a line that is not there is not an error.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove_item(&self, id: &str, variant: Option<&str>) -> Result<()> {
        self.mutate(|lines| {
            let before = lines.len();
            lines.retain(|l| !l.is_line(id, variant));
            lines.len() != before
        })
        .await
    }

    /// Set the quantity of a line. Quantities below 1 are raised to 1; use [`remove_item`](Cart::remove_item) to
    /// drop a line.
    #[instrument(level = "debug", skip(self))]
    pub async fn update_item_quantity(&self, id: &str, quantity: u32, variant: Option<&str>) -> Result<()> {
        let quantity = quantity.max(1);
        self.mutate(|lines| match lines.iter_mut().find(|l| l.is_line(id, variant)) {
            Some(line) if line.quantity != quantity => {
                line.quantity = quantity;
                true
            }
            _ => false,
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn clear(&self) -> Result<()> {
        self.mutate(|lines| {
            lines.clear();
            true
        })
        .await
    }

    /// Remove the units of `ordered` from the cart of `owner`. Lines added or raised since are kept with the
    /// remaining units. Nothing happens if the cart changed hands in the meantime.
    pub(crate) async fn remove_ordered(&self, owner: Option<&str>, ordered: &[CartItem]) -> Result<()> {
        let _switching = self.inner.switching.lock().await;
        if self.inner.owner.lock().as_deref() != owner {
            debug!("cart changed owner; ordered lines left alone");
            return Ok(());
        }

        self.apply_locked(|lines| {
            let before = lines.clone();
            for taken in ordered {
                let variant = taken.selected_variant.as_deref();
                if let Some(pos) = lines.iter().position(|l| l.is_line(&taken.id, variant)) {
                    if lines[pos].quantity > taken.quantity {
                        lines[pos].quantity -= taken.quantity;
                    }
                    else {
                        lines.remove(pos);
                    }
                }
            }
            *lines != before
        })
        .await
    }

    // Mutations wait for a pending owner switch, so they never land in the cart of the next owner.
    async fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<CartItem>) -> bool,
    {
        let _switching = self.inner.switching.lock().await;
        self.apply_locked(f).await
    }

    async fn apply_locked<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<CartItem>) -> bool,
    {
        let owner = self.inner.owner.lock().clone();
        match self.inner.lines.modify(f) {
            Some(lines) => self.inner.persist(owner.as_deref(), lines).await,
            None => Ok(()),
        }
    }
}

impl<S> CartInner<S>
where
    S: DocumentStore,
{
    async fn persist(&self, owner: Option<&str>, lines: Arc<Vec<CartItem>>) -> Result<()> {
        let Some(user_id) = owner
        else {
            self.ctx.cache.set_cart(GUEST_CART_KEY, lines).await;
            return Ok(());
        };

        self.ctx.cache.set_cart(user_id, Arc::clone(&lines)).await;

        let mut data = Fields::new();
        data.insert("items".to_string(), serde_json::to_value(lines.as_slice())?);
        data.insert("updatedAt".to_string(), json!(timestamp::format(&timestamp::now())));

        let outcome = self
            .ctx
            .remote
            .set_document(&self.ctx.config.carts(), user_id, Value::Object(data), false)
            .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = StoreError::remote_write_with_fallback(err, None);
                warn!(%err, user = user_id, "cart kept locally");
                self.ctx.report_error(&err).await;
                Err(err)
            }
        }
    }

    async fn load(&self, user_id: &str) -> Result<()> {
        if let Some(cached) = self.ctx.cache.cart(user_id).await {
            self.lines.replace(cached);
        }

        match self.ctx.remote.get_one(&self.ctx.config.carts(), user_id).await {
            Ok(data) => {
                self.apply(user_id, data.as_ref()).await;
                Ok(())
            }
            Err(err) => {
                let err = StoreError::RemoteRead(err);
                warn!(%err, user = user_id, "cannot load cart; showing the cached one");
                self.ctx.report_error(&err).await;
                Err(err)
            }
        }
    }

    async fn follow(self: &Arc<Self>, user_id: &str) -> Result<()> {
        let target = WatchTarget::document(self.ctx.config.carts(), user_id);
        let mut subscription = match self.ctx.remote.subscribe(target).await {
            Ok(subscription) => subscription,
            Err(err) => {
                let err = StoreError::RemoteSubscription(err);
                error!(%err, user = user_id, "cannot follow cart");
                self.lines.set_state(SyncState::Stale(err.clone()));
                self.ctx.report_error(&err).await;
                return Err(err);
            }
        };

        let weak = Arc::downgrade(self);
        let user_id = user_id.to_string();
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(inner) = weak.upgrade()
                else {
                    break;
                };
                match event {
                    SubscriptionEvent::Snapshot(docs) => {
                        let data = docs.into_iter().next().map(|d| d.data);
                        inner.apply(&user_id, data.as_ref()).await;
                        inner.lines.set_state(SyncState::Live);
                    }
                    SubscriptionEvent::Error(err) => {
                        let err = StoreError::RemoteSubscription(err);
                        error!(%err, user = user_id, "cart subscription failed");
                        inner.lines.set_state(SyncState::Stale(err.clone()));
                        inner.ctx.report_error(&err).await;
                        break;
                    }
                }
            }
        });
        self.lines.set_listener(handle);

        Ok(())
    }

    // Replace the lines with a stored cart document; a missing document is an empty cart.
    async fn apply(&self, user_id: &str, data: Option<&Value>) {
        let mut lines = Vec::new();
        let raw_items = data.and_then(|d| d.get("items")).and_then(Value::as_array);
        for raw in raw_items.into_iter().flatten() {
            match serde_json::from_value::<CartItem>(raw.clone()) {
                Ok(mut line) => {
                    line.quantity = line.quantity.max(1);
                    lines.push(line);
                }
                Err(err) => {
                    self.ctx
                        .report_warning(&format!("skipping cart line of '{user_id}': {err}"))
                        .await
                }
            }
        }

        debug!(user = user_id, count = lines.len(), "cart loaded");
        let lines = Arc::new(lines);
        self.lines.replace(Arc::clone(&lines));
        self.ctx.cache.set_cart(user_id, lines).await;
    }
}

impl<S> Drop for CartInner<S>
where
    S: DocumentStore,
{
    fn drop(&mut self) {
        if let Some(handle) = self.auth_task.get_mut().take() {
            handle.abort();
        }
    }
}
