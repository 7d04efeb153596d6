use crate::{
    cart::Cart,
    catalog::ProductCatalog,
    context::StoreContext,
    error::{EntityKind, Result, StoreError},
    model::{NewOrder, NewOrderItem, ProfilePatch, User},
    orders::{OrderScope, OrderStore},
    stats::{Period, StatisticsAggregator},
    traits::DocumentStore,
    types::Document,
};
use garde::Validate;
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Contact and delivery data entered at checkout. Empty name and email, and a missing phone, are taken from the
/// signed-in user's profile.
#[derive(Debug, Clone, Default)]
pub struct CheckoutDetails {
    pub customer_name:    String,
    pub customer_email:   String,
    pub customer_phone:   Option<String>,
    pub shipping_address: String,
}

impl CheckoutDetails {
    pub fn shipping_to<S: Into<String>>(address: S) -> Self {
        Self {
            shipping_address: address.into(),
            ..Default::default()
        }
    }
}

/// The stores of one application session, wired over a single context.
pub struct Storefront<S>
where
    S: DocumentStore,
{
    ctx:     StoreContext<S>,
    catalog: ProductCatalog<S>,
    orders:  OrderStore<S>,
    cart:    Cart<S>,
    stats:   StatisticsAggregator,
}

impl<S> Storefront<S>
where
    S: DocumentStore,
{
    pub fn new(ctx: StoreContext<S>, scope: OrderScope) -> Self {
        let catalog = ProductCatalog::new(ctx.clone());
        let orders = OrderStore::new(ctx.clone(), scope);
        let cart = Cart::new(ctx.clone());
        let stats = StatisticsAggregator::new(orders.watch(), &ctx.config, Period::default());
        Self {
            ctx,
            catalog,
            orders,
            cart,
            stats,
        }
    }

    pub fn catalog(&self) -> &ProductCatalog<S> {
        &self.catalog
    }

    pub fn orders(&self) -> &OrderStore<S> {
        &self.orders
    }

    pub fn cart(&self) -> &Cart<S> {
        &self.cart
    }

    pub fn stats(&self) -> &StatisticsAggregator {
        &self.stats
    }

    pub fn context(&self) -> &StoreContext<S> {
        &self.ctx
    }

    /// Start every live view. All components are started even if one fails; the first failure is returned.
    #[instrument(level = "debug", skip(self))]
    pub async fn start(&self) -> Result<()> {
        self.stats.start();
        let catalog = self.catalog.start().await;
        let orders = self.orders.start().await;
        let cart = self.cart.start().await;
        catalog.and(orders).and(cart)
    }

    pub async fn close(&self) {
        self.cart.close().await;
        self.orders.close().await;
        self.catalog.close().await;
        self.stats.close().await;
    }

    /// Load a profile from the users collection and sign it in.
    #[instrument(level = "debug", skip(self))]
    pub async fn sign_in_with_profile(&self, user_id: &str) -> Result<User> {
        let data = self
            .ctx
            .remote
            .get_one(&self.ctx.config.users(), user_id)
            .await
            .map_err(StoreError::RemoteRead)?
            .ok_or_else(|| StoreError::not_found(EntityKind::User, user_id))?;
        let user = User::from_document(&Document::new(user_id, data))?;
        self.ctx.auth.sign_in(user.clone());
        Ok(user)
    }

    /// Store the profile of a newly registered user and sign it in. Credentials are the authentication provider's
    /// business; this only creates the profile document.
    #[instrument(level = "debug", skip(self, user), fields(user = %user.id))]
    pub async fn register_profile(&self, user: User) -> Result<User> {
        user.check_profile()?;
        self.ctx
            .remote
            .set_document(&self.ctx.config.users(), &user.id, user.to_data()?, false)
            .await
            .map_err(|err| {
                warn!(%err, "profile not stored");
                StoreError::remote_write(err)
            })?;
        debug!(user_type = %user.user_type, "profile created");
        self.ctx.auth.sign_in(user.clone());
        Ok(user)
    }

    /// Merge `patch` into the signed-in user's profile document and publish the updated profile to the session.
    #[instrument(level = "debug", skip(self, patch))]
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<User> {
        let mut user = self.ctx.auth.require()?;
        patch.validate()?;
        if patch.is_empty() {
            return Ok(user);
        }

        user.apply_patch(&patch);
        user.check_profile()?;
        self.ctx
            .remote
            .set_document(&self.ctx.config.users(), &user.id, Value::Object(patch.to_fields()), true)
            .await
            .map_err(|err| {
                warn!(%err, user = %user.id, "profile update failed");
                StoreError::remote_write(err)
            })?;

        if !self.ctx.auth.update_current(user.clone()) {
            debug!(user = %user.id, "signed out during the profile update");
        }
        Ok(user)
    }

    /// Turn the cart into an order and take the ordered units out of the cart. Returns the new order's identity.
    ///
    /// The order is created from the lines as they are at the time of the call: product name, price, quantity,
    /// variant and image are copied into the order. Units added while the order is being placed stay in the cart.
    /// Failing to update the cart afterwards does not fail the checkout.
    #[instrument(level = "debug", skip(self, details))]
    pub async fn checkout(&self, details: CheckoutDetails) -> Result<String> {
        let user = self.ctx.auth.require()?;
        let owner = self.cart.owner();
        let lines = self.cart.lines();
        if lines.is_empty() {
            return Err(StoreError::Validation("cart is empty".to_string()));
        }

        let items = lines
            .iter()
            .map(|line| {
                NewOrderItem::new(line.id.clone(), line.name.clone(), line.quantity, line.price)
                    .with_variant(line.selected_variant.clone())
                    .with_image(Some(line.image.clone()))
            })
            .collect();

        let new_order = NewOrder {
            customer_name: non_empty_or(details.customer_name, &user.name),
            customer_email: non_empty_or(details.customer_email, &user.email),
            customer_phone: details.customer_phone.or_else(|| user.phone.clone()),
            shipping_address: details.shipping_address,
            items,
        };

        let order_id = self.orders.create_order(new_order).await?;
        debug!(order = %order_id, lines = lines.len(), "checked out");

        // The cart reports its own persistence failures.
        if let Err(err) = self.cart.remove_ordered(owner.as_deref(), &lines).await {
            warn!(%err, order = %order_id, "order placed but the cart was not updated remotely");
        }

        Ok(order_id)
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    }
    else {
        value
    }
}
