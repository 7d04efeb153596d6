//! # storefront-sync
//!
//! Order lifecycle, cart and sales statistics for a storefront built over a managed document database.
//!
//! The crate keeps local, always-readable views of remote documents and reconciles them with live subscriptions:
//!
//! - [`OrderStore`](orders::OrderStore) follows the orders visible to the current actor, creates orders and moves
//!   them through their status workflow.
//! - [`Cart`](cart::Cart) holds the active session's cart and persists it per user.
//! - [`ProductCatalog`](catalog::ProductCatalog) lists, searches and edits products.
//! - [`StatisticsAggregator`](stats::StatisticsAggregator) derives time-windowed sales summaries and product rankings
//!   from the order view.
//!
//! [`Storefront`](storefront::Storefront) wires all of them over one [`StoreContext`](context::StoreContext).
//!
//! # The Basics
//!
//! The database itself is not part of the crate. It is reached through the [`DocumentStore`](traits::DocumentStore)
//! trait, which an application implements over its vendor SDK. The contract is narrow: one-shot queries, single
//! document reads and writes, and live subscriptions delivering complete snapshots.
//!
//! Every view follows the same rules:
//!
//! - A view is a snapshot, an `Arc<Vec<T>>` published through a `tokio::sync::watch` channel. It is never edited in
//!   place; readers see either the old or the new snapshot.
//! - Before the first subscription snapshot arrives, the view is seeded from the [local
//!   cache](local_cache::LocalCache).
//! - A snapshot delivered by the subscription replaces the view wholesale and wins over any local change made
//!   before it.
//! - When the subscription fails the view is kept but marked [stale](types::SyncState::Stale) until the store is
//!   started again.
//!
//! # Failures
//!
//! Mutations return [`StoreError`](error::StoreError). Orders must exist remotely to be trusted, so a failed order
//! write leaves everything as it was. Catalog and cart mutations are kept locally when the remote write fails; the
//! error says so through its [`Fallback`](error::Fallback), so a degraded write never passes for success.
//!
//! ```ignore
//! let ctx = StoreContext::new(Arc::new(my_store), AuthSession::new(), StoreConfig::builder().build()?);
//! let storefront = Storefront::new(ctx, OrderScope::All);
//! storefront.start().await?;
//!
//! storefront.cart().add_item(CartItem::new("prod_1", "Organic Apples", dec!(2.99), 3)).await?;
//! let order_id = storefront.checkout(CheckoutDetails::shipping_to("1 Main St")).await?;
//! storefront.orders().update_order_status(&order_id, OrderStatus::Shipped).await?;
//! ```

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub(crate) mod live;
pub mod local_cache;
#[cfg(feature = "tracing")]
pub mod logging;
pub mod model;
pub mod orders;
pub mod stats;
pub mod storefront;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use error::StoreError;
#[doc(inline)]
pub use storefront::Storefront;
#[doc(inline)]
pub use traits::DocumentStore;

pub mod prelude {
    pub use crate::auth::AuthSession;
    pub use crate::cart::Cart;
    pub use crate::catalog::ProductCatalog;
    pub use crate::config::StoreConfig;
    pub use crate::context::StoreContext;
    pub use crate::error::*;
    pub use crate::local_cache::LocalCache;
    pub use crate::model::*;
    pub use crate::orders::OrderScope;
    pub use crate::orders::OrderStore;
    pub use crate::stats::Period;
    pub use crate::stats::SalesSummary;
    pub use crate::stats::StatisticsAggregator;
    pub use crate::stats::StatsReport;
    pub use crate::storefront::CheckoutDetails;
    pub use crate::storefront::Storefront;
    pub use crate::traits::*;
    pub use crate::types::*;
}
