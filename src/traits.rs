use async_trait::async_trait;
use crate::{
    error::{RemoteError, StoreError},
    types::{CollectionRef, Document, Fields, Query, Subscription, WatchTarget},
};
use serde_json::Value;

/// The managed document database the stores are built over. Implementations wrap a vendor SDK; the crate only relies
/// on this contract.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Run a query once.
    async fn get_all(&self, query: &Query) -> Result<Vec<Document>, RemoteError>;

    /// Fetch a single document's fields. Absence is `Ok(None)`.
    async fn get_one(&self, collection: &CollectionRef, id: &str) -> Result<Option<Value>, RemoteError>;

    /// Create a document with a store-assigned identity and return it.
    async fn create_document(&self, collection: &CollectionRef, data: Value) -> Result<String, RemoteError>;

    /// Write a document under a known identity. With `merge` the top-level fields of `data` are merged into an
    /// existing document instead of replacing it.
    async fn set_document(
        &self,
        collection: &CollectionRef,
        id: &str,
        data: Value,
        merge: bool,
    ) -> Result<(), RemoteError>;

    /// Update some fields of an existing document. Fails with `not-found` if there is no such document.
    async fn update_fields(&self, collection: &CollectionRef, id: &str, fields: Fields) -> Result<(), RemoteError>;

    async fn delete_document(&self, collection: &CollectionRef, id: &str) -> Result<(), RemoteError>;

    /// Open a live subscription. The first event is expected to carry the current state.
    async fn subscribe(&self, target: WatchTarget) -> Result<Subscription, RemoteError>;
}

/// Durable string storage on the device; the backing store of [`LocalCache`](crate::local_cache::LocalCache).
#[async_trait]
pub trait KeyValueStorage: Send + Sync + 'static {
    async fn get_item(&self, key: &str) -> std::io::Result<Option<String>>;
    async fn set_item(&self, key: &str, value: String) -> std::io::Result<()>;
    async fn remove_item(&self, key: &str) -> std::io::Result<()>;
}

/// Receives notifications the stores cannot return to a caller: failures of background tasks and of non-fatal
/// persistence.
#[async_trait]
pub trait Observer: Send + Sync + 'static {
    async fn on_error(&self, _error: &StoreError) {}
    async fn on_warning(&self, _message: &str) {}
    async fn on_snapshot(&self, _collection: &str, _count: usize) {}
}
