use async_trait::async_trait;
use crate::{
    error::RemoteError,
    traits::DocumentStore,
    types::{CollectionRef, Document, Fields, Query, Subscription, SubscriptionEvent, WatchTarget},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

struct Watcher {
    id:     u64,
    target: WatchTarget,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl Watcher {
    fn snapshot(&self, collections: &HashMap<String, Vec<Document>>) -> Vec<Document> {
        let docs = collections
            .get(self.target.collection().name())
            .cloned()
            .unwrap_or_default();
        match self.target {
            WatchTarget::Query(ref query) => query.apply(docs),
            WatchTarget::Document { ref id, .. } => docs.into_iter().filter(|d| &d.id == id).collect(),
        }
    }
}

#[derive(Default)]
struct State {
    // Documents per collection, in insertion order.
    collections:        HashMap<String, Vec<Document>>,
    watchers:           Vec<Watcher>,
    next_document:      u64,
    next_watcher:       u64,
    writes:             usize,
    fail_writes:        Option<RemoteError>,
    fail_reads:         Option<RemoteError>,
    fail_subscriptions: Option<RemoteError>,
}

impl State {
    fn document_mut(&mut self, collection: &str, id: &str) -> Option<&mut Document> {
        self.collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
    }

    fn put(&mut self, collection: &str, id: &str, data: Value) {
        match self.document_mut(collection, id) {
            Some(doc) => doc.data = data,
            None => self
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(Document::new(id, data)),
        }
    }

    // Deliver a fresh snapshot to everyone watching `collection`.
    fn notify(&mut self, collection: &str) {
        let State {
            ref collections,
            ref mut watchers,
            ..
        } = *self;
        watchers.retain(|w| {
            if w.target.collection().name() != collection {
                return !w.events.is_closed();
            }
            w.events.send(SubscriptionEvent::Snapshot(w.snapshot(collections))).is_ok()
        });
    }

    fn check_write(&mut self) -> Result<(), RemoteError> {
        match self.fail_writes {
            Some(ref err) => Err(err.clone()),
            None => {
                self.writes += 1;
                Ok(())
            }
        }
    }
}

fn merge_into(target: &mut Value, fields: Fields) {
    match target {
        Value::Object(existing) => existing.extend(fields),
        other => *other = Value::Object(fields),
    }
}

/// A document store living in memory.
///
/// Queries are evaluated with [`Query::apply`]. Every write delivers a new snapshot to the live subscriptions on the
/// written collection. Writes, reads and subscriptions can be made to fail with a given error.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<State>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail with `err`, or succeed again with `None`.
    pub fn fail_writes(&self, err: Option<RemoteError>) {
        self.state.lock().fail_writes = err;
    }

    pub fn fail_reads(&self, err: Option<RemoteError>) {
        self.state.lock().fail_reads = err;
    }

    pub fn fail_subscriptions(&self, err: Option<RemoteError>) {
        self.state.lock().fail_subscriptions = err;
    }

    /// Break every live subscription on `collection` with `err`.
    pub fn break_subscriptions(&self, collection: &str, err: RemoteError) {
        let mut state = self.state.lock();
        state.watchers.retain(|w| {
            if w.target.collection().name() == collection {
                let _ = w.events.send(SubscriptionEvent::Error(err.clone()));
                false
            }
            else {
                true
            }
        });
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .document_mut(collection, id)
            .map(|d| d.data.clone())
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.state.lock().collections.get(collection).map_or(0, Vec::len)
    }

    /// Number of subscriptions that have not been torn down.
    pub fn watcher_count(&self) -> usize {
        let mut state = self.state.lock();
        state.watchers.retain(|w| !w.events.is_closed());
        state.watchers.len()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_all(&self, query: &Query) -> Result<Vec<Document>, RemoteError> {
        let state = self.state.lock();
        if let Some(ref err) = state.fail_reads {
            return Err(err.clone());
        }
        let docs = state
            .collections
            .get(query.collection.name())
            .cloned()
            .unwrap_or_default();
        Ok(query.apply(docs))
    }

    async fn get_one(&self, collection: &CollectionRef, id: &str) -> Result<Option<Value>, RemoteError> {
        let mut state = self.state.lock();
        if let Some(ref err) = state.fail_reads {
            return Err(err.clone());
        }
        Ok(state.document_mut(collection.name(), id).map(|d| d.data.clone()))
    }

    async fn create_document(&self, collection: &CollectionRef, data: Value) -> Result<String, RemoteError> {
        let mut state = self.state.lock();
        state.check_write()?;
        state.next_document += 1;
        let id = format!("{}-{:04}", collection.name(), state.next_document);
        state.put(collection.name(), &id, data);
        state.notify(collection.name());
        debug!(collection = collection.name(), %id, "document created");
        Ok(id)
    }

    async fn set_document(
        &self,
        collection: &CollectionRef,
        id: &str,
        data: Value,
        merge: bool,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.check_write()?;
        match (merge, data) {
            (true, Value::Object(fields)) if state.document_mut(collection.name(), id).is_some() => {
                if let Some(doc) = state.document_mut(collection.name(), id) {
                    merge_into(&mut doc.data, fields);
                }
            }
            (_, data) => state.put(collection.name(), id, data),
        }
        state.notify(collection.name());
        Ok(())
    }

    async fn update_fields(&self, collection: &CollectionRef, id: &str, fields: Fields) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.check_write()?;
        let Some(doc) = state.document_mut(collection.name(), id)
        else {
            return Err(RemoteError::not_found(format!("{}/{id}", collection.name())));
        };
        merge_into(&mut doc.data, fields);
        state.notify(collection.name());
        Ok(())
    }

    async fn delete_document(&self, collection: &CollectionRef, id: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.check_write()?;
        if let Some(docs) = state.collections.get_mut(collection.name()) {
            docs.retain(|d| d.id != id);
        }
        state.notify(collection.name());
        Ok(())
    }

    async fn subscribe(&self, target: WatchTarget) -> Result<Subscription, RemoteError> {
        let mut state = self.state.lock();
        if let Some(ref err) = state.fail_subscriptions {
            return Err(err.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.next_watcher += 1;
        let watcher = Watcher {
            id: state.next_watcher,
            target,
            events: tx,
        };
        let _ = watcher
            .events
            .send(SubscriptionEvent::Snapshot(watcher.snapshot(&state.collections)));
        let id = watcher.id;
        state.watchers.push(watcher);

        let shared = Arc::downgrade(&self.state);
        Ok(Subscription::new(rx, move || {
            if let Some(state) = shared.upgrade() {
                state.lock().watchers.retain(|w| w.id != id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::types::Direction;
    use serde_json::json;
    use super::*;

    #[tokio::test]
    async fn test_subscription_follows_writes() {
        let store = MemoryDocumentStore::new();
        let orders = CollectionRef::new("orders");
        let mut sub = store
            .subscribe(WatchTarget::Query(orders.query().order_by("n", Direction::Ascending)))
            .await
            .unwrap();

        let Some(SubscriptionEvent::Snapshot(initial)) = sub.next().await
        else {
            panic!("expected an initial snapshot");
        };
        assert!(initial.is_empty());

        store.set_document(&orders, "b", json!({"n": 2}), false).await.unwrap();
        store.set_document(&orders, "a", json!({"n": 1}), false).await.unwrap();
        sub.next().await;
        let Some(SubscriptionEvent::Snapshot(docs)) = sub.next().await
        else {
            panic!("expected a snapshot");
        };
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert_eq!(store.watcher_count(), 1);
        sub.unsubscribe();
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_merge_and_update() {
        let store = MemoryDocumentStore::new();
        let carts = CollectionRef::new("carts");
        store
            .set_document(&carts, "u1", json!({"items": [], "note": "x"}), false)
            .await
            .unwrap();
        store
            .set_document(&carts, "u1", json!({"items": [1]}), true)
            .await
            .unwrap();
        assert_eq!(store.document("carts", "u1").unwrap(), json!({"items": [1], "note": "x"}));

        let err = store.update_fields(&carts, "u2", Fields::new()).await.unwrap_err();
        assert_eq!(err.code, crate::error::RemoteErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryDocumentStore::new();
        let products = CollectionRef::new("products");
        store.fail_writes(Some(RemoteError::unavailable("offline")));
        assert!(store.create_document(&products, json!({})).await.is_err());
        assert_eq!(store.write_count(), 0);

        store.fail_writes(None);
        let id = store.create_document(&products, json!({})).await.unwrap();
        assert!(store.document("products", &id).is_some());
        assert_eq!(store.write_count(), 1);
    }
}
