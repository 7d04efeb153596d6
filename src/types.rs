use crate::error::RemoteError;
use serde_json::Map;
use serde_json::Value;
use std::{cmp::Ordering, fmt::{Debug, Display}};
use tokio::sync::mpsc;

/// Field map of a document. Documents are schemaless; typed models are produced by the normalizers in
/// [`model`](crate::model).
pub type Fields = Map<String, Value>;

/// A document as delivered by the store: the identity assigned by the store plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id:   String,
    pub data: Value,
}

impl Document {
    pub fn new<S: Into<String>>(id: S, data: Value) -> Self {
        Self { id: id.into(), data }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Handle of a named collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    name: String,
}

impl CollectionRef {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a query over the whole collection.
    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }
}

impl Display for CollectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op:    FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn matches(&self, data: &Value) -> bool {
        let Some(actual) = data.get(&self.field)
        else {
            return false;
        };

        // Numbers are equal by value, so 60 matches 60.0.
        let ord = compare_values(actual, &self.value);
        let equal = ord.map_or_else(|| actual == &self.value, Ordering::is_eq);
        match self.op {
            FilterOp::Eq => equal,
            FilterOp::Ne => !equal,
            FilterOp::Lt => ord.is_some_and(Ordering::is_lt),
            FilterOp::Lte => ord.is_some_and(Ordering::is_le),
            FilterOp::Gt => ord.is_some_and(Ordering::is_gt),
            FilterOp::Gte => ord.is_some_and(Ordering::is_ge),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A result set description: a collection, predicates combined with AND, an optional ordering and an optional
/// limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionRef,
    pub predicates: Vec<Predicate>,
    pub order_by:   Option<(String, Direction)>,
    pub limit:      Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionRef) -> Self {
        Self {
            collection,
            predicates: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter<S: Into<String>>(mut self, field: S, op: FilterOp, value: Value) -> Self {
        self.predicates.push(Predicate {
            field: field.into(),
            op,
            value,
        });
        self
    }

    pub fn where_eq<S: Into<String>>(self, field: S, value: Value) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn order_by<S: Into<String>>(mut self, field: S, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(data))
    }

    /// Apply predicates, ordering and limit to a set of documents. Documents that compare equal keep their input
    /// order.
    pub fn apply<I>(&self, documents: I) -> Vec<Document>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut selected: Vec<Document> = documents.into_iter().filter(|d| self.matches(&d.data)).collect();

        if let Some((ref field, direction)) = self.order_by {
            selected.sort_by(|a, b| {
                let ord = match (a.data.get(field), b.data.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }

        selected
    }
}

// Numbers compare numerically, strings lexicographically (which orders ISO-8601 timestamps chronologically), booleans
// false < true. Mixed kinds are incomparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// What a live subscription follows.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchTarget {
    Query(Query),
    Document { collection: CollectionRef, id: String },
}

impl WatchTarget {
    pub fn document<S: Into<String>>(collection: CollectionRef, id: S) -> Self {
        Self::Document {
            collection,
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &CollectionRef {
        match self {
            Self::Query(q) => &q.collection,
            Self::Document { collection, .. } => collection,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// The complete current result set. For document targets it holds zero or one document.
    Snapshot(Vec<Document>),
    Error(RemoteError),
}

type Teardown = Box<dyn FnOnce() + Send + 'static>;

/// A live subscription. Events arrive in delivery order; the teardown hook of the store runs exactly once, either on
/// [`unsubscribe`](Subscription::unsubscribe) or when the value is dropped.
pub struct Subscription {
    events:   mpsc::UnboundedReceiver<SubscriptionEvent>,
    teardown: Option<Teardown>,
}

impl Subscription {
    pub fn new<F>(events: mpsc::UnboundedReceiver<SubscriptionEvent>, teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            events,
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Wait for the next event. `None` means the store closed the channel.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

/// Health of a store's live view.
#[derive(Debug, Clone, Default)]
pub enum SyncState {
    /// Not subscribed yet; the snapshot comes from the local cache.
    #[default]
    Idle,
    Live,
    /// The subscription failed; the snapshot is the last one received.
    Stale(crate::error::StoreError),
}

impl SyncState {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}
