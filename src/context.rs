use crate::{
    auth::AuthSession,
    config::StoreConfig,
    error::StoreError,
    local_cache::LocalCache,
    traits::{DocumentStore, Observer},
};
use std::sync::Arc;
use tracing::warn;

/// Dependencies shared by the stores: the remote document store, the current-user accessor, the local cache, the
/// configuration and an optional observer.
pub struct StoreContext<S>
where
    S: DocumentStore,
{
    pub remote:   Arc<S>,
    pub auth:     AuthSession,
    pub cache:    LocalCache,
    pub config:   Arc<StoreConfig>,
    pub observer: Option<Arc<dyn Observer>>,
}

impl<S> StoreContext<S>
where
    S: DocumentStore,
{
    /// A context with a memory-only cache sized after `config`.
    pub fn new(remote: Arc<S>, auth: AuthSession, config: StoreConfig) -> Self {
        let cache = LocalCache::new(config.cache_capacity);
        Self {
            remote,
            auth,
            cache,
            config: Arc::new(config),
            observer: None,
        }
    }

    pub fn with_cache(mut self, cache: LocalCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub(crate) async fn report_error(&self, err: &StoreError) {
        if let Some(ref observer) = self.observer {
            observer.on_error(err).await;
        }
    }

    pub(crate) async fn report_warning(&self, message: &str) {
        warn!("{message}");
        if let Some(ref observer) = self.observer {
            observer.on_warning(message).await;
        }
    }

    pub(crate) async fn report_snapshot(&self, collection: &str, count: usize) {
        if let Some(ref observer) = self.observer {
            observer.on_snapshot(collection, count).await;
        }
    }
}

impl<S> Clone for StoreContext<S>
where
    S: DocumentStore,
{
    fn clone(&self) -> Self {
        Self {
            remote:   Arc::clone(&self.remote),
            auth:     self.auth.clone(),
            cache:    self.cache.clone(),
            config:   Arc::clone(&self.config),
            observer: self.observer.clone(),
        }
    }
}
