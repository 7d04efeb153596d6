use crate::types::SyncState;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

// A snapshot published to readers plus the task keeping it in sync. The snapshot is only ever replaced as a whole.
pub(crate) struct LiveSnapshot<T> {
    items:    watch::Sender<Arc<Vec<T>>>,
    state:    watch::Sender<SyncState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<T> LiveSnapshot<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (items, _) = watch::channel(Arc::new(Vec::new()));
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            items,
            state,
            listener: Mutex::new(None),
        }
    }

    pub(crate) fn current(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.items.borrow())
    }

    pub(crate) fn replace(&self, items: Arc<Vec<T>>) {
        self.items.send_replace(items);
    }

    /// Apply `f` to a copy of the snapshot and publish the copy if `f` reports a change.
    pub(crate) fn modify<F>(&self, f: F) -> Option<Arc<Vec<T>>>
    where
        F: FnOnce(&mut Vec<T>) -> bool,
    {
        let mut updated = None;
        self.items.send_if_modified(|current| {
            let mut next = current.as_ref().clone();
            if !f(&mut next) {
                return false;
            }
            let next = Arc::new(next);
            *current = Arc::clone(&next);
            updated = Some(next);
            true
        });
        updated
    }

    pub(crate) fn watch(&self) -> watch::Receiver<Arc<Vec<T>>> {
        self.items.subscribe()
    }

    pub(crate) fn stream(&self) -> WatchStream<Arc<Vec<T>>> {
        WatchStream::new(self.items.subscribe())
    }

    pub(crate) fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listener.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub(crate) fn set_listener(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Abort the listener and wait until it is gone, which releases its subscription.
    pub(crate) async fn stop(&self) {
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl<T> Drop for LiveSnapshot<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}
