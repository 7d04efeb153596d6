use async_trait::async_trait;
use crate::traits::KeyValueStorage;
use parking_lot::Mutex;
use std::{collections::HashMap, io, sync::atomic::{AtomicBool, Ordering}};

/// Device storage kept in a map. Can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items:   Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn check(&self) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(io::Error::other("storage unavailable"))
        }
        else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> io::Result<Option<String>> {
        self.check()?;
        Ok(self.items.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> io::Result<()> {
        self.check()?;
        self.items.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> io::Result<()> {
        self.check()?;
        self.items.lock().remove(key);
        Ok(())
    }
}
