use std::collections::HashMap;
use std::sync::Mutex;

use super::{validate_key, KvStore, StorageError};

/// A process-local store, used by tests and throwaway instances.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.values
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock was poisoned".to_owned()))
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        validate_key(key)?;
        Ok(self.values()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.values()?.insert(key.to_owned(), value.to_owned());

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.values()?.remove(key);

        Ok(())
    }
}
