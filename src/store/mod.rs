//! The durable key-value store backing every collection and session record.
//!
//! Values are opaque strings (always JSON in practice). Collections are kept as
//! whole JSON arrays under a single key, so every write replaces the entire
//! collection; see [Collection](crate::store::collection::Collection).

use std::sync::Arc;

use async_graphql::Context;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::models::event::Event;
use crate::models::resource::Resource;
use crate::models::user::User;
use crate::store::collection::Collection;

pub mod collection;
pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Keys may only hold `[A-Za-z0-9_.-]` and must not start with a dot.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_owned()))
    }
}

/// A cheap handle to the durable store, shared by request handlers
/// and GraphQL resolvers.
#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn KvStore>,
    writes: Arc<Mutex<()>>,
}

impl Store {
    pub const USERS: &'static str = "users";
    pub const EVENTS: &'static str = "events";
    pub const RESOURCES: &'static str = "resources";
    pub const ADMIN_USER: &'static str = "adminUser";
    pub const SESSIONS: &'static str = "sessions";

    const LEGACY_KEYS: [&'static str; 3] = ["currentUser", "isAuthenticated", "userRole"];

    pub fn new(inner: impl KvStore + 'static) -> Self {
        Self {
            kv: Arc::new(inner),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_ctx<'c>(ctx: &Context<'c>) -> &'c Self {
        ctx.data_unchecked::<Store>()
    }

    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    /// Serializes collection writes within this process. Held from the
    /// read a write is based on until the write lands.
    pub(crate) async fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    pub fn users(&self) -> Collection<User> {
        Collection::new(self.clone(), Self::USERS)
    }

    pub fn events(&self) -> Collection<Event> {
        Collection::new(self.clone(), Self::EVENTS)
    }

    pub fn resources(&self) -> Collection<Resource> {
        Collection::new(self.clone(), Self::RESOURCES)
    }

    /// Normalizes data written by older versions of the site.
    ///
    /// Sessions used to live in a single `currentUser` key next to two loose
    /// flags; they are now keyed per session token, so the old keys are dropped.
    /// User records missing an id, permissions or status are filled in.
    pub async fn migrate_legacy(&self) -> Result<(), StorageError> {
        for key in Self::LEGACY_KEYS {
            if self.kv.get(key).await?.is_some() {
                info!(key, "removing legacy session key");
                self.kv.remove(key).await?;
            }
        }

        let users = self.users();
        let snapshot = users.load().await;
        let mut changed = false;
        let normalized = snapshot
            .items
            .into_iter()
            .map(|user| {
                let (user, fixed) = user.normalized();
                changed |= fixed;
                user
            })
            .collect::<Vec<_>>();

        if changed {
            info!("normalizing legacy user records");
            if let Err(err) = users.save(normalized, snapshot.revision).await {
                warn!("failed to normalize legacy user records: {}", err);
            }
        }

        Ok(())
    }
}
