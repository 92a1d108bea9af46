//! Whole-collection access to the JSON arrays in the durable store.
//!
//! Every update reads the entire collection, changes it in memory and writes
//! the entire collection back. A revision counter stored next to each
//! collection lets writers detect that someone else wrote in between
//! (another process, or an admin working from a stale list) instead of
//! silently clobbering their changes.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::{StorageError, Store};
use crate::error::{GavelError, GavelResult};

/// A record stored in one of the flat collections.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// A human-readable name for the kind of record, used in errors.
    const KIND: &'static str;

    fn id(&self) -> &str;
}

/// The full contents of a collection along with the revision it was read at.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub revision: u64,
}

pub struct Collection<T> {
    store: Store,
    key: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Collection<T> {
    pub fn new(store: Store, key: &'static str) -> Self {
        Self {
            store,
            key,
            _record: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    fn revision_key(&self) -> String {
        format!("{}.revision", self.key)
    }

    /// The current revision, or 0 if it was never written or can't be read.
    pub async fn revision(&self) -> u64 {
        self.stored_revision().await.unwrap_or_else(|err| {
            warn!(collection = self.key, "failed to read revision: {}", err);
            0
        })
    }

    async fn stored_revision(&self) -> Result<u64, StorageError> {
        let key = self.revision_key();
        match self.store.kv().get(&key).await? {
            Some(value) => value.trim().parse().map_err(|_| StorageError::Corrupt {
                key,
                reason: format!("{:?} is not a revision", value),
            }),
            None => Ok(0),
        }
    }

    /// Loads the whole collection.
    ///
    /// Unavailable storage and corrupt JSON both degrade to an empty
    /// collection so that read paths keep working. Writers use
    /// [`Collection::load_for_write`] instead.
    pub async fn load(&self) -> Snapshot<T> {
        let revision = self.revision().await;
        let items = match self.store.kv().get(self.key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(collection = self.key, "corrupt collection, treating as empty: {}", err);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(collection = self.key, "failed to read collection: {}", err);
                Vec::new()
            }
        };

        Snapshot { items, revision }
    }

    /// Loads the whole collection, failing on anything that `load` would
    /// paper over. Writing back a collection that only looked empty would
    /// erase it.
    pub async fn load_for_write(&self) -> GavelResult<Snapshot<T>> {
        let revision = self.stored_revision().await?;
        let items = match self.store.kv().get(self.key).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|err| StorageError::Corrupt {
                key: self.key.to_owned(),
                reason: err.to_string(),
            })?,
            None => Vec::new(),
        };

        Ok(Snapshot { items, revision })
    }

    pub async fn all(&self) -> Vec<T> {
        self.load().await.items
    }

    pub async fn find(&self, id: &str) -> Option<T> {
        self.all().await.into_iter().find(|item| item.id() == id)
    }

    /// Fails with `StaleWrite` if the caller expects a revision other than
    /// the stored one. Lets callers bail out before side effects that a
    /// later write could not undo.
    pub async fn ensure_revision(&self, expected: Option<u64>) -> GavelResult<()> {
        let Some(expected) = expected else {
            return Ok(());
        };

        if expected == self.stored_revision().await? {
            Ok(())
        } else {
            Err(GavelError::StaleWrite {
                collection: self.key,
            })
        }
    }

    /// Replaces the whole collection, provided nobody wrote since `read_at`.
    ///
    /// Returns the new revision.
    pub async fn save(&self, items: Vec<T>, read_at: u64) -> GavelResult<u64> {
        let _guard = self.store.write_guard().await;

        if self.stored_revision().await? != read_at {
            return Err(GavelError::StaleWrite {
                collection: self.key,
            });
        }

        self.persist(&items, read_at).await
    }

    async fn persist(&self, items: &[T], read_at: u64) -> GavelResult<u64> {
        let raw = serde_json::to_string(items).map_err(StorageError::from)?;
        let next = read_at + 1;
        self.store.kv().set(self.key, &raw).await?;
        self.store
            .kv()
            .set(&self.revision_key(), &next.to_string())
            .await?;

        Ok(next)
    }

    /// Runs `change` against the current contents and writes the result.
    ///
    /// The write lock is held from the read to the write, so writers in this
    /// process never see each other as stale. `expected` is only compared
    /// when given: it is the revision an admin's edit was based on. Nothing
    /// is written if `change` fails.
    pub async fn write<F, R>(&self, expected: Option<u64>, change: F) -> GavelResult<R>
    where
        F: FnOnce(&mut Vec<T>) -> GavelResult<R>,
    {
        let _guard = self.store.write_guard().await;

        let Snapshot {
            mut items,
            revision,
        } = self.load_for_write().await?;
        if expected.map_or(false, |expected| expected != revision) {
            return Err(GavelError::StaleWrite {
                collection: self.key,
            });
        }

        let result = change(&mut items)?;
        self.persist(&items, revision).await?;

        Ok(result)
    }

    pub async fn insert(&self, item: T, expected: Option<u64>) -> GavelResult<T> {
        self.insert_with(item, expected, |_, _| Ok(())).await
    }

    /// Appends `item` once `check` accepts it against the current records.
    pub async fn insert_with<F>(&self, item: T, expected: Option<u64>, check: F) -> GavelResult<T>
    where
        F: FnOnce(&T, &[T]) -> GavelResult<()>,
    {
        self.write(expected, |items| {
            check(&item, items.as_slice())?;
            items.push(item.clone());
            Ok(item)
        })
        .await
    }

    /// Applies `change` to the record with the given id and persists the
    /// collection. Nothing is written if the id is unknown or `change` fails.
    pub async fn update<F>(&self, id: &str, expected: Option<u64>, change: F) -> GavelResult<T>
    where
        F: FnOnce(&mut T, &[T]) -> GavelResult<()>,
    {
        self.write(expected, |items| {
            let index = position(items.as_slice(), id)?;
            let mut updated = items[index].clone();
            change(&mut updated, items.as_slice())?;
            items[index] = updated.clone();

            Ok(updated)
        })
        .await
    }

    /// Removes the record with the given id and persists the remainder.
    pub async fn remove(&self, id: &str, expected: Option<u64>) -> GavelResult<T> {
        self.write(expected, |items| {
            let index = position(items.as_slice(), id)?;
            Ok(items.remove(index))
        })
        .await
    }
}

fn position<T: Record>(items: &[T], id: &str) -> GavelResult<usize> {
    items
        .iter()
        .position(|item| item.id() == id)
        .ok_or_else(|| GavelError::not_found(T::KIND, id))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::store::{KvStore, MemoryStore};
    use crate::tests::mock::{unavailable_store, yielding_store};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Record for Note {
        const KIND: &'static str = "note";

        fn id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str) -> Note {
        Note {
            id: id.to_owned(),
            body: format!("body of {}", id),
        }
    }

    fn notes() -> (Store, Collection<Note>) {
        let store = Store::new(MemoryStore::new());
        let collection = Collection::new(store.clone(), "notes");
        (store, collection)
    }

    #[tokio::test]
    async fn writes_replace_the_whole_array() {
        let (store, notes) = notes();
        notes.insert(note("a"), None).await.unwrap();
        notes.insert(note("b"), None).await.unwrap();

        let raw = store.kv().get("notes").await.unwrap().unwrap();
        let stored: Vec<Note> = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored, vec![note("a"), note("b")]);
        assert_eq!(notes.revision().await, 2);
    }

    #[tokio::test]
    async fn corrupt_json_reads_as_empty_but_is_never_overwritten() {
        let (store, notes) = notes();
        store.kv().set("notes", "{not json").await.unwrap();

        assert!(notes.all().await.is_empty());

        let err = notes.insert(note("a"), None).await.unwrap_err();
        assert!(matches!(err, GavelError::Storage(StorageError::Corrupt { .. })));
        let err = notes.remove("a", None).await.unwrap_err();
        assert!(matches!(err, GavelError::Storage(_)));
        assert_eq!(store.kv().get("notes").await.unwrap().as_deref(), Some("{not json"));

        store.kv().set("notes", "[]").await.unwrap();
        store.kv().set("notes.revision", "seven").await.unwrap();
        assert_eq!(notes.revision().await, 0);
        assert!(matches!(
            notes.insert(note("a"), None).await,
            Err(GavelError::Storage(_))
        ));
        assert_eq!(store.kv().get("notes").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn unavailable_storage_reads_as_empty_and_refuses_writes() {
        let notes: Collection<Note> = Collection::new(unavailable_store(), "notes");

        assert!(notes.all().await.is_empty());
        assert_eq!(notes.revision().await, 0);
        assert!(notes.find("a").await.is_none());

        let err = notes.insert(note("a"), None).await.unwrap_err();
        assert!(matches!(err, GavelError::Storage(StorageError::Unavailable(_))));
        let err = notes.ensure_revision(Some(0)).await.unwrap_err();
        assert!(matches!(err, GavelError::Storage(_)));
    }

    #[tokio::test]
    async fn concurrent_writers_without_a_revision_both_land() {
        let store = yielding_store();
        let notes: Collection<Note> = Collection::new(store.clone(), "notes");
        notes.insert(note("a"), None).await.unwrap();

        let edit = |body: &'static str| {
            notes.update("a", None, move |note, _| {
                note.body.push_str(body);
                Ok(())
            })
        };
        let (first, second) = tokio::join!(edit(" once"), edit(" twice"));
        first.unwrap();
        second.unwrap();

        let (third, fourth) = tokio::join!(
            notes.insert(note("b"), None),
            notes.insert(note("c"), None),
        );
        third.unwrap();
        fourth.unwrap();

        let stored = notes.all().await;
        assert_eq!(stored.len(), 3);
        assert!(stored[0].body.contains("once") && stored[0].body.contains("twice"));
        assert_eq!(notes.revision().await, 5);
    }

    #[tokio::test]
    async fn stale_revisions_are_rejected() {
        let (_store, notes) = notes();
        notes.insert(note("a"), None).await.unwrap();

        let stale = notes.load().await;
        notes.insert(note("b"), None).await.unwrap();

        let err = notes.save(stale.items, stale.revision).await.unwrap_err();
        assert!(matches!(err, GavelError::StaleWrite { collection: "notes" }));
        assert_eq!(notes.all().await.len(), 2);

        let err = notes.remove("a", Some(stale.revision)).await.unwrap_err();
        assert!(matches!(err, GavelError::StaleWrite { .. }));
        assert!(notes.ensure_revision(Some(stale.revision)).await.is_err());
        assert!(notes.ensure_revision(Some(2)).await.is_ok());
        assert!(notes.ensure_revision(None).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_ids_leave_the_collection_alone() {
        let (_store, notes) = notes();
        notes.insert(note("a"), None).await.unwrap();

        let err = notes
            .update("missing", None, |note, _| {
                note.body = "changed".to_owned();
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::NotFound { kind: "note", .. }));

        let err = notes.remove("missing", None).await.unwrap_err();
        assert!(matches!(err, GavelError::NotFound { .. }));

        assert_eq!(notes.all().await, vec![note("a")]);
        assert_eq!(notes.revision().await, 1);
    }
}
