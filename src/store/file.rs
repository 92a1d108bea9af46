//! A directory of JSON files, one per key.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use super::{validate_key, KvStore, StorageError};

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait::async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)?).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes to a temporary sibling first so readers never see a torn value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let temp = self.dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));

        fs::write(&temp, value).await?;
        if let Err(err) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)?).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
