use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::trace;
use xxhash_rust::xxh3::xxh3_64;

use crate::contracts::CacheStore;
use crate::error::{RefreshError, Result};

/// On-disk entry; the key is kept so a hash collision reads as a miss.
#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    key: String,
    value: Value,
}

/// Durable store: one JSON document per key under `<cache_dir>/<store>/`.
///
/// Survives across test processes, which is what lets a fresh process skip
/// the rebuild when no migration file changed.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    directory: PathBuf,
}

impl FileCacheStore {
    pub fn new(cache_dir: impl AsRef<Path>, store: &str) -> Self {
        Self {
            directory: cache_dir.as_ref().join(store),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{:016x}.json", xxh3_64(key.as_bytes())))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RefreshError::cache(key, e)),
        };

        let entry: Entry = serde_json::from_slice(&bytes).map_err(|e| RefreshError::cache(key, e))?;
        if entry.key != key {
            trace!(key, stored_key = %entry.key, "cache=collision");
            return Ok(None);
        }
        Ok(Some(entry.value))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.read_entry(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| RefreshError::cache(key, e))?;

        let entry = Entry {
            key: key.to_string(),
            value,
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| RefreshError::cache(key, e))?;

        // Write-then-rename so a reader never sees a half-written entry.
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| RefreshError::cache(key, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| RefreshError::cache(key, e))?;

        trace!(key, path = %path.display(), "cache=stored");
        Ok(())
    }

    async fn pull(&self, key: &str) -> Result<Option<Value>> {
        let value = self.read_entry(key).await?;
        if value.is_some() {
            match fs::remove_file(self.path_for(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(RefreshError::cache(key, e)),
            }
        }
        Ok(value)
    }
}
