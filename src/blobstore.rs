//! Key-value blob stores used to persist node metadata

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

pub type BlobResult<T> = std::result::Result<T, BlobStoreError>;

/// Minimal blob store contract
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> BlobResult<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: Vec<u8>) -> BlobResult<()>;
    fn remove(&self, key: &str) -> BlobResult<()>;
    fn clear(&self) -> BlobResult<()>;
}

/// Blob store held in process memory
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> BlobResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> BlobResult<()> {
        self.blobs.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> BlobResult<()> {
        self.blobs.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> BlobResult<()> {
        self.blobs.write().clear();
        Ok(())
    }
}

const BLOB_EXTENSION: &str = "blob";

/// Blob store keeping one file per key under a directory.
///
/// Keys are URL-safe base64 encoded so arbitrary node ids map to valid
/// file names.
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    /// Open a store rooted at `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> BlobResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| BlobStoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> BlobResult<PathBuf> {
        if key.is_empty() {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        let name = URL_SAFE_NO_PAD.encode(key.as_bytes());
        Ok(self.dir.join(format!("{}.{}", name, BLOB_EXTENSION)))
    }

    fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> BlobStoreError + '_ {
        move |source| BlobStoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, key: &str) -> BlobResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(key)(e)),
        }
    }

    fn put(&self, key: &str, value: Vec<u8>) -> BlobResult<()> {
        let path = self.path_for(key)?;
        // Write then rename so readers never see a torn blob
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value).map_err(Self::io_err(key))?;
        std::fs::rename(&tmp, &path).map_err(Self::io_err(key))
    }

    fn remove(&self, key: &str) -> BlobResult<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(key)(e)),
        }
    }

    fn clear(&self) -> BlobResult<()> {
        let dir_key = self.dir.display().to_string();
        let entries = std::fs::read_dir(&self.dir).map_err(Self::io_err(&dir_key))?;
        for entry in entries {
            let path = entry.map_err(Self::io_err(&dir_key))?.path();
            if path.extension().is_some_and(|ext| ext == BLOB_EXTENSION) {
                std::fs::remove_file(&path).map_err(Self::io_err(&dir_key))?;
            }
        }
        Ok(())
    }
}
