//! Content store: durable text blobs on the local filesystem.
//!
//! Blobs live at `<root>/<key>.txt`. Every write lands in a temp file in
//! the same directory, is fsynced, then renamed over the target, so a
//! reader sees either the old bytes or the new ones and never a mix.
//! Overwrites of the same key are additionally serialized through a
//! per-key lock; overwrites of different keys run in parallel.

mod locks;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use locks::{KeyGuard, KeyLocks};

const BLOB_EXTENSION: &str = "txt";

/// Opaque handle to a blob: 32 lowercase hex chars (a v4 UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    /// Generate a fresh 128-bit random key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse a key, rejecting anything that is not a well-formed handle.
    pub fn parse(raw: &str) -> Result<Self> {
        let well_formed = raw.len() == 32
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::NotFound(format!("content key {raw:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentKey {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

/// Filesystem-backed blob store.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    locks: Arc<KeyLocks>,
}

impl ContentStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: Arc::new(KeyLocks::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `content` under a newly generated key.
    pub async fn write_new(&self, content: &str) -> Result<ContentKey> {
        let key = ContentKey::generate();
        write_atomic(&self.path_for(&key), content).await?;
        debug!(content_key = %key, bytes = content.len(), "blob written");
        Ok(key)
    }

    /// Read the full current content of a blob.
    pub async fn read(&self, key: &ContentKey) -> Result<String> {
        read_blob(&self.path_for(key), key).await
    }

    /// Replace a blob's content. Fails with `NotFound` if the key is absent.
    pub async fn overwrite(&self, key: &ContentKey, content: &str) -> Result<()> {
        self.lock(key).await.overwrite(content).await
    }

    /// Take the write lock for one key, for callers that need to read and
    /// write under the same exclusion (snapshot, overwrite, restore).
    pub async fn lock(&self, key: &ContentKey) -> BlobGuard<'_> {
        let guard = self.locks.acquire(key.as_str()).await;
        BlobGuard {
            store: self,
            key: key.clone(),
            _guard: guard,
        }
    }

    /// Number of keys that currently have a live lock entry.
    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }

    fn path_for(&self, key: &ContentKey) -> PathBuf {
        self.root.join(format!("{key}.{BLOB_EXTENSION}"))
    }
}

/// Exclusive write access to one blob. Released on drop.
#[derive(Debug)]
pub struct BlobGuard<'a> {
    store: &'a ContentStore,
    key: ContentKey,
    _guard: KeyGuard,
}

impl BlobGuard<'_> {
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    pub async fn read(&self) -> Result<String> {
        read_blob(&self.store.path_for(&self.key), &self.key).await
    }

    pub async fn overwrite(&self, content: &str) -> Result<()> {
        let path = self.store.path_for(&self.key);
        match tokio::fs::metadata(&path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("content {}", self.key)));
            }
            Err(e) => return Err(e.into()),
        }
        write_atomic(&path, content).await?;
        debug!(content_key = %self.key, bytes = content.len(), "blob overwritten");
        Ok(())
    }
}

async fn read_blob(path: &Path, key: &ContentKey) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(format!("content {key}")))
        }
        Err(e) => Err(e.into()),
    }
}

/// Write via temp file + fsync + rename.
async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));

    let written = async {
        let mut file = tokio::fs::File::create_new(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if written.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    written
}
