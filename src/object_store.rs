//! Object storage for submission uploads
//!
//! The gamification core only needs "store bytes, get a URL back, delete by
//! URL". [`BlobObjectStore`] provides that on top of a content-addressed
//! local directory using SHA256 hashes as filenames; URLs look like
//! `{public_base_url}/files/sha256-<hex>`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::error::GamificationError;

/// Caller-supplied description of an upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

/// Result of storing an object
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub url: String,
    pub hash: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub already_existed: bool,
}

/// An object read back from storage
#[derive(Debug, Clone)]
pub struct ObjectContent {
    pub data: Vec<u8>,
    pub metadata: ObjectMetadata,
}

/// Size and stored type of an object, as the store recorded them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

/// What a delete call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Already gone; deletes are idempotent
    Missing,
    /// URL does not point into this store, nothing to do
    Foreign,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn store(&self, data: &[u8], metadata: ObjectMetadata) -> Result<StoredObject, GamificationError>;

    async fn delete(&self, url: &str) -> Result<DeleteOutcome, GamificationError>;

    /// Fetch by key (the hash part of the URL); `None` when absent
    async fn get(&self, key: &str) -> Result<Option<ObjectContent>, GamificationError>;

    /// Describe the object behind a URL issued by this store; `None` for
    /// foreign URLs and missing objects
    async fn stat(&self, url: &str) -> Result<Option<ObjectInfo>, GamificationError>;
}

/// Content-addressed store in a local directory
pub struct BlobObjectStore {
    root_dir: PathBuf,
    url_prefix: String,
}

impl BlobObjectStore {
    pub async fn new<P: AsRef<Path>>(root_dir: P, public_base_url: &str) -> Result<Self, GamificationError> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), "Initialized object store");

        Ok(Self {
            root_dir,
            url_prefix: format!("{}/files/", public_base_url.trim_end_matches('/')),
        })
    }

    /// Compute SHA256 hash of data
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("sha256-{}", hex::encode(hasher.finalize()))
    }

    pub fn url_for(&self, hash: &str) -> String {
        format!("{}{}", self.url_prefix, hash)
    }

    /// Extract the hash from a URL issued by this store
    pub fn key_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.url_prefix.as_str()).filter(|key| is_valid_key(key))
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        // First 4 hex chars as subdirectory to spread files out
        let hash_part = hash.strip_prefix("sha256-").unwrap_or(hash);
        let subdir = &hash_part[..4.min(hash_part.len())];
        self.root_dir.join("blobs").join(subdir).join(hash)
    }

    fn meta_path(&self, hash: &str) -> PathBuf {
        self.blob_path(hash).with_extension("meta")
    }
}

/// `sha256-` followed by 64 lowercase hex characters
fn is_valid_key(key: &str) -> bool {
    key.strip_prefix("sha256-").map_or(false, |hex| {
        hex.len() == 64 && hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    })
}

#[async_trait]
impl ObjectStore for BlobObjectStore {
    async fn store(&self, data: &[u8], metadata: ObjectMetadata) -> Result<StoredObject, GamificationError> {
        let hash = Self::compute_hash(data);
        let blob_path = self.blob_path(&hash);
        let already_existed = fs::metadata(&blob_path).await.is_ok();

        if already_existed {
            debug!(hash = %hash, "Object already exists");
        } else {
            if let Some(parent) = blob_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&blob_path, data).await?;
            fs::write(self.meta_path(&hash), serde_json::to_vec(&metadata)?).await?;
            info!(hash = %hash, size = data.len(), "Stored object");
        }

        Ok(StoredObject {
            url: self.url_for(&hash),
            hash,
            size_bytes: data.len() as u64,
            content_type: metadata.content_type,
            already_existed,
        })
    }

    async fn delete(&self, url: &str) -> Result<DeleteOutcome, GamificationError> {
        let Some(hash) = self.key_from_url(url) else {
            debug!(url = %url, "Skipping delete of foreign url");
            return Ok(DeleteOutcome::Foreign);
        };

        let blob_path = self.blob_path(hash);
        match fs::remove_file(&blob_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DeleteOutcome::Missing),
            Err(e) => {
                return Err(GamificationError::ExternalIo(format!("Failed to delete {}: {}", hash, e)))
            }
        }
        fs::remove_file(self.meta_path(hash)).await.ok();

        info!(hash = %hash, "Deleted object");
        Ok(DeleteOutcome::Deleted)
    }

    async fn get(&self, key: &str) -> Result<Option<ObjectContent>, GamificationError> {
        if !is_valid_key(key) {
            return Ok(None);
        }

        let data = match fs::read(self.blob_path(key)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let metadata = match fs::read(self.meta_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => ObjectMetadata::default(),
        };

        Ok(Some(ObjectContent { data, metadata }))
    }

    async fn stat(&self, url: &str) -> Result<Option<ObjectInfo>, GamificationError> {
        let Some(hash) = self.key_from_url(url) else {
            return Ok(None);
        };

        let size_bytes = match fs::metadata(self.blob_path(hash)).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GamificationError::ExternalIo(format!("Failed to stat {}: {}", hash, e))),
        };
        let metadata: ObjectMetadata = match fs::read(self.meta_path(hash)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => ObjectMetadata::default(),
        };

        Ok(Some(ObjectInfo {
            size_bytes,
            content_type: metadata.content_type,
            file_name: metadata.file_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_in(dir: &TempDir) -> BlobObjectStore {
        BlobObjectStore::new(dir.path(), "http://localhost:8095/").await.unwrap()
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir).await;

        let meta = ObjectMetadata { content_type: Some("image/png".into()), file_name: Some("a.png".into()) };
        let stored = store.store(b"png bytes", meta).await.unwrap();

        assert!(stored.url.starts_with("http://localhost:8095/files/sha256-"));
        assert!(!stored.already_existed);

        let content = store.get(&stored.hash).await.unwrap().unwrap();
        assert_eq!(content.data, b"png bytes");
        assert_eq!(content.metadata.content_type.as_deref(), Some("image/png"));

        let again = store.store(b"png bytes", ObjectMetadata::default()).await.unwrap();
        assert!(again.already_existed);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir).await;

        let stored = store.store(b"data", ObjectMetadata::default()).await.unwrap();

        assert_eq!(store.delete(&stored.url).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete(&stored.url).await.unwrap(), DeleteOutcome::Missing);
        assert!(store.get(&stored.hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_and_malformed_urls() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir).await;

        assert_eq!(
            store.delete("https://cdn.example.com/files/sha256-abc").await.unwrap(),
            DeleteOutcome::Foreign
        );
        assert_eq!(
            store.delete("http://localhost:8095/files/../../etc/passwd").await.unwrap(),
            DeleteOutcome::Foreign
        );
        assert!(store.get("../secret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stat_reports_stored_facts() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir).await;

        let meta = ObjectMetadata { content_type: Some("application/pdf".into()), file_name: Some("cv.pdf".into()) };
        let stored = store.store(&[7u8; 5000], meta).await.unwrap();

        let info = store.stat(&stored.url).await.unwrap().unwrap();
        assert_eq!(info.size_bytes, 5000);
        assert_eq!(info.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(info.file_name.as_deref(), Some("cv.pdf"));

        assert!(store.stat("https://cdn.example.com/cv.pdf").await.unwrap().is_none());
        store.delete(&stored.url).await.unwrap();
        assert!(store.stat(&stored.url).await.unwrap().is_none());
    }

    #[test]
    fn test_compute_hash() {
        let hash = BlobObjectStore::compute_hash(b"test");
        assert!(hash.starts_with("sha256-"));
        assert_eq!(hash.len(), 7 + 64);
        assert!(is_valid_key(&hash));
    }
}
