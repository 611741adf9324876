//! Durable object storage port

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage API error: {0}")]
    Api(String),
}

/// Durable object storage. Callers must tolerate this being unavailable:
/// on a store failure the ephemeral source URL is used directly instead.
#[async_trait]
pub trait ObjectStoragePort: Send + Sync {
    /// Copy the object at an ephemeral URL into durable storage under
    /// `key`. Returns the stable URL.
    async fn store(&self, ephemeral_url: &str, key: &str) -> Result<String, StorageError>;

    /// Store raw bytes under `key`. Returns the stable URL.
    async fn store_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError>;

    /// Fetch the bytes of a stored or ephemeral object
    async fn fetch(&self, url_or_key: &str) -> Result<Vec<u8>, StorageError>;

    /// Fetch a re-encoded rendition at the given JPEG quality. Used to
    /// shrink training payloads without shrinking the dataset.
    async fn fetch_compressed(&self, url_or_key: &str, quality: u8)
        -> Result<Vec<u8>, StorageError>;

    /// Public URL for a storage key
    fn public_url(&self, key: &str) -> String;
}
