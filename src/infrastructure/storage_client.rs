//! Object storage client
//!
//! Bucket-based HTTP storage: objects are written to
//! `{base}/object/{bucket}/{key}` and read publicly from
//! `{base}/object/public/{bucket}/{key}`. The render endpoint serves
//! re-encoded JPEG renditions, used to shrink training payloads.

use async_trait::async_trait;
use reqwest::Client;

use crate::application::ports::outbound::{ObjectStoragePort, StorageError};

pub struct StorageClient {
    client: Client,
    base_url: String,
    bucket: String,
    api_key: String,
}

impl StorageClient {
    pub fn new(base_url: &str, bucket: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn public_prefix(&self) -> String {
        format!("{}/object/public/{}/", self.base_url, self.bucket)
    }

    /// Extract the storage key from a key or one of our own public URLs
    fn key_of(&self, url_or_key: &str) -> Option<String> {
        if let Some(key) = url_or_key.strip_prefix(&self.public_prefix()) {
            return Some(key.to_string());
        }
        if !url_or_key.starts_with("http") {
            return Some(url_or_key.to_string());
        }
        None
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(StorageError::Api(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let response = self
            .client
            .post(format!("{}/object/{}/{}", self.base_url, self.bucket, key))
            .bearer_auth(&self.api_key)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Api(format!("{status}: {body}")));
        }
        Ok(self.public_url(key))
    }
}

#[async_trait]
impl ObjectStoragePort for StorageClient {
    async fn store(&self, ephemeral_url: &str, key: &str) -> Result<String, StorageError> {
        let bytes = self.download(ephemeral_url).await?;
        self.upload(key, bytes).await
    }

    async fn store_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        self.upload(key, bytes).await
    }

    async fn fetch(&self, url_or_key: &str) -> Result<Vec<u8>, StorageError> {
        match self.key_of(url_or_key) {
            Some(key) => self.download(&self.public_url(&key)).await,
            None => self.download(url_or_key).await,
        }
    }

    async fn fetch_compressed(
        &self,
        url_or_key: &str,
        quality: u8,
    ) -> Result<Vec<u8>, StorageError> {
        match self.key_of(url_or_key) {
            Some(key) => {
                let url = format!(
                    "{}/render/image/public/{}/{}?format=jpeg&quality={}",
                    self.base_url, self.bucket, key, quality
                );
                self.download(&url).await
            }
            None => {
                // Objects outside our bucket cannot be re-encoded server-side
                tracing::warn!(url = url_or_key, "cannot compress external object, fetching as-is");
                self.download(url_or_key).await
            }
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}{}", self.public_prefix(), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> StorageClient {
        StorageClient::new("http://storage.local/storage/v1", "sceneforge", "key")
    }

    #[test]
    fn public_url_points_into_the_bucket() {
        assert_eq!(
            client().public_url("adapters/characters/zanele_ab.safetensors"),
            "http://storage.local/storage/v1/object/public/sceneforge/adapters/characters/zanele_ab.safetensors"
        );
    }

    #[test]
    fn keys_are_recovered_from_own_public_urls() {
        let c = client();
        assert_eq!(
            c.key_of("http://storage.local/storage/v1/object/public/sceneforge/generated/a.png"),
            Some("generated/a.png".to_string())
        );
        assert_eq!(
            c.key_of("generated/a.png"),
            Some("generated/a.png".to_string())
        );
        assert_eq!(c.key_of("https://elsewhere.example/a.png"), None);
    }
}
