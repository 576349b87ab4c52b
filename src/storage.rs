//! Blob storage collaborator for verification documents and photos.
//!
//! Minimal contract: `put(key, bytes, content_type) -> url`. The store is
//! an S3-compatible HTTP endpoint addressed by object key.

use reqwest::Client;
use std::time::Duration;

use crate::config::StorageConfig;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage rejected object {key} ({status})")]
    Rejected { key: String, status: u16 },
}

/// Result of an upload: the public URL of the object.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub url: String,
}

pub struct BlobStorage {
    http: Client,
    base_url: String,
    public_base_url: String,
    access_token: String,
}

impl BlobStorage {
    pub fn new(cfg: &StorageConfig) -> Result<Self, StorageError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            public_base_url: cfg.public_base_url.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone(),
        })
    }

    /// Upload an object and return its public URL.
    pub async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<PutResult, StorageError> {
        let response = self
            .http
            .put(format!("{}/{key}", self.base_url))
            .bearer_auth(&self.access_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Rejected {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(PutResult {
            url: format!("{}/{key}", self.public_base_url),
        })
    }
}
