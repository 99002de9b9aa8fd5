use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::catalog::{CollectionDoc, ItemDoc};
use crate::error::TerraError;

pub trait IndexSync: Send + Sync {
    fn publish_collection(&self, collection: &CollectionDoc) -> Result<(), TerraError>;
    fn publish_item(&self, item: &ItemDoc) -> Result<(), TerraError>;
}

/// Valid "no index configured" mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledIndex;

impl IndexSync for DisabledIndex {
    fn publish_collection(&self, _collection: &CollectionDoc) -> Result<(), TerraError> {
        Ok(())
    }

    fn publish_item(&self, _item: &ItemDoc) -> Result<(), TerraError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct StacIndexHttpClient {
    client: Client,
    base_url: String,
}

impl StacIndexHttpClient {
    pub fn new(base_url: &str) -> Result<Self, TerraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("terra-im/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TerraError::IndexHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| TerraError::IndexHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn post_json<T: serde::Serialize>(&self, url: &str, body: &T) -> Result<(), TerraError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|err| TerraError::IndexHttp(err.to_string()))?;
        let status = response.status();
        // 409 means the document is already indexed, which matches the
        // insert-ignore semantics the local store expects.
        if status.is_success() || status.as_u16() == 409 {
            return Ok(());
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "index request failed".to_string());
        Err(TerraError::IndexStatus {
            status: status.as_u16(),
            message,
        })
    }
}

impl IndexSync for StacIndexHttpClient {
    fn publish_collection(&self, collection: &CollectionDoc) -> Result<(), TerraError> {
        let url = format!("{}/collections", self.base_url);
        self.post_json(&url, collection)
    }

    fn publish_item(&self, item: &ItemDoc) -> Result<(), TerraError> {
        let url = format!("{}/collections/{}/items", self.base_url, item.collection);
        self.post_json(&url, item)
    }
}

/// Best-effort publish after a durable local write. The local document is
/// authoritative; index failures are logged and swallowed, never retried
/// here.
pub fn try_publish_collection(index: &dyn IndexSync, collection: &CollectionDoc) {
    if let Err(err) = index.publish_collection(collection) {
        tracing::warn!(collection = %collection.id, error = %err, "index publish failed");
    }
}

pub fn try_publish_item(index: &dyn IndexSync, item: &ItemDoc) {
    if let Err(err) = index.publish_item(item) {
        tracing::warn!(
            collection = %item.collection,
            item = %item.id,
            error = %err,
            "index publish failed"
        );
    }
}
