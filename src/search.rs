use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::domain::{
    BoundingBox, CollectionId, DatetimeRange, Geometry, RemoteAsset, RemoteItem,
};
use crate::error::TerraError;

#[derive(Debug, Clone)]
pub struct SearchQuery<'a> {
    pub collection: &'a CollectionId,
    pub bbox: &'a BoundingBox,
    pub datetime: &'a DatetimeRange,
    pub filters: Option<&'a serde_json::Map<String, Value>>,
    pub max_items: usize,
}

pub trait SearchClient: Send + Sync {
    fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<RemoteItem>, TerraError>;
}

#[derive(Clone)]
pub struct StacHttpClient {
    client: Client,
    base_url: String,
}

impl StacHttpClient {
    pub fn new(base_url: &str) -> Result<Self, TerraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("terra-im/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TerraError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| TerraError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, TerraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(TerraError::SearchHttp(err.to_string()));
                }
            }
        }
    }
}

impl SearchClient for StacHttpClient {
    fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<RemoteItem>, TerraError> {
        let url = format!("{}/search", self.base_url);
        let mut body = serde_json::json!({
            "collections": [query.collection.as_str()],
            "bbox": query.bbox.to_array(),
            "datetime": query.datetime.as_str(),
            "limit": query.max_items,
        });
        if let Some(filters) = query.filters {
            body["query"] = Value::Object(filters.clone());
        }

        let response = self.send_with_retries(|| self.client.post(&url).json(&body))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "search request failed".to_string());
            return Err(TerraError::SearchStatus { status, message });
        }
        let payload: Value = response
            .json()
            .map_err(|err| TerraError::SearchHttp(err.to_string()))?;
        Ok(parse_feature_collection(&payload))
    }
}

fn parse_feature_collection(payload: &Value) -> Vec<RemoteItem> {
    let Some(features) = payload.get("features").and_then(Value::as_array) else {
        return Vec::new();
    };
    features
        .iter()
        .filter_map(|feature| {
            let item = parse_feature(feature);
            if item.is_none() {
                tracing::warn!("skipping search feature without a usable id");
            }
            item
        })
        .collect()
}

fn parse_feature(feature: &Value) -> Option<RemoteItem> {
    let scene_id = feature.get("id")?.as_str()?.parse().ok()?;
    let geometry = feature
        .get("geometry")
        .cloned()
        .and_then(|value| serde_json::from_value::<Geometry>(value).ok());
    let bbox = feature
        .get("bbox")
        .cloned()
        .and_then(|value| serde_json::from_value::<BoundingBox>(value).ok());
    let properties = feature
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let datetime = properties
        .get("datetime")
        .and_then(Value::as_str)
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc));

    let mut assets = BTreeMap::new();
    if let Some(raw_assets) = feature.get("assets").and_then(Value::as_object) {
        for (key, raw) in raw_assets {
            let Some(href) = raw.get("href").and_then(Value::as_str) else {
                continue;
            };
            assets.insert(
                key.clone(),
                RemoteAsset {
                    href: href.to_string(),
                    alternate_href: raw
                        .get("alternate")
                        .and_then(|alt| alt.get("aws_http"))
                        .and_then(|alt| alt.get("href"))
                        .and_then(Value::as_str)
                        .map(|value| value.to_string()),
                    media_type: raw
                        .get("type")
                        .and_then(Value::as_str)
                        .map(|value| value.to_string()),
                    title: raw
                        .get("title")
                        .and_then(Value::as_str)
                        .map(|value| value.to_string()),
                },
            );
        }
    }

    Some(RemoteItem {
        scene_id,
        geometry,
        bbox,
        datetime,
        properties,
        assets,
    })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
