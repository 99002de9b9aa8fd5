use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::BoundingBox;
use crate::error::TerraError;

/// Cooperative cancellation flag threaded from the orchestration layer down
/// to per-asset operations. A cancelled transfer is abandoned between steps;
/// it never reaches the catalog merge.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Fetch the asset whole.
    Full,
    /// Crop the raster to the area bounding box during transfer.
    Clip,
}

pub trait AssetTransfer: Send + Sync {
    fn transfer(
        &self,
        href: &str,
        destination: &Utf8Path,
        mode: TransferMode,
        bbox: &BoundingBox,
        cancel: &CancelToken,
    ) -> Result<Utf8PathBuf, TerraError>;
}

#[derive(Clone)]
pub struct HttpAssetTransfer {
    client: Client,
}

impl HttpAssetTransfer {
    pub fn new() -> Result<Self, TerraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("terra-im/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TerraError::TransferHttp(err.to_string()))?,
        );
        // Rasters can be large; the overall deadline belongs to the caller.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .map_err(|err| TerraError::TransferHttp(err.to_string()))?;
        Ok(Self { client })
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
                    return Err(TerraError::TransferHttp(err.to_string()));
                }
            }
        }
    }
}

impl AssetTransfer for HttpAssetTransfer {
    fn transfer(
        &self,
        href: &str,
        destination: &Utf8Path,
        mode: TransferMode,
        _bbox: &BoundingBox,
        cancel: &CancelToken,
    ) -> Result<Utf8PathBuf, TerraError> {
        if cancel.is_cancelled() {
            return Err(TerraError::Cancelled);
        }
        if !href.starts_with("http") {
            return Err(TerraError::TransferHttp(format!(
                "unsupported URL scheme: {href}"
            )));
        }
        if mode == TransferMode::Clip {
            // Raster cropping lives behind this trait in deployment-specific
            // implementations; the HTTP transfer fetches the asset whole.
            tracing::debug!(href, "clip requested, fetching full asset");
        }

        let parent = destination
            .parent()
            .ok_or_else(|| TerraError::StoreIo("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| TerraError::StoreIo(format!("create {parent}: {err}")))?;

        let response = self.send_with_retries(|| self.client.get(href))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "transfer request failed".to_string());
            return Err(TerraError::TransferStatus { status, message });
        }

        let temp = tempfile::Builder::new()
            .prefix("terra-im-asset")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| TerraError::StoreIo(err.to_string()))?;
        let mut response = response;
        let mut file = temp.as_file();
        std::io::copy(&mut response, &mut file)
            .map_err(|err| TerraError::TransferHttp(err.to_string()))?;
        temp.persist(destination.as_std_path())
            .map_err(|err| TerraError::StoreIo(err.to_string()))?;
        Ok(destination.to_owned())
    }
}

pub fn band_basename(href: &str) -> String {
    let segment = Url::parse(href)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.last().map(|value| value.to_string()))
        })
        .unwrap_or_else(|| href.rsplit('/').next().unwrap_or(href).to_string());
    let basename = segment.split('.').next().unwrap_or(&segment);
    if basename.is_empty() {
        "asset".to_string()
    } else {
        basename.to_string()
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
