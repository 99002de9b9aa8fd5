use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TerraError {
    #[error("invalid collection id: {0}")]
    InvalidCollectionId(String),

    #[error("invalid scene id: {0}")]
    InvalidSceneId(String),

    #[error("invalid area context: {0}")]
    InvalidAreaContext(String),

    #[error("invalid asset key: {0}")]
    InvalidAssetKey(String),

    #[error("invalid item key: {0}")]
    InvalidItemKey(String),

    #[error("invalid bounding box: {0}")]
    InvalidBbox(String),

    #[error("invalid datetime range: {0}")]
    InvalidDatetimeRange(String),

    #[error("missing config file terra-im.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("collection not mapped to any search endpoint: {0}")]
    UnknownCollection(String),

    #[error("search request failed: {0}")]
    SearchHttp(String),

    #[error("search endpoint returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("no items found for collection {collection} in area {area}")]
    NoItemsFound { collection: String, area: String },

    #[error("asset '{asset}' not present in item {item}")]
    AssetNotInItem { asset: String, item: String },

    #[error("no fetchable location for asset '{asset}' in item {item}")]
    AssetHrefMissing { asset: String, item: String },

    #[error("asset transfer failed: {0}")]
    TransferHttp(String),

    #[error("transfer returned status {status}: {message}")]
    TransferStatus { status: u16, message: String },

    #[error("index sync request failed: {0}")]
    IndexHttp(String),

    #[error("index returned status {status}: {message}")]
    IndexStatus { status: u16, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("catalog store error: {0}")]
    StoreIo(String),

    #[error("item not found in local catalog: {0}")]
    ItemNotFound(String),
}
