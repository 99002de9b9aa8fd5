use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

use terra_imagery_manager::app::{App, ProgressEvent, ProgressSink};
use terra_imagery_manager::catalog::{CatalogStore, CollectionDoc, ItemDoc};
use terra_imagery_manager::config::{AreaEntry, Config, ConfigLoader, ResolvedConfig};
use terra_imagery_manager::domain::{BoundingBox, RemoteAsset, RemoteItem};
use terra_imagery_manager::error::TerraError;
use terra_imagery_manager::index::{DisabledIndex, IndexSync};
use terra_imagery_manager::search::{SearchClient, SearchQuery};
use terra_imagery_manager::storage::LocalStorage;
use terra_imagery_manager::transfer::{AssetTransfer, CancelToken, TransferMode};

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Clone, Copy)]
struct StaticSearch;

impl SearchClient for StaticSearch {
    fn search(&self, _query: &SearchQuery<'_>) -> Result<Vec<RemoteItem>, TerraError> {
        let mut assets = BTreeMap::new();
        for band in ["red", "green", "blue"] {
            assets.insert(
                band.to_string(),
                RemoteAsset {
                    href: format!("https://data.example.com/S1_20250101/{band}.tif"),
                    alternate_href: None,
                    media_type: None,
                    title: None,
                },
            );
        }
        Ok(vec![RemoteItem {
            scene_id: "S1_20250101".parse().unwrap(),
            geometry: None,
            bbox: None,
            datetime: None,
            properties: serde_json::Map::new(),
            assets,
        }])
    }
}

#[derive(Clone, Default)]
struct RecordingTransfer {
    calls: Arc<Mutex<Vec<String>>>,
    fail_marker: Option<&'static str>,
}

impl RecordingTransfer {
    fn failing(marker: &'static str) -> Self {
        Self {
            calls: Arc::default(),
            fail_marker: Some(marker),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl AssetTransfer for RecordingTransfer {
    fn transfer(
        &self,
        href: &str,
        destination: &Utf8Path,
        _mode: TransferMode,
        _bbox: &BoundingBox,
        _cancel: &CancelToken,
    ) -> Result<Utf8PathBuf, TerraError> {
        self.calls.lock().unwrap().push(href.to_string());
        if let Some(marker) = self.fail_marker {
            if href.contains(marker) {
                return Err(TerraError::TransferHttp("connection reset".to_string()));
            }
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent.as_std_path()).unwrap();
        }
        std::fs::write(destination.as_std_path(), b"raster").unwrap();
        Ok(destination.to_owned())
    }
}

#[derive(Clone, Default)]
struct RecordingIndex {
    collections: Arc<Mutex<Vec<String>>>,
    items: Arc<Mutex<Vec<String>>>,
}

impl IndexSync for RecordingIndex {
    fn publish_collection(&self, collection: &CollectionDoc) -> Result<(), TerraError> {
        self.collections.lock().unwrap().push(collection.id.clone());
        Ok(())
    }

    fn publish_item(&self, item: &ItemDoc) -> Result<(), TerraError> {
        self.items.lock().unwrap().push(item.id.clone());
        Ok(())
    }
}

/// Index that always fails, to show failures never surface as ingest errors.
#[derive(Clone, Copy)]
struct BrokenIndex;

impl IndexSync for BrokenIndex {
    fn publish_collection(&self, _collection: &CollectionDoc) -> Result<(), TerraError> {
        Err(TerraError::IndexHttp("index down".to_string()))
    }

    fn publish_item(&self, _item: &ItemDoc) -> Result<(), TerraError> {
        Err(TerraError::IndexHttp("index down".to_string()))
    }
}

fn config_in(root: &Utf8Path, assets: &[&str]) -> ResolvedConfig {
    let config = Config {
        collection: Some("sentinel-2-l2a".to_string()),
        assets: assets.iter().map(|value| value.to_string()).collect(),
        areas: vec![AreaEntry {
            name: "PortA".to_string(),
            bbox: [10.0, 36.0, 10.5, 36.5],
        }],
        catalog_root: Some(root.join("catalog").to_string()),
        data_root: Some(root.join("raster").to_string()),
        ..Config::default()
    };
    ConfigLoader::resolve_config(config).unwrap()
}

#[test]
fn second_run_downloads_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let config = config_in(&root, &["red", "green", "blue"]);

    let transfer = RecordingTransfer::default();
    let app = App::new(
        CatalogStore::new(config.catalog_root.clone()),
        StaticSearch,
        transfer.clone(),
        LocalStorage,
        DisabledIndex,
    );

    let first = app.ingest(&config, &CancelToken::new(), &NoopSink).unwrap();
    assert_eq!(first.areas[0].planned, 1);
    assert_eq!(first.areas[0].outcomes[0].succeeded.len(), 3);
    assert!(first.areas[0].outcomes[0].failed.is_empty());
    assert_eq!(transfer.call_count(), 3);

    let second = app.ingest(&config, &CancelToken::new(), &NoopSink).unwrap();
    assert_eq!(second.areas[0].matched, 1);
    assert_eq!(second.areas[0].planned, 0);
    assert_eq!(second.areas[0].skipped, 1);
    assert!(second.areas[0].outcomes.is_empty());
    assert_eq!(transfer.call_count(), 3);
}

#[test]
fn failed_band_is_retried_alone_on_the_next_run() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let config = config_in(&root, &["red", "green", "blue"]);
    let store = CatalogStore::new(config.catalog_root.clone());

    let flaky = App::new(
        store.clone(),
        StaticSearch,
        RecordingTransfer::failing("green"),
        LocalStorage,
        DisabledIndex,
    );
    let first = flaky.ingest(&config, &CancelToken::new(), &NoopSink).unwrap();
    let outcome = &first.areas[0].outcomes[0];
    let succeeded: Vec<&str> = outcome.succeeded.iter().map(|a| a.key.as_str()).collect();
    assert_eq!(succeeded, vec!["red", "blue"]);
    assert_eq!(outcome.failed[0].key.as_str(), "green");

    let transfer = RecordingTransfer::default();
    let healthy = App::new(store, StaticSearch, transfer.clone(), LocalStorage, DisabledIndex);
    let second = healthy.ingest(&config, &CancelToken::new(), &NoopSink).unwrap();
    let outcome = &second.areas[0].outcomes[0];
    let succeeded: Vec<&str> = outcome.succeeded.iter().map(|a| a.key.as_str()).collect();
    assert_eq!(succeeded, vec!["green"]);
    // Only the missing band was transferred.
    assert_eq!(transfer.call_count(), 1);

    let third = healthy.ingest(&config, &CancelToken::new(), &NoopSink).unwrap();
    assert_eq!(third.areas[0].planned, 0);
    assert_eq!(third.areas[0].skipped, 1);
}

#[test]
fn index_receives_publishes_after_durable_writes() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let config = config_in(&root, &["red", "green"]);

    let index = RecordingIndex::default();
    let app = App::new(
        CatalogStore::new(config.catalog_root.clone()),
        StaticSearch,
        RecordingTransfer::default(),
        LocalStorage,
        index.clone(),
    );
    app.ingest(&config, &CancelToken::new(), &NoopSink).unwrap();

    assert_eq!(*index.collections.lock().unwrap(), vec!["sentinel-2-l2a"]);
    assert_eq!(
        *index.items.lock().unwrap(),
        vec!["S1_20250101", "S1_20250101"]
    );
}

#[test]
fn index_failures_never_fail_the_ingest() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let config = config_in(&root, &["red"]);

    let app = App::new(
        CatalogStore::new(config.catalog_root.clone()),
        StaticSearch,
        RecordingTransfer::default(),
        LocalStorage,
        BrokenIndex,
    );

    let result = app.ingest(&config, &CancelToken::new(), &NoopSink).unwrap();
    assert!(result.areas[0].error.is_none());
    assert_eq!(result.areas[0].outcomes[0].succeeded.len(), 1);
}

#[test]
fn list_and_info_reflect_ingested_state() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let config = config_in(&root, &["red"]);

    let app = App::new(
        CatalogStore::new(config.catalog_root.clone()),
        StaticSearch,
        RecordingTransfer::default(),
        LocalStorage,
        DisabledIndex,
    );
    app.ingest(&config, &CancelToken::new(), &NoopSink).unwrap();

    let listed = app.list(&config.collection, &NoopSink).unwrap();
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].item_key, "S1_20250101_PortA");
    assert_eq!(listed.items[0].area.as_deref(), Some("PortA"));
    assert_eq!(listed.items[0].assets, vec!["red"]);

    let key = "S1_20250101_PortA".parse().unwrap();
    let info = app.info(&config.collection, &key, &NoopSink).unwrap();
    assert_eq!(info.item.id, "S1_20250101");

    let missing = "S9_20250101_PortZ".parse().unwrap();
    let err = app.info(&config.collection, &missing, &NoopSink).unwrap_err();
    assert!(matches!(err, TerraError::ItemNotFound(_)));
}

#[test]
fn plan_previews_without_mutating_the_catalog() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let config = config_in(&root, &["red", "green"]);

    let app = App::new(
        CatalogStore::new(config.catalog_root.clone()),
        StaticSearch,
        RecordingTransfer::default(),
        LocalStorage,
        DisabledIndex,
    );

    let plan = app.plan(&config, &NoopSink).unwrap();
    assert_eq!(plan.areas[0].items.len(), 1);
    assert_eq!(plan.areas[0].items[0].item_key, "S1_20250101_PortA");
    assert_eq!(plan.areas[0].items[0].needed, vec!["red", "green"]);
    assert!(!config.catalog_root.join("catalog.json").as_std_path().exists());
}
