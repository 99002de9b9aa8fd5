use std::time::Duration;

use serde::Serialize;

use crate::catalog::{AREA_CONTEXT_PROPERTY, CatalogStore, ItemDoc};
use crate::config::{AreaRequest, ResolvedConfig};
use crate::coordinator::{DownloadCoordinator, DownloadOutcome};
use crate::domain::{AssetKey, CollectionId, ItemKey, RemoteItem};
use crate::error::TerraError;
use crate::index::{self, IndexSync};
use crate::reconcile::{self, WorkItem};
use crate::search::{SearchClient, SearchQuery};
use crate::storage::BlobStorage;
use crate::transfer::{AssetTransfer, CancelToken};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub collection: String,
    pub areas: Vec<AreaReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AreaReport {
    pub area: String,
    pub error: Option<String>,
    pub matched: usize,
    pub planned: usize,
    pub skipped: usize,
    pub outcomes: Vec<DownloadOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub collection: String,
    pub areas: Vec<AreaPlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AreaPlan {
    pub area: String,
    pub error: Option<String>,
    pub matched: usize,
    pub items: Vec<PlannedItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedItem {
    pub item_key: String,
    pub scene: String,
    pub needed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub collection: String,
    pub items: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub item_key: String,
    pub scene: String,
    pub area: Option<String>,
    pub datetime: String,
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub collection: String,
    pub item_key: String,
    pub item: ItemDoc,
}

#[derive(Clone)]
pub struct App<S: SearchClient, T: AssetTransfer, B: BlobStorage, I: IndexSync> {
    store: CatalogStore,
    search: S,
    transfer: T,
    storage: B,
    index: I,
}

impl<S: SearchClient, T: AssetTransfer, B: BlobStorage, I: IndexSync> App<S, T, B, I> {
    pub fn new(store: CatalogStore, search: S, transfer: T, storage: B, index: I) -> Self {
        Self {
            store,
            search,
            transfer,
            storage,
            index,
        }
    }

    pub fn ingest(
        &self,
        config: &ResolvedConfig,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<IngestResult, TerraError> {
        self.store.load_or_create_catalog()?;
        let collection_doc = self.store.ensure_collection(&config.collection)?;
        index::try_publish_collection(&self.index, &collection_doc);

        let mut areas = Vec::new();
        for request in &config.areas {
            if cancel.is_cancelled() {
                break;
            }
            sink.event(ProgressEvent {
                message: format!("phase=Search; area {}", request.area),
                elapsed: None,
            });
            areas.push(self.ingest_area(config, request, cancel, sink));
        }

        Ok(IngestResult {
            collection: config.collection.to_string(),
            areas,
        })
    }

    pub fn plan(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<PlanResult, TerraError> {
        let mut areas = Vec::new();
        for request in &config.areas {
            sink.event(ProgressEvent {
                message: format!("phase=Search; area {}", request.area),
                elapsed: None,
            });
            let plan = match self.search_area(config, request) {
                Ok((items, desired)) => {
                    let work = reconcile::plan(
                        &self.store,
                        &config.collection,
                        &desired,
                        &request.area,
                        &request.bbox,
                        &items,
                    );
                    AreaPlan {
                        area: request.area.to_string(),
                        error: None,
                        matched: items.len(),
                        items: work.iter().map(planned_item).collect(),
                    }
                }
                Err(err) => area_plan_error(request, &err),
            };
            areas.push(plan);
        }
        Ok(PlanResult {
            collection: config.collection.to_string(),
            areas,
        })
    }

    pub fn list(
        &self,
        collection: &CollectionId,
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, TerraError> {
        sink.event(ProgressEvent {
            message: "phase=Resolve; scanning catalog".to_string(),
            elapsed: None,
        });
        let items = self.store.list_items(collection)?;
        Ok(ListResult {
            collection: collection.to_string(),
            items: items
                .into_iter()
                .map(|(key, doc)| ListEntry {
                    item_key: key.as_str().to_string(),
                    scene: doc.id.clone(),
                    area: doc
                        .properties
                        .get(AREA_CONTEXT_PROPERTY)
                        .and_then(|value| value.as_str())
                        .map(|value| value.to_string()),
                    datetime: doc.datetime.clone(),
                    assets: doc.assets.keys().cloned().collect(),
                })
                .collect(),
        })
    }

    pub fn info(
        &self,
        collection: &CollectionId,
        key: &ItemKey,
        sink: &dyn ProgressSink,
    ) -> Result<InfoResult, TerraError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up {key}"),
            elapsed: None,
        });
        let item = self
            .store
            .load_item(collection, key)?
            .ok_or_else(|| TerraError::ItemNotFound(key.to_string()))?;
        Ok(InfoResult {
            collection: collection.to_string(),
            item_key: key.to_string(),
            item,
        })
    }

    fn ingest_area(
        &self,
        config: &ResolvedConfig,
        request: &AreaRequest,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> AreaReport {
        let (items, desired) = match self.search_area(config, request) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(area = %request.area, error = %err, "area batch failed");
                return AreaReport {
                    area: request.area.to_string(),
                    error: Some(err.to_string()),
                    matched: 0,
                    planned: 0,
                    skipped: 0,
                    outcomes: Vec::new(),
                };
            }
        };

        sink.event(ProgressEvent {
            message: format!("phase=Reconcile; {} remote items", items.len()),
            elapsed: None,
        });
        let work = reconcile::plan(
            &self.store,
            &config.collection,
            &desired,
            &request.area,
            &request.bbox,
            &items,
        );
        let skipped = items.len() - work.len();

        let coordinator = DownloadCoordinator::new(
            &self.store,
            &self.transfer,
            &self.storage,
            &self.index,
            config.data_root.clone(),
            config.mode,
        );
        let mut outcomes = Vec::new();
        for entry in &work {
            if cancel.is_cancelled() {
                break;
            }
            sink.event(ProgressEvent {
                message: format!("phase=Download; item {}", entry.item_key()),
                elapsed: None,
            });
            outcomes.push(coordinator.execute(&config.collection, entry, cancel));
        }

        AreaReport {
            area: request.area.to_string(),
            error: None,
            matched: items.len(),
            planned: work.len(),
            skipped,
            outcomes,
        }
    }

    fn search_area(
        &self,
        config: &ResolvedConfig,
        request: &AreaRequest,
    ) -> Result<(Vec<RemoteItem>, Vec<AssetKey>), TerraError> {
        let query = SearchQuery {
            collection: &config.collection,
            bbox: &request.bbox,
            datetime: &config.datetime,
            filters: config.filters.as_ref(),
            max_items: config.max_items,
        };
        let items = self.search.search(&query)?;
        if items.is_empty() {
            return Err(TerraError::NoItemsFound {
                collection: config.collection.to_string(),
                area: request.area.to_string(),
            });
        }
        let desired = resolve_desired_assets(&config.assets, &items)?;
        Ok((items, desired))
    }
}

/// The literal asset list `["all"]` expands to every asset the first remote
/// item advertises; otherwise the desired keys must intersect the remote
/// asset map.
fn resolve_desired_assets(
    desired: &[AssetKey],
    items: &[RemoteItem],
) -> Result<Vec<AssetKey>, TerraError> {
    let first = &items[0];
    if desired.len() == 1 && desired[0].as_str() == "all" {
        return Ok(first.asset_keys());
    }
    if !desired
        .iter()
        .any(|asset| first.assets.contains_key(asset.as_str()))
    {
        let wanted = desired
            .iter()
            .map(|asset| asset.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(TerraError::AssetNotInItem {
            asset: wanted,
            item: first.scene_id.to_string(),
        });
    }
    Ok(desired.to_vec())
}

fn planned_item(work: &WorkItem) -> PlannedItem {
    PlannedItem {
        item_key: work.item_key().to_string(),
        scene: work.remote.scene_id.to_string(),
        needed: work.needed.iter().map(|key| key.to_string()).collect(),
    }
}

fn area_plan_error(request: &AreaRequest, err: &TerraError) -> AreaPlan {
    AreaPlan {
        area: request.area.to_string(),
        error: Some(err.to_string()),
        matched: 0,
        items: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;
    use crate::config::ConfigLoader;
    use crate::domain::{BoundingBox, RemoteAsset};
    use crate::index::DisabledIndex;
    use crate::storage::LocalStorage;
    use crate::transfer::TransferMode;

    struct NoopSink;

    impl ProgressSink for NoopSink {
        fn event(&self, _event: ProgressEvent) {}
    }

    struct AreaBoundSearch;

    impl SearchClient for AreaBoundSearch {
        fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<RemoteItem>, TerraError> {
            // The eastern test area has no coverage.
            if query.bbox.min_lon() > 50.0 {
                return Ok(Vec::new());
            }
            let mut assets = BTreeMap::new();
            for band in ["red", "green"] {
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

    struct WritingTransfer;

    impl AssetTransfer for WritingTransfer {
        fn transfer(
            &self,
            _href: &str,
            destination: &Utf8Path,
            _mode: TransferMode,
            _bbox: &BoundingBox,
            _cancel: &CancelToken,
        ) -> Result<Utf8PathBuf, TerraError> {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent.as_std_path()).unwrap();
            }
            std::fs::write(destination.as_std_path(), b"raster").unwrap();
            Ok(destination.to_owned())
        }
    }

    fn test_config(root: &Utf8Path, areas: &[(&str, [f64; 4])]) -> ResolvedConfig {
        let config = crate::config::Config {
            collection: Some("sentinel-2-l2a".to_string()),
            assets: vec!["red".to_string(), "green".to_string()],
            areas: areas
                .iter()
                .map(|(name, bbox)| crate::config::AreaEntry {
                    name: name.to_string(),
                    bbox: *bbox,
                })
                .collect(),
            catalog_root: Some(root.join("catalog").to_string()),
            data_root: Some(root.join("raster").to_string()),
            ..crate::config::Config::default()
        };
        ConfigLoader::resolve_config(config).unwrap()
    }

    #[test]
    fn area_failure_does_not_abort_sibling_areas() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let config = test_config(
            &root,
            &[
                ("PortA", [10.0, 36.0, 10.5, 36.5]),
                ("PortFar", [60.0, 36.0, 60.5, 36.5]),
            ],
        );
        let store = CatalogStore::new(config.catalog_root.clone());
        let app = App::new(store, AreaBoundSearch, WritingTransfer, LocalStorage, DisabledIndex);

        let result = app.ingest(&config, &CancelToken::new(), &NoopSink).unwrap();
        assert_eq!(result.areas.len(), 2);
        assert!(result.areas[0].error.is_none());
        assert_eq!(result.areas[0].planned, 1);
        assert!(result.areas[1].error.as_deref().unwrap().contains("no items found"));
    }

    #[test]
    fn all_shorthand_expands_to_remote_assets() {
        let items = AreaBoundSearch
            .search(&SearchQuery {
                collection: &"sentinel-2-l2a".parse().unwrap(),
                bbox: &BoundingBox::new([10.0, 36.0, 10.5, 36.5]).unwrap(),
                datetime: &"2025-01-05T00:00:00Z/2025-08-05T00:00:00Z".parse().unwrap(),
                filters: None,
                max_items: 1,
            })
            .unwrap();
        let all: AssetKey = "all".parse().unwrap();
        let expanded = resolve_desired_assets(&[all], &items).unwrap();
        let expanded: Vec<&str> = expanded.iter().map(|key| key.as_str()).collect();
        assert_eq!(expanded, vec!["green", "red"]);

        let nir: AssetKey = "nir".parse().unwrap();
        let err = resolve_desired_assets(&[nir], &items).unwrap_err();
        assert!(matches!(err, TerraError::AssetNotInItem { .. }));
    }
}
