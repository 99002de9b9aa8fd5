use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AreaContext, AssetKey, BoundingBox, CollectionId, Geometry, ItemKey, RemoteItem, SceneId,
};
use crate::error::TerraError;
use crate::lock::PathLock;

pub const GEOTIFF_MEDIA_TYPE: &str = "image/tiff; application=geotiff";
pub const AREA_CONTEXT_PROPERTY: &str = "area_context";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDoc {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDoc {
    pub id: String,
    pub title: String,
    pub description: String,
    pub license: String,
    pub extent: ExtentDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtentDoc {
    pub spatial: SpatialExtentDoc,
    pub temporal: TemporalExtentDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialExtentDoc {
    pub bbox: Vec<[f64; 4]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalExtentDoc {
    pub interval: Vec<[Option<String>; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDoc {
    pub id: String,
    pub geometry: Geometry,
    pub bbox: [f64; 4],
    pub datetime: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub collection: String,
    pub assets: BTreeMap<String, AssetDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDoc {
    pub href: String,
    pub media_type: String,
    pub roles: Vec<String>,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct CatalogStore {
    root: Utf8PathBuf,
}

impl CatalogStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn catalog_path(&self) -> Utf8PathBuf {
        self.root.join("catalog.json")
    }

    pub fn collection_dir(&self, collection: &CollectionId) -> Utf8PathBuf {
        self.root.join("collections").join(collection.as_str())
    }

    pub fn collection_path(&self, collection: &CollectionId) -> Utf8PathBuf {
        self.collection_dir(collection).join("collection.json")
    }

    pub fn item_dir(&self, collection: &CollectionId, key: &ItemKey) -> Utf8PathBuf {
        self.collection_dir(collection).join(key.as_str())
    }

    pub fn item_path(&self, collection: &CollectionId, key: &ItemKey) -> Utf8PathBuf {
        self.item_dir(collection, key)
            .join(format!("{}.json", key.as_str()))
    }

    pub fn load_or_create_catalog(&self) -> Result<CatalogDoc, TerraError> {
        let _lock = PathLock::acquire(&self.root)?;
        let path = self.catalog_path();
        if path.as_std_path().exists() {
            return read_json(&path);
        }
        let doc = CatalogDoc {
            id: "terra-catalog".to_string(),
            title: "Terra Data Platform Catalog".to_string(),
            description: "Root catalog for the Terra imagery data platform".to_string(),
        };
        write_json_atomic(&path, &doc)?;
        tracing::info!(path = %path, "created catalog");
        Ok(doc)
    }

    pub fn ensure_collection(&self, collection: &CollectionId) -> Result<CollectionDoc, TerraError> {
        let dir = self.collection_dir(collection);
        let _lock = PathLock::acquire(&dir)?;
        let path = self.collection_path(collection);
        if path.as_std_path().exists() {
            return read_json(&path);
        }
        let doc = default_collection(collection);
        write_json_atomic(&path, &doc)?;
        tracing::info!(collection = %collection, "created collection");
        Ok(doc)
    }

    /// Read-modify-write of the full item document under the item lock.
    /// Adding an already-present asset key is the no-op success path; the
    /// asset map only grows.
    #[allow(clippy::too_many_arguments)]
    pub fn merge_asset(
        &self,
        collection: &CollectionId,
        key: &ItemKey,
        remote: &RemoteItem,
        area: &AreaContext,
        bbox: &BoundingBox,
        asset: &AssetKey,
        location: &Utf8Path,
    ) -> Result<ItemDoc, TerraError> {
        let dir = self.item_dir(collection, key);
        let _lock = PathLock::acquire(&dir)?;
        let path = self.item_path(collection, key);

        let mut doc = if path.as_std_path().exists() {
            read_json(&path)?
        } else {
            new_item_doc(collection, remote, area, bbox)
        };

        if !doc.assets.contains_key(asset.as_str()) {
            doc.assets.insert(
                asset.as_str().to_string(),
                AssetDoc {
                    href: location.to_string(),
                    media_type: remote
                        .asset(asset)
                        .and_then(|remote_asset| remote_asset.media_type.clone())
                        .unwrap_or_else(|| GEOTIFF_MEDIA_TYPE.to_string()),
                    roles: vec!["data".to_string()],
                    title: band_title(asset),
                },
            );
            tracing::debug!(item = %key, asset = %asset, "asset merged");
        } else {
            tracing::debug!(item = %key, asset = %asset, "asset already present, skipping");
        }

        write_json_atomic(&path, &doc)?;
        Ok(doc)
    }

    /// Key-addressed existence probe. Missing, unreadable, or scene-mismatched
    /// records all read as absent; the reconciler then treats the remote item
    /// as new.
    pub fn find_item(
        &self,
        collection: &CollectionId,
        key: &ItemKey,
        scene: &SceneId,
    ) -> Option<ItemDoc> {
        let path = self.item_path(collection, key);
        let content = fs::read_to_string(path.as_std_path()).ok()?;
        let doc: ItemDoc = serde_json::from_str(&content).ok()?;
        (doc.id == scene.as_str()).then_some(doc)
    }

    pub fn asset_keys(item: &ItemDoc) -> BTreeSet<AssetKey> {
        item.assets.keys().filter_map(|key| key.parse().ok()).collect()
    }

    pub fn load_item(
        &self,
        collection: &CollectionId,
        key: &ItemKey,
    ) -> Result<Option<ItemDoc>, TerraError> {
        let path = self.item_path(collection, key);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn list_items(
        &self,
        collection: &CollectionId,
    ) -> Result<Vec<(ItemKey, ItemDoc)>, TerraError> {
        let dir = self.collection_dir(collection);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut items = Vec::new();
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| TerraError::StoreIo(format!("read {dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| TerraError::StoreIo(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(|name| name.parse::<ItemKey>().ok()) else {
                continue;
            };
            let item_path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|_| TerraError::StoreIo("non-utf8 item directory".to_string()))?
                .join(format!("{}.json", key.as_str()));
            if !item_path.as_std_path().exists() {
                continue;
            }
            let doc = read_json::<ItemDoc>(&item_path)?;
            items.push((key, doc));
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items)
    }
}

fn default_collection(collection: &CollectionId) -> CollectionDoc {
    CollectionDoc {
        id: collection.as_str().to_string(),
        title: format!("Terra Collection {collection}"),
        description: format!("Collection {collection} for the Terra data platform"),
        license: "proprietary".to_string(),
        extent: ExtentDoc {
            spatial: SpatialExtentDoc {
                bbox: vec![[-180.0, -90.0, 180.0, 90.0]],
            },
            temporal: TemporalExtentDoc {
                interval: vec![[None, None]],
            },
        },
    }
}

fn new_item_doc(
    collection: &CollectionId,
    remote: &RemoteItem,
    area: &AreaContext,
    bbox: &BoundingBox,
) -> ItemDoc {
    let geometry = remote
        .geometry
        .clone()
        .unwrap_or_else(|| Geometry::polygon(bbox));
    let datetime = remote
        .datetime
        .map(|value| value.to_rfc3339())
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    let mut properties = remote.properties.clone();
    properties.insert(
        AREA_CONTEXT_PROPERTY.to_string(),
        serde_json::Value::String(area.as_str().to_string()),
    );
    ItemDoc {
        id: remote.scene_id.as_str().to_string(),
        geometry,
        bbox: bbox.to_array(),
        datetime,
        properties,
        collection: collection.as_str().to_string(),
        assets: BTreeMap::new(),
    }
}

fn band_title(asset: &AssetKey) -> String {
    let mut chars = asset.as_str().chars();
    match chars.next() {
        Some(first) => format!("{}{} Band", first.to_uppercase(), chars.as_str()),
        None => "Band".to_string(),
    }
}

fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), TerraError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| TerraError::StoreIo(format!("create {parent}: {err}")))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| TerraError::StoreIo(err.to_string()))?;
    fs::write(tmp_path.as_std_path(), &content)
        .map_err(|err| TerraError::StoreIo(format!("write {tmp_path}: {err}")))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| TerraError::StoreIo(format!("rename {tmp_path}: {err}")))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, TerraError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| TerraError::StoreIo(format!("read {path}: {err}")))?;
    serde_json::from_str(&content)
        .map_err(|err| TerraError::StoreIo(format!("parse {path}: {err}")))
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::{AreaContext, BoundingBox, RemoteItem, SceneId};

    fn test_remote(scene: &str) -> RemoteItem {
        RemoteItem {
            scene_id: scene.parse().unwrap(),
            geometry: None,
            bbox: None,
            datetime: None,
            properties: serde_json::Map::new(),
            assets: BTreeMap::new(),
        }
    }

    fn test_store() -> (tempfile::TempDir, CatalogStore) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("catalog")).unwrap();
        (temp, CatalogStore::new(root))
    }

    #[test]
    fn ensure_collection_is_idempotent() {
        let (_temp, store) = test_store();
        let collection: CollectionId = "sentinel-2-l2a".parse().unwrap();

        let first = store.ensure_collection(&collection).unwrap();
        let second = store.ensure_collection(&collection).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.extent.spatial.bbox, vec![[-180.0, -90.0, 180.0, 90.0]]);
    }

    #[test]
    fn merge_asset_is_idempotent() {
        let (_temp, store) = test_store();
        let collection: CollectionId = "sentinel-2-l2a".parse().unwrap();
        let scene: SceneId = "S1_20250101".parse().unwrap();
        let area: AreaContext = "PortA".parse().unwrap();
        let key = ItemKey::new(&scene, &area);
        let bbox = BoundingBox::new([10.0, 36.0, 10.5, 36.5]).unwrap();
        let remote = test_remote("S1_20250101");
        let red: AssetKey = "red".parse().unwrap();
        let location = Utf8PathBuf::from("/data/S1_20250101_PortA_B04.tif");

        let first = store
            .merge_asset(&collection, &key, &remote, &area, &bbox, &red, &location)
            .unwrap();
        let second = store
            .merge_asset(&collection, &key, &remote, &area, &bbox, &red, &location)
            .unwrap();
        assert_eq!(first.assets, second.assets);
        assert_eq!(second.assets.len(), 1);
    }

    #[test]
    fn merge_asset_preserves_existing_assets() {
        let (_temp, store) = test_store();
        let collection: CollectionId = "sentinel-2-l2a".parse().unwrap();
        let scene: SceneId = "S1_20250101".parse().unwrap();
        let area: AreaContext = "PortA".parse().unwrap();
        let key = ItemKey::new(&scene, &area);
        let bbox = BoundingBox::new([10.0, 36.0, 10.5, 36.5]).unwrap();
        let remote = test_remote("S1_20250101");

        let red: AssetKey = "red".parse().unwrap();
        let green: AssetKey = "green".parse().unwrap();
        let doc = store
            .merge_asset(
                &collection,
                &key,
                &remote,
                &area,
                &bbox,
                &red,
                &Utf8PathBuf::from("/data/red.tif"),
            )
            .unwrap();
        let red_doc = doc.assets.get("red").cloned().unwrap();

        let doc = store
            .merge_asset(
                &collection,
                &key,
                &remote,
                &area,
                &bbox,
                &green,
                &Utf8PathBuf::from("/data/green.tif"),
            )
            .unwrap();
        assert_eq!(doc.assets.len(), 2);
        assert_eq!(doc.assets.get("red"), Some(&red_doc));
        assert_eq!(doc.assets.get("green").unwrap().href, "/data/green.tif");
    }

    #[test]
    fn find_item_requires_matching_scene() {
        let (_temp, store) = test_store();
        let collection: CollectionId = "sentinel-2-l2a".parse().unwrap();
        let scene: SceneId = "S1_20250101".parse().unwrap();
        let area: AreaContext = "PortA".parse().unwrap();
        let key = ItemKey::new(&scene, &area);
        let bbox = BoundingBox::new([10.0, 36.0, 10.5, 36.5]).unwrap();
        let remote = test_remote("S1_20250101");
        let red: AssetKey = "red".parse().unwrap();

        assert!(store.find_item(&collection, &key, &scene).is_none());

        store
            .merge_asset(
                &collection,
                &key,
                &remote,
                &area,
                &bbox,
                &red,
                &Utf8PathBuf::from("/data/red.tif"),
            )
            .unwrap();

        assert!(store.find_item(&collection, &key, &scene).is_some());
        let other: SceneId = "S2_20250101".parse().unwrap();
        assert!(store.find_item(&collection, &key, &other).is_none());
    }

    #[test]
    fn item_doc_carries_area_context() {
        let (_temp, store) = test_store();
        let collection: CollectionId = "sentinel-2-l2a".parse().unwrap();
        let scene: SceneId = "S1_20250101".parse().unwrap();
        let area: AreaContext = "PortA".parse().unwrap();
        let key = ItemKey::new(&scene, &area);
        let bbox = BoundingBox::new([10.0, 36.0, 10.5, 36.5]).unwrap();
        let remote = test_remote("S1_20250101");
        let red: AssetKey = "red".parse().unwrap();

        let doc = store
            .merge_asset(
                &collection,
                &key,
                &remote,
                &area,
                &bbox,
                &red,
                &Utf8PathBuf::from("/data/red.tif"),
            )
            .unwrap();
        assert_eq!(
            doc.properties.get(AREA_CONTEXT_PROPERTY),
            Some(&serde_json::Value::String("PortA".to_string()))
        );
        assert_eq!(doc.collection, "sentinel-2-l2a");
        assert_eq!(doc.bbox, [10.0, 36.0, 10.5, 36.5]);
    }
}
