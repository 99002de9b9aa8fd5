use crate::catalog::CatalogStore;
use crate::domain::{AreaContext, AssetKey, BoundingBox, CollectionId, ItemKey, RemoteItem};

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub area: AreaContext,
    pub bbox: BoundingBox,
    pub remote: RemoteItem,
    pub needed: Vec<AssetKey>,
}

impl WorkItem {
    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(&self.remote.scene_id, &self.area)
    }
}

/// Compare remote search results against persisted catalog state and produce
/// the worklist. Pure with respect to the store: given the same on-disk state
/// and the same remote list, the output sequence is identical, so a pipeline
/// can safely re-run the plan after a partial failure. Items that already
/// hold every desired asset are skipped entirely; items with a partial asset
/// map get only the missing keys.
pub fn plan(
    store: &CatalogStore,
    collection: &CollectionId,
    desired: &[AssetKey],
    area: &AreaContext,
    bbox: &BoundingBox,
    remote_items: &[RemoteItem],
) -> Vec<WorkItem> {
    let mut work = Vec::new();
    for remote in remote_items {
        let key = ItemKey::new(&remote.scene_id, area);
        match store.find_item(collection, &key, &remote.scene_id) {
            None => {
                tracing::info!(item = %key, area = %area, "item is new");
                work.push(WorkItem {
                    area: area.clone(),
                    bbox: *bbox,
                    remote: remote.clone(),
                    needed: desired.to_vec(),
                });
            }
            Some(existing) => {
                let present = CatalogStore::asset_keys(&existing);
                let missing: Vec<AssetKey> = desired
                    .iter()
                    .filter(|asset| !present.contains(*asset))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    tracing::info!(item = %key, area = %area, "all assets present, skipping");
                    continue;
                }
                tracing::info!(
                    item = %key,
                    area = %area,
                    missing = missing.len(),
                    "item exists with missing assets"
                );
                work.push(WorkItem {
                    area: area.clone(),
                    bbox: *bbox,
                    remote: remote.clone(),
                    needed: missing,
                });
            }
        }
    }
    work
}
