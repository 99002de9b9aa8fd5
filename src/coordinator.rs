use camino::Utf8PathBuf;
use serde::Serialize;

use crate::catalog::{CatalogStore, ItemDoc};
use crate::domain::{AreaContext, AssetKey, CollectionId, ItemKey, SceneId};
use crate::error::TerraError;
use crate::index::{self, IndexSync};
use crate::reconcile::WorkItem;
use crate::storage::BlobStorage;
use crate::transfer::{AssetTransfer, CancelToken, TransferMode, band_basename};

#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub area: AreaContext,
    pub scene: SceneId,
    pub succeeded: Vec<SucceededAsset>,
    pub failed: Vec<FailedAsset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SucceededAsset {
    pub key: AssetKey,
    pub location: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedAsset {
    pub key: AssetKey,
    pub reason: String,
}

pub struct DownloadCoordinator<'a, T: AssetTransfer, B: BlobStorage, I: IndexSync> {
    store: &'a CatalogStore,
    transfer: &'a T,
    storage: &'a B,
    index: &'a I,
    data_root: Utf8PathBuf,
    mode: TransferMode,
}

impl<'a, T: AssetTransfer, B: BlobStorage, I: IndexSync> DownloadCoordinator<'a, T, B, I> {
    pub fn new(
        store: &'a CatalogStore,
        transfer: &'a T,
        storage: &'a B,
        index: &'a I,
        data_root: Utf8PathBuf,
        mode: TransferMode,
    ) -> Self {
        Self {
            store,
            transfer,
            storage,
            index,
            data_root,
            mode,
        }
    }

    /// Drain one WorkItem. Each needed asset is transferred, persisted, and
    /// merged independently; a failure is recorded in the outcome and the
    /// remaining assets keep going. The succeeded list holds exactly the
    /// assets that were durably merged into the catalog.
    pub fn execute(
        &self,
        collection: &CollectionId,
        work: &WorkItem,
        cancel: &CancelToken,
    ) -> DownloadOutcome {
        let key = work.item_key();
        let mut outcome = DownloadOutcome {
            area: work.area.clone(),
            scene: work.remote.scene_id.clone(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for asset in &work.needed {
            if cancel.is_cancelled() {
                tracing::info!(item = %key, "cancelled, abandoning remaining assets");
                break;
            }
            match self.ingest_asset(collection, work, &key, asset, cancel) {
                Ok((doc, location)) => {
                    outcome.succeeded.push(SucceededAsset {
                        key: asset.clone(),
                        location: location.to_string(),
                    });
                    index::try_publish_item(self.index, &doc);
                }
                Err(err) => {
                    tracing::warn!(
                        collection = %collection,
                        item = %key,
                        asset = %asset,
                        error = %err,
                        "asset ingestion failed"
                    );
                    outcome.failed.push(FailedAsset {
                        key: asset.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        outcome
    }

    fn ingest_asset(
        &self,
        collection: &CollectionId,
        work: &WorkItem,
        key: &ItemKey,
        asset: &AssetKey,
        cancel: &CancelToken,
    ) -> Result<(ItemDoc, Utf8PathBuf), TerraError> {
        let remote_asset = work
            .remote
            .asset(asset)
            .ok_or_else(|| TerraError::AssetNotInItem {
                asset: asset.to_string(),
                item: work.remote.scene_id.to_string(),
            })?;
        let href = remote_asset
            .fetchable_href()
            .ok_or_else(|| TerraError::AssetHrefMissing {
                asset: asset.to_string(),
                item: work.remote.scene_id.to_string(),
            })?;

        let destination = self
            .data_root
            .join(format!("{key}_{}.tif", band_basename(href)));
        let fetched = self
            .transfer
            .transfer(href, &destination, self.mode, &work.bbox, cancel)?;
        let stored = self.storage.persist(&fetched, &fetched)?;

        if cancel.is_cancelled() {
            return Err(TerraError::Cancelled);
        }
        let doc = self.store.merge_asset(
            collection,
            key,
            &work.remote,
            &work.area,
            &work.bbox,
            asset,
            &stored,
        )?;
        Ok((doc, stored))
    }
}
