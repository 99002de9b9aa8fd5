use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{AreaContext, AssetKey, BoundingBox, CollectionId, DatetimeRange};
use crate::error::TerraError;
use crate::transfer::TransferMode;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub datetime_range: Option<String>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub areas: Vec<AreaEntry>,
    #[serde(default)]
    pub catalog_root: Option<String>,
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub endpoints: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub index_url: Option<String>,
    #[serde(default)]
    pub filters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub transfer_mode: Option<TransferMode>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AreaEntry {
    pub name: String,
    pub bbox: [f64; 4],
}

#[derive(Debug, Clone)]
pub struct AreaRequest {
    pub area: AreaContext,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub collection: CollectionId,
    pub assets: Vec<AssetKey>,
    pub datetime: DatetimeRange,
    pub max_items: usize,
    pub areas: Vec<AreaRequest>,
    pub catalog_root: Utf8PathBuf,
    pub data_root: Utf8PathBuf,
    pub endpoints: BTreeMap<String, String>,
    pub index_url: Option<String>,
    pub filters: Option<serde_json::Map<String, serde_json::Value>>,
    pub mode: TransferMode,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: Option<&str>) -> Result<Config, TerraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("terra-im.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(TerraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TerraError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| TerraError::ConfigParse(err.to_string()))
    }

    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TerraError> {
        Self::resolve_config(Self::load(path)?)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TerraError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let collection = config
            .collection
            .ok_or_else(|| TerraError::ConfigParse("collection is required".to_string()))?
            .parse()?;

        let assets = if config.assets.is_empty() {
            default_assets()
        } else {
            config.assets
        }
        .iter()
        .map(|value| value.parse())
        .collect::<Result<Vec<AssetKey>, TerraError>>()?;

        let datetime = config
            .datetime_range
            .unwrap_or_else(default_datetime_range)
            .parse()?;

        let areas = config
            .areas
            .into_iter()
            .map(|entry| {
                Ok(AreaRequest {
                    area: entry.name.parse()?,
                    bbox: BoundingBox::new(entry.bbox)?,
                })
            })
            .collect::<Result<Vec<_>, TerraError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            collection,
            assets,
            datetime,
            max_items: config.max_items.unwrap_or(10),
            areas,
            catalog_root: Utf8PathBuf::from(
                config
                    .catalog_root
                    .unwrap_or_else(|| "./metadata/catalog".to_string()),
            ),
            data_root: Utf8PathBuf::from(
                config
                    .data_root
                    .unwrap_or_else(|| "./output_data/raster".to_string()),
            ),
            endpoints: config.endpoints.unwrap_or_else(default_endpoints),
            index_url: config.index_url,
            filters: config.filters,
            mode: config.transfer_mode.unwrap_or(TransferMode::Clip),
        })
    }
}

pub fn default_assets() -> Vec<String> {
    vec!["green".to_string(), "red".to_string(), "blue".to_string()]
}

pub fn default_datetime_range() -> String {
    "2025-01-05T00:00:00Z/2025-08-05T00:00:00Z".to_string()
}

pub fn default_endpoints() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "sentinel".to_string(),
            "https://earth-search.aws.element84.com/v1".to_string(),
        ),
        (
            "landsat".to_string(),
            "https://planetarycomputer.microsoft.com/api/stac/v1".to_string(),
        ),
    ])
}

pub fn endpoint_for_collection(
    collection: &CollectionId,
    endpoints: &BTreeMap<String, String>,
) -> Result<String, TerraError> {
    for (prefix, endpoint) in endpoints {
        if collection.as_str().contains(prefix.as_str()) {
            return Ok(endpoint.clone());
        }
    }
    Err(TerraError::UnknownCollection(collection.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn resolve_config_applies_defaults() {
        let config = Config {
            collection: Some("sentinel-2-l2a".to_string()),
            areas: vec![AreaEntry {
                name: "PortA".to_string(),
                bbox: [10.0, 36.0, 10.5, 36.5],
            }],
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.collection.as_str(), "sentinel-2-l2a");
        assert_eq!(resolved.assets.len(), 3);
        assert_eq!(resolved.max_items, 10);
        assert_eq!(resolved.mode, TransferMode::Clip);
        assert_eq!(resolved.catalog_root.as_str(), "./metadata/catalog");
        assert!(resolved.index_url.is_none());
        assert_eq!(resolved.areas.len(), 1);
    }

    #[test]
    fn resolve_config_requires_collection() {
        let err = ConfigLoader::resolve_config(Config::default()).unwrap_err();
        assert_matches!(err, TerraError::ConfigParse(_));
    }

    #[test]
    fn resolve_config_rejects_bad_area_bbox() {
        let config = Config {
            collection: Some("sentinel-2-l2a".to_string()),
            areas: vec![AreaEntry {
                name: "PortA".to_string(),
                bbox: [10.5, 36.0, 10.0, 36.5],
            }],
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, TerraError::InvalidBbox(_));
    }

    #[test]
    fn endpoint_routing_matches_by_prefix() {
        let endpoints = default_endpoints();
        let sentinel: CollectionId = "sentinel-2-l2a".parse().unwrap();
        let endpoint = endpoint_for_collection(&sentinel, &endpoints).unwrap();
        assert!(endpoint.contains("earth-search"));

        let unknown: CollectionId = "modis-061".parse().unwrap();
        let err = endpoint_for_collection(&unknown, &endpoints).unwrap_err();
        assert_matches!(err, TerraError::UnknownCollection(_));
    }
}
