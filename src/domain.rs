use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TerraError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionId {
    type Err = TerraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.is_empty() || normalized.chars().any(|ch| "/\\ \t\n".contains(ch)) {
            return Err(TerraError::InvalidCollectionId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneId(String);

impl SceneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SceneId {
    type Err = TerraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.is_empty() || normalized.chars().any(|ch| "/\\ \t\n".contains(ch)) {
            return Err(TerraError::InvalidSceneId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AreaContext(String);

impl AreaContext {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn sanitized(&self) -> String {
        self.0
            .chars()
            .map(|ch| match ch {
                '/' | '\\' | ' ' => '_',
                other => other,
            })
            .collect()
    }
}

impl fmt::Display for AreaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AreaContext {
    type Err = TerraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.is_empty() {
            return Err(TerraError::InvalidAreaContext(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(scene: &SceneId, area: &AreaContext) -> Self {
        Self(format!("{}_{}", scene.as_str(), area.sanitized()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemKey {
    type Err = TerraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.is_empty() || normalized.chars().any(|ch| "/\\ \t\n".contains(ch)) {
            return Err(TerraError::InvalidItemKey(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey(String);

impl AssetKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssetKey {
    type Err = TerraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.is_empty() || normalized.chars().any(|ch| "/\\ \t\n".contains(ch)) {
            return Err(TerraError::InvalidAssetKey(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]")]
pub struct BoundingBox([f64; 4]);

impl BoundingBox {
    pub fn new(values: [f64; 4]) -> Result<Self, TerraError> {
        let [min_lon, min_lat, max_lon, max_lat] = values;
        let lon_range = -180.0..=180.0;
        let lat_range = -90.0..=90.0;
        if !lon_range.contains(&min_lon)
            || !lon_range.contains(&max_lon)
            || !lat_range.contains(&min_lat)
            || !lat_range.contains(&max_lat)
            || min_lon >= max_lon
            || min_lat >= max_lat
        {
            return Err(TerraError::InvalidBbox(format!("{values:?}")));
        }
        Ok(Self(values))
    }

    pub fn to_array(&self) -> [f64; 4] {
        self.0
    }

    pub fn min_lon(&self) -> f64 {
        self.0[0]
    }

    pub fn min_lat(&self) -> f64 {
        self.0[1]
    }

    pub fn max_lon(&self) -> f64 {
        self.0[2]
    }

    pub fn max_lat(&self) -> f64 {
        self.0[3]
    }
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = TerraError;

    fn try_from(values: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl FromStr for BoundingBox {
    type Err = TerraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = value
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| TerraError::InvalidBbox(value.to_string()))?;
        let values: [f64; 4] = parts
            .try_into()
            .map_err(|_| TerraError::InvalidBbox(value.to_string()))?;
        Self::new(values)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl Geometry {
    pub fn polygon(bbox: &BoundingBox) -> Self {
        let ring = vec![
            [bbox.min_lon(), bbox.min_lat()],
            [bbox.max_lon(), bbox.min_lat()],
            [bbox.max_lon(), bbox.max_lat()],
            [bbox.min_lon(), bbox.max_lat()],
            [bbox.min_lon(), bbox.min_lat()],
        ];
        Self {
            kind: "Polygon".to_string(),
            coordinates: vec![ring],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatetimeRange(String);

impl DatetimeRange {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatetimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatetimeRange {
    type Err = TerraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let valid = match normalized.split_once('/') {
            Some((start, end)) => is_instant_or_open(start) && is_instant_or_open(end),
            None => is_instant(&normalized),
        };
        if !valid {
            return Err(TerraError::InvalidDatetimeRange(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

fn is_instant(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
}

fn is_instant_or_open(value: &str) -> bool {
    value == ".." || is_instant(value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAsset {
    pub href: String,
    pub alternate_href: Option<String>,
    pub media_type: Option<String>,
    pub title: Option<String>,
}

impl RemoteAsset {
    pub fn fetchable_href(&self) -> Option<&str> {
        if self.href.starts_with("http") {
            return Some(&self.href);
        }
        if let Some(alternate) = &self.alternate_href {
            if alternate.starts_with("http") {
                return Some(alternate);
            }
        }
        if self.href.starts_with("s3://") {
            return Some(&self.href);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    pub scene_id: SceneId,
    pub geometry: Option<Geometry>,
    pub bbox: Option<BoundingBox>,
    pub datetime: Option<DateTime<Utc>>,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub assets: BTreeMap<String, RemoteAsset>,
}

impl RemoteItem {
    pub fn asset(&self, key: &AssetKey) -> Option<&RemoteAsset> {
        self.assets.get(key.as_str())
    }

    pub fn asset_keys(&self) -> Vec<AssetKey> {
        self.assets
            .keys()
            .filter_map(|key| key.parse().ok())
            .collect()
    }
}
