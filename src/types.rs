use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Row id of a tile in the state store
pub type TileId = i64;

/// Row id of a point of interest in the state store
pub type PoiId = i64;

/// Imaging platforms the pipeline knows how to name, unpack and crop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Sentinel1,
    Sentinel2,
    Landsat8,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Sentinel1, Platform::Sentinel2, Platform::Landsat8];

    /// Stable identifier used in the state store and in output paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Sentinel1 => "Sentinel-1",
            Platform::Sentinel2 => "Sentinel-2",
            Platform::Landsat8 => "Landsat-8",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "sentinel1" | "s1" => Ok(Platform::Sentinel1),
            "sentinel2" | "s2" => Ok(Platform::Sentinel2),
            "landsat8" | "l8" => Ok(Platform::Landsat8),
            _ => Err(PipelineError::InvalidRequest(format!("Unknown platform: {}", s))),
        }
    }
}

/// Geographic coordinate on the WGS84 ellipsoid, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Provider-side search filters, one closed family per platform
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ProviderFilters {
    #[default]
    None,
    Sentinel1 {
        product_type: Option<String>,    // GRD, SLC, ...
        sensor_mode: Option<String>,     // IW, EW, SM, WV
        polarisation: Option<String>,    // VV, VV&VH, ...
    },
    Sentinel2 {
        product_type: Option<String>,    // S2MSI1C, S2MSI2A
        max_cloud_cover: Option<f64>,    // percent
    },
    Landsat8 {
        product_type: Option<String>,    // L1TP, L2SP, ...
        max_cloud_cover: Option<f64>,    // percent
    },
}

impl ProviderFilters {
    /// Check the filter family against the requested platform and value ranges
    pub fn validate(&self, platform: Platform) -> PipelineResult<()> {
        let (family_platform, cloud) = match self {
            ProviderFilters::None => return Ok(()),
            ProviderFilters::Sentinel1 { .. } => (Platform::Sentinel1, None),
            ProviderFilters::Sentinel2 { max_cloud_cover, .. } => (Platform::Sentinel2, *max_cloud_cover),
            ProviderFilters::Landsat8 { max_cloud_cover, .. } => (Platform::Landsat8, *max_cloud_cover),
        };

        if family_platform != platform {
            return Err(PipelineError::InvalidRequest(format!(
                "{} filters cannot be used for a {} request",
                family_platform, platform
            )));
        }

        if let Some(cloud) = cloud {
            if !(0.0..=100.0).contains(&cloud) {
                return Err(PipelineError::InvalidRequest(format!(
                    "Cloud cover must be within 0..=100, got {}",
                    cloud
                )));
            }
        }

        Ok(())
    }

    /// Canonical text form, part of the POI identity
    pub fn canonical(&self) -> PipelineResult<String> {
        serde_json::to_string(self).map_err(|e| PipelineError::Serialization(e.to_string()))
    }

    pub fn from_canonical(text: &str) -> PipelineResult<Self> {
        serde_json::from_str(text).map_err(|e| PipelineError::Serialization(e.to_string()))
    }
}

/// Identity tuple of a point of interest; equal queries resolve to the same POI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiQuery {
    pub center: GeoPoint,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub platform: Platform,
    pub width_m: f64,
    pub height_m: f64,
    pub filters: ProviderFilters,
    /// Country or region label; not part of the identity
    pub country: Option<String>,
}

impl PoiQuery {
    pub fn validate(&self) -> PipelineResult<()> {
        let GeoPoint { lat, lon } = self.center;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(PipelineError::InvalidRequest(format!(
                "Coordinates out of range: lat={}, lon={}",
                lat, lon
            )));
        }
        if !(self.width_m > 0.0 && self.height_m > 0.0) || !self.width_m.is_finite() || !self.height_m.is_finite() {
            return Err(PipelineError::InvalidRequest(format!(
                "Footprint must be positive, got {}x{} m",
                self.width_m, self.height_m
            )));
        }
        if self.date_from > self.date_to {
            return Err(PipelineError::InvalidRequest(format!(
                "Date range is reversed: {} > {}",
                self.date_from, self.date_to
            )));
        }
        self.filters.validate(self.platform)
    }
}

/// One provider-delivered product, tracked through download and extraction
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub id: TileId,
    pub platform: Platform,
    pub product_id: String,
    pub folder_name: String,
    pub download_requested_at: Option<DateTime<Utc>>,
    pub download_completed_at: Option<DateTime<Utc>>,
    pub unzipped_at: Option<DateTime<Utc>>,
}

impl Tile {
    pub fn is_downloaded(&self) -> bool {
        self.download_completed_at.is_some()
    }

    pub fn is_unzipped(&self) -> bool {
        self.unzipped_at.is_some()
    }
}

/// A stored point of interest
#[derive(Debug, Clone, PartialEq)]
pub struct Poi {
    pub id: PoiId,
    pub query: PoiQuery,
    pub identified_at: Option<DateTime<Utc>>,
}

/// Tile linked to a POI, with the per-pair crop state
#[derive(Debug, Clone, PartialEq)]
pub struct TilePoi {
    pub poi_id: PoiId,
    pub tile: Tile,
    pub cropped_at: Option<DateTime<Utc>>,
}

/// Error types for the acquisition and cropping pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Download of {product_id} failed: {message}")]
    Download { product_id: String, message: String },

    #[error("Extraction of {} failed: {message}", .path.display())]
    Extraction { path: PathBuf, message: String },

    #[error("Crop of {} failed: {message}", .path.display())]
    Crop { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    pub fn tile_not_found(id: impl ToString) -> Self {
        PipelineError::NotFound { entity: "Tile", id: id.to_string() }
    }

    pub fn poi_not_found(id: impl ToString) -> Self {
        PipelineError::NotFound { entity: "POI", id: id.to_string() }
    }

    pub fn crop(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PipelineError::Crop { path: path.into(), message: message.into() }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
