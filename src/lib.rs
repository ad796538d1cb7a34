//! satcrop: resumable satellite tile acquisition and cropping
//!
//! Acquires imagery tiles covering a point of interest from an imagery
//! provider, tracks download, extraction and crop progress in a SQLite store
//! so every stage can be interrupted and resumed, and crops each raster to
//! the POI footprint using a geodesic bounding box.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    GeoPoint, PipelineError, PipelineResult, Platform, Poi, PoiId, PoiQuery, ProviderFilters, Tile, TileId, TilePoi,
};

pub use config::{CopernicusConfig, PipelineConfig};
pub use core::{AcquisitionRequest, CropEngine, Orchestrator};
pub use io::{ArchiveExtractor, LayoutRegistry, Provider, RasterEngine, TileStore};
