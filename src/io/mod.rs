//! Storage, provider and file-format I/O

pub mod archive;
pub mod copernicus;
pub mod layout;
pub mod provider;
pub mod raster;
pub mod store;

pub use archive::{extract_archive, ArchiveExtractor, ExtractionReport};
pub use copernicus::CopernicusProvider;
pub use layout::{FlatLayout, LayoutRegistry, ProductLayout, SafeGranuleLayout, SafeMeasurementLayout};
pub use provider::{ProductMetadata, Provider, SearchRequest};
#[cfg(feature = "gdal")]
pub use raster::GdalRasterEngine;
pub use raster::{RasterEngine, RasterInfo};
pub use store::{StoreSummary, TileStore};
