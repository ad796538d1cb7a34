//! Scripted provider and raster engine shared by the integration tests

#![allow(dead_code)]

use chrono::NaiveDate;
use satcrop::core::geometry::PixelWindow;
use satcrop::core::AcquisitionRequest;
use satcrop::io::{ProductMetadata, Provider, RasterEngine, RasterInfo, SearchRequest};
use satcrop::{GeoPoint, PipelineError, PipelineResult, Platform, PoiQuery, ProviderFilters};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn title(index: usize) -> String {
    format!("S1A_IW_GRDH_1SDV_2022010{}T051234_TEST", index)
}

/// Zip of a Sentinel-1 SAFE product with one measurement raster
pub fn write_safe_archive(path: &Path, title: &str) {
    let mut writer = zip::ZipWriter::new(File::create(path).expect("Failed to create archive"));
    let folder = format!("{}.SAFE", title);
    writer.start_file(format!("{}/manifest.safe", folder), FileOptions::default()).unwrap();
    writer.write_all(b"<xfdu/>").unwrap();
    writer
        .start_file(format!("{}/measurement/{}-vv.tiff", folder, title.to_lowercase()), FileOptions::default())
        .unwrap();
    writer.write_all(b"II*\0").unwrap();
    writer.finish().unwrap();
}

/// Provider returning a fixed product list and writing SAFE archives on fetch
pub struct FakeProvider {
    pub products: Vec<ProductMetadata>,
    pub fetches: RefCell<HashMap<String, usize>>,
    pub failing: RefCell<HashSet<String>>,
    pub corrupt: RefCell<HashSet<String>>,
    pub searches: RefCell<Vec<SearchRequest>>,
}

impl FakeProvider {
    pub fn with_products(count: usize) -> Self {
        Self {
            products: (0..count)
                .map(|i| ProductMetadata::new(format!("uuid-{}", i), title(i), Platform::Sentinel1))
                .collect(),
            fetches: RefCell::new(HashMap::new()),
            failing: RefCell::new(HashSet::new()),
            corrupt: RefCell::new(HashSet::new()),
            searches: RefCell::new(Vec::new()),
        }
    }

    pub fn fetch_count(&self, product_id: &str) -> usize {
        self.fetches.borrow().get(product_id).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.borrow().values().sum()
    }
}

impl Provider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn search(&self, request: &SearchRequest) -> PipelineResult<Vec<ProductMetadata>> {
        self.searches.borrow_mut().push(request.clone());
        Ok(self.products.clone())
    }

    fn fetch(&self, product: &ProductMetadata, download_dir: &Path, archive_name: &str) -> PipelineResult<PathBuf> {
        *self.fetches.borrow_mut().entry(product.product_id.clone()).or_default() += 1;
        if self.failing.borrow().contains(&product.product_id) {
            return Err(PipelineError::Http("connection reset by peer".to_string()));
        }

        let path = download_dir.join(archive_name);
        if self.corrupt.borrow().contains(&product.product_id) {
            fs::write(&path, b"PK\x03\x04 truncated")?;
        } else {
            write_safe_archive(&path, &product.title);
        }
        Ok(path)
    }
}

/// Raster engine treating every file as a north-up lon/lat grid and recording writes
pub struct FakeRaster {
    pub info: RasterInfo,
    pub writes: RefCell<Vec<PathBuf>>,
    pub unreadable: RefCell<HashSet<String>>,
}

impl FakeRaster {
    /// 0.001 degree pixels covering 19.9..20.1 E, 9.9..10.1 N
    pub fn around_default_poi() -> Self {
        Self {
            info: RasterInfo {
                size: (200, 200),
                geo_transform: [19.9, 0.001, 0.0, 10.1, 0.0, -0.001],
                crs_wkt: "GEOGCS[\"WGS 84\"]".to_string(),
                driver: "GTiff".to_string(),
            },
            writes: RefCell::new(Vec::new()),
            unreadable: RefCell::new(HashSet::new()),
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }
}

impl RasterEngine for FakeRaster {
    fn describe(&self, path: &Path) -> PipelineResult<RasterInfo> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        if self.unreadable.borrow().contains(&name) {
            return Err(PipelineError::crop(path, "not a raster"));
        }
        Ok(self.info.clone())
    }

    fn to_native(&self, _info: &RasterInfo, points: &[GeoPoint]) -> PipelineResult<Vec<(f64, f64)>> {
        Ok(points.iter().map(|p| (p.lon, p.lat)).collect())
    }

    fn write_window(&self, _source: &Path, _info: &RasterInfo, window: &PixelWindow, destination: &Path) -> PipelineResult<()> {
        fs::write(destination, format!("{:?}", window))?;
        self.writes.borrow_mut().push(destination.to_path_buf());
        Ok(())
    }
}

pub fn query(width_m: f64) -> PoiQuery {
    PoiQuery {
        center: GeoPoint::new(10.0, 20.0),
        date_from: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
        date_to: NaiveDate::from_ymd_opt(2022, 1, 31).unwrap(),
        platform: Platform::Sentinel1,
        width_m,
        height_m: 1000.0,
        filters: ProviderFilters::Sentinel1 {
            product_type: Some("GRD".to_string()),
            sensor_mode: Some("IW".to_string()),
            polarisation: None,
        },
        country: Some("TD".to_string()),
    }
}

pub fn request(width_m: f64) -> AcquisitionRequest {
    AcquisitionRequest {
        query: query(width_m),
        tile_limit: None,
    }
}
