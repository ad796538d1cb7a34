//! Per-platform product naming and raster enumeration strategies
//!
//! Each imaging family packages its rasters differently: Sentinel-1 keeps one
//! GeoTIFF per polarisation under `measurement/`, Sentinel-2 nests JPEG2000
//! bands under `GRANULE/<tile>/IMG_DATA[/R10m|R20m|R60m]`, and Landsat ships a
//! flat folder of band GeoTIFFs. The crop stage only sees the list of files a
//! layout returns.

use crate::io::provider::ProductMetadata;
use crate::types::{Platform, PipelineError, PipelineResult};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// Naming rule and on-disk layout for one product family
pub trait ProductLayout {
    /// Canonical folder the product is extracted to
    fn folder_name(&self, product: &ProductMetadata) -> String;

    /// File name of the downloaded archive
    fn archive_name(&self, product: &ProductMetadata) -> String;

    /// Every archive file name the product may be stored under, `archive_name` first
    fn archive_names(&self, product: &ProductMetadata) -> Vec<String> {
        vec![self.archive_name(product)]
    }

    /// Folder name an archive file unpacks to, if the file follows this layout's convention
    fn folder_for_archive(&self, archive_file_name: &str) -> Option<String>;

    /// Raster files inside an extracted product folder, in a stable order
    fn raster_files(&self, product_dir: &Path) -> PipelineResult<Vec<PathBuf>>;
}

const ZIP_SUFFIXES: &[&str] = &[".zip"];
const LANDSAT_SUFFIXES: &[&str] = &[".zip", ".tar.gz", ".tgz"];

/// Archive stem when `archive_file_name` ends with one of `suffixes` (ASCII case-insensitive)
fn strip_archive_suffix<'n>(archive_file_name: &'n str, suffixes: &[&str]) -> Option<&'n str> {
    let lower = archive_file_name.to_ascii_lowercase();
    suffixes
        .iter()
        .find(|suffix| lower.len() > suffix.len() && lower.ends_with(*suffix))
        .map(|suffix| &archive_file_name[..archive_file_name.len() - suffix.len()])
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|wanted| ext.eq_ignore_ascii_case(wanted)))
        .unwrap_or(false)
}

fn sorted_files_in(dir: &Path, keep: impl Fn(&Path) -> bool) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && keep(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Sentinel-1 SAFE product: one measurement GeoTIFF per polarisation band
#[derive(Debug, Clone, Default)]
pub struct SafeMeasurementLayout;

impl ProductLayout for SafeMeasurementLayout {
    fn folder_name(&self, product: &ProductMetadata) -> String {
        format!("{}.SAFE", product.title)
    }

    fn archive_name(&self, product: &ProductMetadata) -> String {
        format!("{}.zip", product.title)
    }

    fn folder_for_archive(&self, archive_file_name: &str) -> Option<String> {
        strip_archive_suffix(archive_file_name, ZIP_SUFFIXES).map(|stem| format!("{}.SAFE", stem))
    }

    fn raster_files(&self, product_dir: &Path) -> PipelineResult<Vec<PathBuf>> {
        let measurement = product_dir.join("measurement");
        if !measurement.is_dir() {
            log::warn!("No measurement directory in {}", product_dir.display());
            return Ok(Vec::new());
        }
        sorted_files_in(&measurement, |path| has_extension(path, &["tiff", "tif"]))
    }
}

/// Sentinel-2 SAFE product: JPEG2000 band files nested per granule and resolution
#[derive(Debug, Clone, Default)]
pub struct SafeGranuleLayout {
    /// Restrict to one resolution directory such as `R10m`; all when unset
    pub resolution: Option<String>,
}

fn s2_band_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"_(B\d{2}|B8A|TCI|AOT|WVP|SCL)(_\d{2}m)?\.jp2$").expect("static band pattern")
    })
}

impl ProductLayout for SafeGranuleLayout {
    fn folder_name(&self, product: &ProductMetadata) -> String {
        format!("{}.SAFE", product.title)
    }

    fn archive_name(&self, product: &ProductMetadata) -> String {
        format!("{}.zip", product.title)
    }

    fn folder_for_archive(&self, archive_file_name: &str) -> Option<String> {
        strip_archive_suffix(archive_file_name, ZIP_SUFFIXES).map(|stem| format!("{}.SAFE", stem))
    }

    fn raster_files(&self, product_dir: &Path) -> PipelineResult<Vec<PathBuf>> {
        let granules = product_dir.join("GRANULE");
        if !granules.is_dir() {
            log::warn!("No GRANULE directory in {}", product_dir.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&granules).follow_links(false) {
            let entry = entry.map_err(|e| PipelineError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let in_img_data = path.components().any(|c| c.as_os_str() == "IMG_DATA");
            let in_resolution = match &self.resolution {
                Some(res) => path.parent().map(|p| p.ends_with(res)).unwrap_or(false),
                None => true,
            };
            let name = entry.file_name().to_string_lossy();
            if in_img_data && in_resolution && s2_band_pattern().is_match(&name) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Landsat Collection 2 product: band GeoTIFFs directly in the product folder
#[derive(Debug, Clone, Default)]
pub struct FlatLayout;

fn landsat_band_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)_(SR_B\d+|ST_B\d+|B\d+|QA_PIXEL|QA_RADSAT|QA_AEROSOL)\.tiff?$").expect("static band pattern")
    })
}

impl ProductLayout for FlatLayout {
    fn folder_name(&self, product: &ProductMetadata) -> String {
        product.title.clone()
    }

    fn archive_name(&self, product: &ProductMetadata) -> String {
        format!("{}.zip", product.title)
    }

    /// Landsat bundles also arrive as `.tar.gz` from USGS
    fn archive_names(&self, product: &ProductMetadata) -> Vec<String> {
        vec![self.archive_name(product), format!("{}.tar.gz", product.title)]
    }

    fn folder_for_archive(&self, archive_file_name: &str) -> Option<String> {
        strip_archive_suffix(archive_file_name, LANDSAT_SUFFIXES).map(str::to_string)
    }

    fn raster_files(&self, product_dir: &Path) -> PipelineResult<Vec<PathBuf>> {
        sorted_files_in(product_dir, |path| {
            path.file_name()
                .map(|name| landsat_band_pattern().is_match(&name.to_string_lossy()))
                .unwrap_or(false)
        })
    }
}

/// Layout lookup per platform; new providers register their own strategy here
pub struct LayoutRegistry {
    layouts: HashMap<Platform, Box<dyn ProductLayout>>,
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        let mut registry = Self { layouts: HashMap::new() };
        registry.register(Platform::Sentinel1, Box::new(SafeMeasurementLayout));
        registry.register(Platform::Sentinel2, Box::new(SafeGranuleLayout::default()));
        registry.register(Platform::Landsat8, Box::new(FlatLayout));
        registry
    }
}

impl LayoutRegistry {
    pub fn register(&mut self, platform: Platform, layout: Box<dyn ProductLayout>) {
        self.layouts.insert(platform, layout);
    }

    pub fn get(&self, platform: Platform) -> PipelineResult<&dyn ProductLayout> {
        self.layouts
            .get(&platform)
            .map(|layout| layout.as_ref())
            .ok_or_else(|| PipelineError::Config(format!("No product layout registered for {}", platform)))
    }

    /// Distinct candidate folder names an archive may unpack to, across all layouts
    pub fn candidate_folders(&self, archive_file_name: &str) -> Vec<String> {
        let mut candidates: Vec<String> = self
            .layouts
            .values()
            .filter_map(|layout| layout.folder_for_archive(archive_file_name))
            .collect();
        candidates.sort();
        candidates.dedup();
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"raster").unwrap();
    }

    #[test]
    fn test_sentinel_naming() {
        let product = ProductMetadata::new("a1b2", "S2A_MSIL2A_20230612T101601_N0509_R065_T32TLT_20230612T163045", Platform::Sentinel2);
        let layout = SafeGranuleLayout::default();
        assert_eq!(layout.folder_name(&product), format!("{}.SAFE", product.title));
        assert_eq!(layout.archive_name(&product), format!("{}.zip", product.title));
        assert_eq!(
            layout.folder_for_archive(&layout.archive_name(&product)),
            Some(layout.folder_name(&product))
        );
        assert_eq!(layout.folder_for_archive("notes.txt"), None);
        assert_eq!(layout.folder_for_archive(".zip"), None);
    }

    #[test]
    fn test_landsat_naming() {
        let product = ProductMetadata::new("x", "LC08_L2SP_195028_20230610_20230615_02_T1", Platform::Landsat8);
        assert_eq!(FlatLayout.folder_name(&product), product.title);
        assert_eq!(FlatLayout.folder_for_archive("LC08_L2SP_195028_20230610_20230615_02_T1.zip"), Some(product.title.clone()));
        assert_eq!(FlatLayout.folder_for_archive("LC08_L2SP_195028_20230610_20230615_02_T1.tar.gz"), Some(product.title.clone()));
        assert_eq!(FlatLayout.folder_for_archive("LC08_L2SP_195028_20230610_20230615_02_T1.TGZ"), Some(product.title.clone()));
        assert_eq!(
            FlatLayout.archive_names(&product),
            vec![format!("{}.zip", product.title), format!("{}.tar.gz", product.title)]
        );
    }

    #[test]
    fn test_safe_layouts_only_take_zip() {
        assert_eq!(SafeMeasurementLayout.folder_for_archive("S1A_X.tar.gz"), None);
        assert_eq!(SafeMeasurementLayout.folder_for_archive("S1A_X.ZIP"), Some("S1A_X.SAFE".to_string()));
        let product = ProductMetadata::new("id", "S1A_X", Platform::Sentinel1);
        assert_eq!(SafeMeasurementLayout.archive_names(&product), vec!["S1A_X.zip".to_string()]);
    }

    #[test]
    fn test_measurement_files() {
        let temp = TempDir::new().unwrap();
        let safe = temp.path().join("S1A_IW_GRDH.SAFE");
        touch(&safe.join("measurement/s1a-iw-grd-vv-001.tiff"));
        touch(&safe.join("measurement/s1a-iw-grd-vh-001.tiff"));
        touch(&safe.join("annotation/s1a-iw-grd-vv-001.xml"));

        let files = SafeMeasurementLayout.raster_files(&safe).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("s1a-iw-grd-vh-001.tiff"));
        assert!(files[1].ends_with("s1a-iw-grd-vv-001.tiff"));

        assert!(SafeMeasurementLayout.raster_files(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_granule_files_with_resolution_filter() {
        let temp = TempDir::new().unwrap();
        let safe = temp.path().join("S2B_MSIL2A.SAFE");
        let img = safe.join("GRANULE/L2A_T32TLT_A032456/IMG_DATA");
        touch(&img.join("R10m/T32TLT_20230612T101601_B04_10m.jp2"));
        touch(&img.join("R10m/T32TLT_20230612T101601_B08_10m.jp2"));
        touch(&img.join("R20m/T32TLT_20230612T101601_B8A_20m.jp2"));
        touch(&img.join("R20m/T32TLT_20230612T101601_B8A_20m.jp2.aux.xml"));
        touch(&safe.join("GRANULE/L2A_T32TLT_A032456/QI_DATA/MSK_CLDPRB_20m.jp2"));

        let all = SafeGranuleLayout::default().raster_files(&safe).unwrap();
        assert_eq!(all.len(), 3);

        let ten_metre = SafeGranuleLayout { resolution: Some("R10m".into()) }.raster_files(&safe).unwrap();
        assert_eq!(ten_metre.len(), 2);
        assert!(ten_metre.iter().all(|p| p.parent().unwrap().ends_with("R10m")));
    }

    #[test]
    fn test_flat_files() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("LC08_L2SP_195028_20230610_20230615_02_T1");
        touch(&folder.join("LC08_L2SP_195028_20230610_20230615_02_T1_SR_B4.TIF"));
        touch(&folder.join("LC08_L2SP_195028_20230610_20230615_02_T1_QA_PIXEL.TIF"));
        touch(&folder.join("LC08_L2SP_195028_20230610_20230615_02_T1_MTL.txt"));
        touch(&folder.join("nested/LC08_extra_SR_B5.TIF"));

        let files = FlatLayout.raster_files(&folder).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_registry_candidates() {
        let registry = LayoutRegistry::default();
        let candidates = registry.candidate_folders("S2A_PRODUCT.zip");
        assert_eq!(candidates, vec!["S2A_PRODUCT".to_string(), "S2A_PRODUCT.SAFE".to_string()]);
        assert!(registry.candidate_folders("readme.md").is_empty());
        assert!(registry.get(Platform::Landsat8).is_ok());
    }
}
