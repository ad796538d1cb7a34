use crate::core::geometry::{bounding_corners, PixelWindow};
use crate::io::raster::RasterEngine;
use crate::types::{PipelineError, PipelineResult, PoiQuery, Tile};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of cropping one raster file
#[derive(Debug, Clone, PartialEq)]
pub enum CropOutcome {
    Written { destination: PathBuf, window: PixelWindow },
    /// Destination already present from an earlier run; nothing was written
    AlreadyCropped(PathBuf),
}

fn path_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

/// Output directory for a (tile, POI) pair:
/// `<root>/<platform>/<country>/<lat>/<lon>/<width>/<height>/<tile folder>`.
///
/// Pure and deterministic; repeated runs map to the same location.
pub fn crop_output_dir(root: &Path, poi: &PoiQuery, tile: &Tile) -> PathBuf {
    let country = poi.country.as_deref().filter(|c| !c.trim().is_empty()).unwrap_or("unknown");
    root.join(poi.platform.as_str())
        .join(path_segment(country))
        .join(format!("{:.6}", poi.center.lat))
        .join(format!("{:.6}", poi.center.lon))
        .join(format!("{}", poi.width_m))
        .join(format!("{}", poi.height_m))
        .join(path_segment(&tile.folder_name))
}

/// Output file for one source raster of a (tile, POI) pair
pub fn crop_output_path(root: &Path, poi: &PoiQuery, tile: &Tile, source: &Path) -> PathBuf {
    let name = source.file_name().map(OsString::from).unwrap_or_else(|| OsString::from("raster"));
    crop_output_dir(root, poi, tile).join(name)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Crops single raster files to a POI's enclosing window
pub struct CropEngine<'a> {
    engine: &'a dyn RasterEngine,
    output_dir: PathBuf,
}

impl<'a> CropEngine<'a> {
    pub fn new(engine: &'a dyn RasterEngine, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Crop `source` (a raster of `tile`) to the footprint of `poi`.
    ///
    /// The clipped copy is written next to its destination under a `.part`
    /// name and renamed when complete, so an existing destination is always a
    /// finished crop and is left untouched.
    pub fn crop_file(&self, source: &Path, poi: &PoiQuery, tile: &Tile) -> PipelineResult<CropOutcome> {
        let destination = crop_output_path(&self.output_dir, poi, tile, source);
        if destination.is_file() {
            log::debug!("{} already cropped", destination.display());
            return Ok(CropOutcome::AlreadyCropped(destination));
        }

        let as_crop_error = |e: PipelineError| match e {
            PipelineError::Crop { .. } => e,
            other => PipelineError::crop(source, other.to_string()),
        };

        let info = self.engine.describe(source).map_err(as_crop_error)?;
        let corners = bounding_corners(poi.center, poi.width_m, poi.height_m);
        let native = self
            .engine
            .to_native(&info, &[corners.top_left, corners.bottom_right])
            .map_err(as_crop_error)?;
        if native.len() != 2 {
            return Err(PipelineError::crop(source, "Reprojection returned an unexpected number of points"));
        }

        let window = PixelWindow::enclosing(&info.geo_transform, info.size, native[0], native[1]).ok_or_else(|| {
            PipelineError::crop(
                source,
                format!(
                    "Window {:?} to {:?} lies outside the {}x{} raster",
                    native[0], native[1], info.size.0, info.size.1
                ),
            )
        })?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let partial = with_suffix(&destination, ".part");
        log::debug!("Cropping {} window {:?} -> {}", source.display(), window, destination.display());
        if let Err(e) = self.engine.write_window(source, &info, &window, &partial) {
            if let Err(cleanup) = fs::remove_file(&partial) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    log::debug!("Could not remove {}: {}", partial.display(), cleanup);
                }
            }
            return Err(as_crop_error(e));
        }

        fs::rename(&partial, &destination)?;
        let partial_aux = with_suffix(&partial, ".aux.xml");
        if partial_aux.is_file() {
            fs::rename(&partial_aux, with_suffix(&destination, ".aux.xml"))?;
        }

        Ok(CropOutcome::Written { destination, window })
    }
}
