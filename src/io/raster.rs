//! Raster engine seam: native CRS lookup, reprojection and windowed copies

use crate::core::geometry::PixelWindow;
use crate::types::{GeoPoint, PipelineResult};
use std::path::Path;

/// What the crop stage needs to know about a source raster
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    /// (columns, rows)
    pub size: (usize, usize),
    pub geo_transform: [f64; 6],
    /// Native coordinate reference system as WKT
    pub crs_wkt: String,
    /// Short name of the format driver, reused for the output
    pub driver: String,
}

/// External raster engine; reprojection and pixel I/O are delegated to it
pub trait RasterEngine {
    fn describe(&self, path: &Path) -> PipelineResult<RasterInfo>;

    /// Reproject WGS84 points into the raster's native CRS, as (x, y) pairs
    fn to_native(&self, info: &RasterInfo, points: &[GeoPoint]) -> PipelineResult<Vec<(f64, f64)>>;

    /// Write the pixels of `window` from `source` to `destination`, keeping the source format
    fn write_window(&self, source: &Path, info: &RasterInfo, window: &PixelWindow, destination: &Path)
        -> PipelineResult<()>;
}

#[cfg(feature = "gdal")]
pub use self::gdal_engine::GdalRasterEngine;

#[cfg(feature = "gdal")]
mod gdal_engine {
    use super::{RasterEngine, RasterInfo};
    use crate::core::geometry::PixelWindow;
    use crate::types::{GeoPoint, PipelineError, PipelineResult};
    use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
    use gdal::Dataset;
    use std::ffi::CString;
    use std::os::raw::c_char;
    use std::path::Path;

    /// GDAL-backed raster engine
    #[derive(Debug, Clone, Default)]
    pub struct GdalRasterEngine;

    fn c_string(value: &str) -> PipelineResult<CString> {
        CString::new(value).map_err(|e| PipelineError::InvalidRequest(format!("Interior NUL in {:?}: {}", value, e)))
    }

    impl RasterEngine for GdalRasterEngine {
        fn describe(&self, path: &Path) -> PipelineResult<RasterInfo> {
            let dataset = Dataset::open(path)?;
            let geo_transform = dataset.geo_transform()?;
            let size = dataset.raster_size();
            let crs_wkt = dataset.spatial_ref()?.to_wkt()?;
            let driver = dataset.driver().short_name();

            log::debug!("{}: {}x{} {} geotransform {:?}", path.display(), size.0, size.1, driver, geo_transform);
            Ok(RasterInfo {
                size,
                geo_transform,
                crs_wkt,
                driver,
            })
        }

        fn to_native(&self, info: &RasterInfo, points: &[GeoPoint]) -> PipelineResult<Vec<(f64, f64)>> {
            // Traditional GIS order on both sides: x = lon, y = lat
            let mut wgs84 = SpatialRef::from_epsg(4326)?;
            wgs84.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
            let mut native = SpatialRef::from_wkt(&info.crs_wkt)?;
            native.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

            let transform = CoordTransform::new(&wgs84, &native)?;
            let mut xs: Vec<f64> = points.iter().map(|p| p.lon).collect();
            let mut ys: Vec<f64> = points.iter().map(|p| p.lat).collect();
            transform.transform_coords(&mut xs, &mut ys, &mut [])?;

            Ok(xs.into_iter().zip(ys).collect())
        }

        fn write_window(
            &self,
            source: &Path,
            info: &RasterInfo,
            window: &PixelWindow,
            destination: &Path,
        ) -> PipelineResult<()> {
            let dataset = Dataset::open(source)?;

            let args = [
                "-of".to_string(),
                info.driver.clone(),
                "-srcwin".to_string(),
                window.col_off.to_string(),
                window.row_off.to_string(),
                window.width.to_string(),
                window.height.to_string(),
            ];
            let c_args = args.iter().map(|a| c_string(a)).collect::<PipelineResult<Vec<_>>>()?;
            let mut argv: Vec<*mut c_char> = c_args.iter().map(|a| a.as_ptr() as *mut c_char).collect();
            argv.push(std::ptr::null_mut());

            let c_destination = c_string(&destination.to_string_lossy())?;

            // GDALTranslate copies the option strings, so `c_args` only has to outlive the options call
            unsafe {
                let options = gdal_sys::GDALTranslateOptionsNew(argv.as_mut_ptr(), std::ptr::null_mut());
                if options.is_null() {
                    return Err(PipelineError::crop(source, "GDAL rejected the translate options"));
                }

                let mut usage_error: std::os::raw::c_int = 0;
                let output = gdal_sys::GDALTranslate(
                    c_destination.as_ptr(),
                    dataset.c_dataset(),
                    options,
                    &mut usage_error,
                );
                gdal_sys::GDALTranslateOptionsFree(options);

                if output.is_null() || usage_error != 0 {
                    return Err(PipelineError::crop(
                        source,
                        format!("GDALTranslate failed writing {}", destination.display()),
                    ));
                }
                gdal_sys::GDALClose(output);
            }

            Ok(())
        }
    }
}
