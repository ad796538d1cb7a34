//! Acquisition Orchestrator: search, register, download and associate tiles for
//! one POI, then hand over to extraction and cropping.

use crate::core::crop::{CropEngine, CropOutcome};
use crate::io::archive::{ArchiveExtractor, ExtractionReport};
use crate::io::layout::LayoutRegistry;
use crate::io::provider::{ProductMetadata, Provider, SearchRequest};
use crate::io::raster::RasterEngine;
use crate::io::store::TileStore;
use crate::types::{PipelineError, PipelineResult, PoiId, PoiQuery, Tile, TileId};
use std::path::{Path, PathBuf};

/// One acquisition request: a POI query plus an optional cap on tiles
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    pub query: PoiQuery,
    pub tile_limit: Option<usize>,
}

/// Outcome of acquiring tiles for a POI
#[derive(Debug, Default)]
pub struct AcquisitionReport {
    pub poi_id: PoiId,
    /// Tiles associated with the POI, in provider order
    pub tiles: Vec<TileId>,
    /// Tiles fetched from the provider during this run
    pub downloaded: Vec<TileId>,
    /// Tiles found in storage and not fetched again
    pub reused: Vec<TileId>,
    pub failures: Vec<PipelineError>,
}

/// Outcome of cropping the tiles of a POI
#[derive(Debug, Default)]
pub struct CropReport {
    pub poi_id: PoiId,
    /// Pairs completed during this run
    pub cropped: Vec<TileId>,
    /// Pairs cropped in an earlier run
    pub already_cropped: Vec<TileId>,
    /// Tiles whose product folder is not extracted yet
    pub not_ready: Vec<TileId>,
    pub files_written: usize,
    pub failures: Vec<PipelineError>,
}

/// Summary of a full acquire, extract and crop pass
#[derive(Debug)]
pub struct RunReport {
    pub acquisition: AcquisitionReport,
    pub extraction: ExtractionReport,
    pub crop: CropReport,
}

/// Where a product stands on disk before any download decision
enum StorageState {
    Archived(String),
    Extracted,
    Absent,
}

/// Drives one POI through the pipeline.
///
/// Services are constructed once per process and borrowed here; the
/// orchestrator holds no state of its own beyond directory locations.
pub struct Orchestrator<'a> {
    store: &'a TileStore,
    provider: &'a dyn Provider,
    layouts: &'a LayoutRegistry,
    crop_engine: CropEngine<'a>,
    download_dir: PathBuf,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a TileStore,
        provider: &'a dyn Provider,
        raster: &'a dyn RasterEngine,
        layouts: &'a LayoutRegistry,
        download_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            provider,
            layouts,
            crop_engine: CropEngine::new(raster, output_dir),
            download_dir: download_dir.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Search the provider for the POI and bring every candidate tile to at
    /// least "downloaded", associating each with the POI.
    ///
    /// Storage is checked before the state store: an archive or extracted
    /// folder already on disk is never fetched again. Per-product failures are
    /// collected in the report and do not stop the loop.
    pub fn acquire(&self, request: &AcquisitionRequest) -> PipelineResult<AcquisitionReport> {
        let query = &request.query;
        query.validate()?;
        // A zero limit means no limit
        let tile_limit = request.tile_limit.filter(|&limit| limit > 0);
        let layout = self.layouts.get(query.platform)?;

        let poi_id = self.store.find_or_create_poi(query)?;
        log::info!(
            "Acquiring {} tiles for POI {} at ({}, {}), {} to {}",
            query.platform,
            poi_id,
            query.center.lat,
            query.center.lon,
            query.date_from,
            query.date_to
        );

        let search = SearchRequest {
            point: query.center,
            date_from: query.date_from,
            date_to: query.date_to,
            platform: query.platform,
            filters: query.filters.clone(),
            limit: tile_limit,
        };
        let mut products = self.provider.search(&search)?;
        if let Some(limit) = tile_limit {
            products.truncate(limit);
        }
        log::info!("{} returned {} candidate products", self.provider.name(), products.len());

        let mut report = AcquisitionReport {
            poi_id,
            ..Default::default()
        };

        for product in &products {
            let folder_name = layout.folder_name(product);
            let archive_name = layout.archive_name(product);
            let tile_id = self.store.register_tile(product.platform, &product.product_id, &folder_name)?;

            match self.storage_state(&folder_name, &layout.archive_names(product)) {
                StorageState::Archived(existing) => {
                    log::info!("{} already downloaded", existing);
                    self.store.record_download_completed(tile_id)?;
                    report.reused.push(tile_id);
                }
                StorageState::Extracted => {
                    log::info!("{} already extracted", folder_name);
                    self.store.record_unzipped(tile_id)?;
                    report.reused.push(tile_id);
                }
                StorageState::Absent => match self.download(tile_id, product, &archive_name) {
                    Ok(()) => report.downloaded.push(tile_id),
                    Err(e) => {
                        log::warn!("{}", e);
                        report.failures.push(e);
                    }
                },
            }

            if self.store.associate_tile_with_poi(poi_id, tile_id)? {
                log::debug!("Tile {} associated with POI {}", tile_id, poi_id);
            }
            report.tiles.push(tile_id);
        }

        self.store.mark_poi_identified(poi_id)?;
        log::info!(
            "POI {} identified: {} tiles, {} downloaded, {} reused, {} failed",
            poi_id,
            report.tiles.len(),
            report.downloaded.len(),
            report.reused.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn storage_state(&self, folder_name: &str, archive_names: &[String]) -> StorageState {
        if let Some(existing) = archive_names.iter().find(|name| self.download_dir.join(name).is_file()) {
            StorageState::Archived(existing.clone())
        } else if self.download_dir.join(folder_name).is_dir() {
            StorageState::Extracted
        } else {
            StorageState::Absent
        }
    }

    fn download(&self, tile_id: TileId, product: &ProductMetadata, archive_name: &str) -> PipelineResult<()> {
        self.store.record_download_requested(tile_id)?;
        log::info!("Fetching {} via {}", product.title, self.provider.name());

        let fetched = self
            .provider
            .fetch(product, &self.download_dir, archive_name)
            .map_err(|e| match e {
                PipelineError::Download { .. } => e,
                other => PipelineError::Download {
                    product_id: product.product_id.clone(),
                    message: other.to_string(),
                },
            })?;

        if !fetched.is_file() {
            return Err(PipelineError::Download {
                product_id: product.product_id.clone(),
                message: format!("Archive {} missing after fetch", fetched.display()),
            });
        }

        self.store.record_download_completed(tile_id)?;
        Ok(())
    }

    /// Extract every completed download in the raw-download area
    pub fn extract(&self) -> PipelineResult<ExtractionReport> {
        ArchiveExtractor::new(self.store, self.layouts, &self.download_dir).run()
    }

    /// Crop every extracted tile of a POI to its footprint.
    ///
    /// A pair is marked cropped only when every raster file of the tile was
    /// cropped; otherwise it is retried on a later run, where finished files
    /// are skipped.
    pub fn crop_poi(&self, poi_id: PoiId) -> PipelineResult<CropReport> {
        let poi = self.store.get_poi(poi_id)?;
        let mut report = CropReport {
            poi_id,
            ..Default::default()
        };

        for pair in self.store.list_tiles_for_poi(poi_id)? {
            let tile = &pair.tile;
            if pair.cropped_at.is_some() {
                report.already_cropped.push(tile.id);
                continue;
            }

            let folder = self.download_dir.join(&tile.folder_name);
            if !tile.is_unzipped() || !folder.is_dir() {
                log::debug!("Tile {} not extracted yet, skipping", tile.id);
                report.not_ready.push(tile.id);
                continue;
            }

            match self.crop_tile(&folder, &poi.query, tile, &mut report) {
                Ok(true) => {
                    self.store.mark_tile_cropped_for_poi(poi_id, tile.id)?;
                    report.cropped.push(tile.id);
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        log::info!(
            "POI {} crop pass: {} cropped, {} already done, {} not ready, {} files written, {} failures",
            poi_id,
            report.cropped.len(),
            report.already_cropped.len(),
            report.not_ready.len(),
            report.files_written,
            report.failures.len()
        );
        Ok(report)
    }

    /// Crop each raster file of one tile; `Ok(true)` when all of them are done
    fn crop_tile(&self, folder: &Path, query: &PoiQuery, tile: &Tile, report: &mut CropReport) -> PipelineResult<bool> {
        let files = self.layouts.get(tile.platform)?.raster_files(folder)?;
        if files.is_empty() {
            return Err(PipelineError::crop(folder, "No raster files found in product folder"));
        }

        let mut complete = true;
        for file in &files {
            match self.crop_engine.crop_file(file, query, tile) {
                Ok(CropOutcome::Written { destination, .. }) => {
                    log::info!("Cropped {}", destination.display());
                    report.files_written += 1;
                }
                Ok(CropOutcome::AlreadyCropped(_)) => {}
                Err(e) => {
                    log::warn!("{}", e);
                    report.failures.push(e);
                    complete = false;
                }
            }
        }
        Ok(complete)
    }

    /// Acquire, extract, then crop one POI
    pub fn run(&self, request: &AcquisitionRequest) -> PipelineResult<RunReport> {
        let acquisition = self.acquire(request)?;
        let extraction = self.extract().map_err(|e| {
            log::error!("Extraction stage failed: {}", e);
            e
        })?;
        let crop = self.crop_poi(acquisition.poi_id).map_err(|e| {
            log::error!("Crop stage failed for POI {}: {}", acquisition.poi_id, e);
            e
        })?;
        Ok(RunReport {
            acquisition,
            extraction,
            crop,
        })
    }
}
