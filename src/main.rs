//! # satcrop CLI
//!
//! ```bash
//! satcrop --config satcrop.toml acquire --lat 48.85 --lon 2.35 --from 2023-04-01 --to 2023-04-30 \
//!     --platform s2 --width 2000 --height 2000 --max-cloud-cover 20
//! satcrop extract
//! satcrop crop --poi 1
//! satcrop run --lat 48.85 --lon 2.35 --from 2023-04-01 --to 2023-04-30 --platform s1 --width 5000 --height 5000
//! satcrop status
//! ```

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use satcrop::core::{AcquisitionRequest, Orchestrator};
use satcrop::io::{CopernicusProvider, GdalRasterEngine, LayoutRegistry, TileStore};
use satcrop::{GeoPoint, PipelineConfig, Platform, PoiQuery, ProviderFilters};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "satcrop", version, about = "Resumable satellite tile acquisition and POI cropping")]
struct Cli {
    /// Configuration file (TOML); `SATCROP_*` environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, download and associate tiles for a POI
    Acquire(PoiArgs),
    /// Unpack completed downloads
    Extract,
    /// Crop the extracted tiles of a stored POI
    Crop {
        #[arg(long)]
        poi: i64,
    },
    /// Acquire, extract and crop in one pass
    Run(PoiArgs),
    /// Print pipeline progress counts
    Status,
}

#[derive(Args)]
struct PoiArgs {
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,
    /// First acquisition day (YYYY-MM-DD), inclusive
    #[arg(long)]
    from: NaiveDate,
    /// Last acquisition day (YYYY-MM-DD), inclusive
    #[arg(long)]
    to: NaiveDate,
    /// sentinel-1 | sentinel-2 | landsat-8 (or s1, s2, l8)
    #[arg(long)]
    platform: Platform,
    /// Footprint width in meters
    #[arg(long)]
    width: f64,
    /// Footprint height in meters
    #[arg(long)]
    height: f64,
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    product_type: Option<String>,
    #[arg(long)]
    max_cloud_cover: Option<f64>,
    #[arg(long)]
    sensor_mode: Option<String>,
    #[arg(long)]
    polarisation: Option<String>,
    /// Maximum number of tiles to acquire; 0 means no limit
    #[arg(long)]
    limit: Option<usize>,
}

impl PoiArgs {
    fn filters(&self) -> Result<ProviderFilters> {
        let filters = match self.platform {
            Platform::Sentinel1 => {
                if self.max_cloud_cover.is_some() {
                    bail!("--max-cloud-cover does not apply to Sentinel-1");
                }
                ProviderFilters::Sentinel1 {
                    product_type: self.product_type.clone(),
                    sensor_mode: self.sensor_mode.clone(),
                    polarisation: self.polarisation.clone(),
                }
            }
            Platform::Sentinel2 | Platform::Landsat8 => {
                if self.sensor_mode.is_some() || self.polarisation.is_some() {
                    bail!("--sensor-mode and --polarisation only apply to Sentinel-1");
                }
                if self.platform == Platform::Sentinel2 {
                    ProviderFilters::Sentinel2 {
                        product_type: self.product_type.clone(),
                        max_cloud_cover: self.max_cloud_cover,
                    }
                } else {
                    ProviderFilters::Landsat8 {
                        product_type: self.product_type.clone(),
                        max_cloud_cover: self.max_cloud_cover,
                    }
                }
            }
        };

        let empty = match &filters {
            ProviderFilters::Sentinel1 { product_type, sensor_mode, polarisation } => {
                product_type.is_none() && sensor_mode.is_none() && polarisation.is_none()
            }
            ProviderFilters::Sentinel2 { product_type, max_cloud_cover }
            | ProviderFilters::Landsat8 { product_type, max_cloud_cover } => {
                product_type.is_none() && max_cloud_cover.is_none()
            }
            ProviderFilters::None => true,
        };
        // An empty filter set is stored as `None` so it matches queries made without flags
        Ok(if empty { ProviderFilters::None } else { filters })
    }

    fn request(&self) -> Result<AcquisitionRequest> {
        Ok(AcquisitionRequest {
            query: PoiQuery {
                center: GeoPoint::new(self.lat, self.lon),
                date_from: self.from,
                date_to: self.to,
                platform: self.platform,
                width_m: self.width,
                height_m: self.height,
                filters: self.filters()?,
                country: self.country.clone(),
            },
            tile_limit: self.limit,
        })
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let config = config.apply_env_overrides();
    config.ensure_directories().context("Failed to create working directories")?;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let store = TileStore::open(&config.database_path)
        .with_context(|| format!("Failed to open tile store {}", config.database_path.display()))?;
    let layouts = LayoutRegistry::default();
    let raster = GdalRasterEngine;
    let provider = CopernicusProvider::new(config.copernicus.clone())?;
    let orchestrator = Orchestrator::new(
        &store,
        &provider,
        &raster,
        &layouts,
        &config.download_dir,
        &config.output_dir,
    );

    match cli.command {
        Commands::Acquire(args) => {
            let report = orchestrator.acquire(&args.request()?)?;
            println!(
                "POI {}: {} tiles ({} downloaded, {} reused, {} failed)",
                report.poi_id,
                report.tiles.len(),
                report.downloaded.len(),
                report.reused.len(),
                report.failures.len()
            );
        }
        Commands::Extract => {
            let report = orchestrator.extract()?;
            println!(
                "{} extracted, {} reconciled, {} skipped, {} failed",
                report.extracted.len(),
                report.reconciled.len(),
                report.skipped,
                report.failures.len()
            );
        }
        Commands::Crop { poi } => {
            let report = orchestrator.crop_poi(poi)?;
            println!(
                "POI {}: {} tiles cropped, {} already cropped, {} not ready, {} files written, {} failed",
                report.poi_id,
                report.cropped.len(),
                report.already_cropped.len(),
                report.not_ready.len(),
                report.files_written,
                report.failures.len()
            );
        }
        Commands::Run(args) => {
            let report = orchestrator.run(&args.request()?)?;
            println!(
                "POI {}: {} tiles, {} extracted, {} cropped, {} failures",
                report.acquisition.poi_id,
                report.acquisition.tiles.len(),
                report.extraction.extracted.len(),
                report.crop.cropped.len(),
                report.acquisition.failures.len() + report.extraction.failures.len() + report.crop.failures.len()
            );
        }
        Commands::Status => {
            let summary = store.status_summary()?;
            println!("Tiles:               {}", summary.tiles);
            println!("  download requested {}", summary.download_requested);
            println!("  download completed {}", summary.download_completed);
            println!("  unzipped           {}", summary.unzipped);
            println!("POIs:                {}", summary.pois);
            println!("  identified         {}", summary.identified_pois);
            println!("Tile/POI pairs:      {}", summary.tile_pois);
            println!("  cropped            {}", summary.cropped_tile_pois);
        }
    }

    Ok(())
}
