mod common;

use common::{init_logging, request, title, FakeProvider, FakeRaster};
use satcrop::core::{crop_output_dir, Orchestrator};
use satcrop::io::{LayoutRegistry, TileStore};
use satcrop::{GeoPoint, PipelineError};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_run_crops_every_tile_once() {
    init_logging();
    let temp = TempDir::new().expect("Failed to create temp directory");
    let output = temp.path().join("cropped");
    let store = TileStore::open_in_memory().unwrap();
    let layouts = LayoutRegistry::default();
    let provider = FakeProvider::with_products(2);
    let raster = FakeRaster::around_default_poi();
    let orchestrator = Orchestrator::new(&store, &provider, &raster, &layouts, temp.path(), &output);

    let report = orchestrator.run(&request(1000.0)).expect("Pipeline run failed");
    println!("Acquired {:?}, cropped {:?}", report.acquisition.tiles, report.crop.cropped);
    assert_eq!(report.extraction.extracted.len(), 2);
    assert_eq!(report.crop.cropped.len(), 2);
    assert_eq!(report.crop.files_written, 2);
    assert_eq!(raster.write_count(), 2);

    let poi = store.get_poi(report.acquisition.poi_id).unwrap();
    for pair in store.list_tiles_for_poi(poi.id).unwrap() {
        assert!(pair.cropped_at.is_some());
        let dir = crop_output_dir(&output, &poi.query, &pair.tile);
        let files: Vec<_> = fs::read_dir(&dir).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(files.len(), 1, "expected one crop in {}", dir.display());
        assert!(!files[0].to_string_lossy().ends_with(".part"));
    }

    // Already-cropped pairs perform zero raster writes
    let again = orchestrator.crop_poi(report.acquisition.poi_id).unwrap();
    assert_eq!(again.already_cropped.len(), 2);
    assert_eq!(again.files_written, 0);
    assert_eq!(raster.write_count(), 2);

    let rerun = orchestrator.run(&request(1000.0)).unwrap();
    assert!(rerun.acquisition.downloaded.is_empty());
    assert_eq!(raster.write_count(), 2);
    assert_eq!(provider.total_fetches(), 2);
}

#[test]
fn test_overlapping_pois_share_tiles_but_not_crop_state() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("cropped");
    let store = TileStore::open_in_memory().unwrap();
    let layouts = LayoutRegistry::default();
    let provider = FakeProvider::with_products(2);
    let raster = FakeRaster::around_default_poi();
    let orchestrator = Orchestrator::new(&store, &provider, &raster, &layouts, temp.path(), &output);

    let small = orchestrator.run(&request(1000.0)).unwrap();
    let large = orchestrator.acquire(&request(3000.0)).unwrap();
    assert_ne!(small.acquisition.poi_id, large.poi_id);
    assert_eq!(small.acquisition.tiles, large.tiles);

    let summary = store.status_summary().unwrap();
    assert_eq!(summary.tiles, 2);
    assert_eq!(summary.pois, 2);
    assert_eq!(summary.tile_pois, 4);
    assert_eq!(summary.cropped_tile_pois, 2);
    assert_eq!(provider.total_fetches(), 2);

    assert!(store
        .list_tiles_for_poi(large.poi_id)
        .unwrap()
        .iter()
        .all(|pair| pair.cropped_at.is_none()));

    let cropped = orchestrator.crop_poi(large.poi_id).unwrap();
    assert_eq!(cropped.cropped.len(), 2);
    assert_eq!(raster.write_count(), 4);

    // Different footprints land in different directories
    let small_poi = store.get_poi(small.acquisition.poi_id).unwrap();
    let large_poi = store.get_poi(large.poi_id).unwrap();
    let tile = store.get_tile(large.tiles[0]).unwrap();
    assert_ne!(
        crop_output_dir(&output, &small_poi.query, &tile),
        crop_output_dir(&output, &large_poi.query, &tile)
    );
}

#[test]
fn test_failed_file_is_completed_on_later_run() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let store = TileStore::open_in_memory().unwrap();
    let layouts = LayoutRegistry::default();
    let provider = FakeProvider::with_products(1);
    let raster = FakeRaster::around_default_poi();
    let orchestrator = Orchestrator::new(&store, &provider, &raster, &layouts, temp.path(), temp.path().join("cropped"));

    let acquired = orchestrator.acquire(&request(1000.0)).unwrap();
    orchestrator.extract().unwrap();

    // A second band that the engine cannot read on the first pass
    let measurement = temp.path().join(format!("{}.SAFE/measurement", title(0)));
    fs::write(measurement.join("zz-vh.tiff"), b"II*\0").unwrap();
    raster.unreadable.borrow_mut().insert("zz-vh.tiff".to_string());

    let first = orchestrator.crop_poi(acquired.poi_id).unwrap();
    assert_eq!(first.files_written, 1);
    assert!(first.cropped.is_empty());
    assert!(matches!(first.failures[0], PipelineError::Crop { .. }));
    assert!(store.list_tiles_for_poi(acquired.poi_id).unwrap()[0].cropped_at.is_none());

    raster.unreadable.borrow_mut().clear();
    let second = orchestrator.crop_poi(acquired.poi_id).unwrap();
    assert_eq!(second.files_written, 1);
    assert_eq!(second.cropped, acquired.tiles);
    assert_eq!(raster.write_count(), 2);
}

#[test]
fn test_window_outside_raster_fails_without_marking() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let store = TileStore::open_in_memory().unwrap();
    let layouts = LayoutRegistry::default();
    let provider = FakeProvider::with_products(1);
    let raster = FakeRaster::around_default_poi();
    let orchestrator = Orchestrator::new(&store, &provider, &raster, &layouts, temp.path(), temp.path().join("cropped"));

    let mut far = request(1000.0);
    far.query.center = GeoPoint::new(-45.0, 170.0);
    let report = orchestrator.run(&far).unwrap();

    assert!(report.crop.cropped.is_empty());
    assert_eq!(report.crop.failures.len(), 1);
    match &report.crop.failures[0] {
        PipelineError::Crop { path, .. } => assert!(path.ends_with(format!("{}-vv.tiff", title(0).to_lowercase()))),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(raster.write_count(), 0);
}

#[test]
fn test_tiles_not_extracted_are_not_ready() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let store = TileStore::open_in_memory().unwrap();
    let layouts = LayoutRegistry::default();
    let provider = FakeProvider::with_products(1);
    let raster = FakeRaster::around_default_poi();
    let orchestrator = Orchestrator::new(&store, &provider, &raster, &layouts, temp.path(), temp.path().join("cropped"));

    let acquired = orchestrator.acquire(&request(1000.0)).unwrap();
    let report = orchestrator.crop_poi(acquired.poi_id).unwrap();
    assert_eq!(report.not_ready, acquired.tiles);
    assert_eq!(raster.write_count(), 0);

    assert!(matches!(
        orchestrator.crop_poi(acquired.poi_id + 100),
        Err(PipelineError::NotFound { .. })
    ));
}
