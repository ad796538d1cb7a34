//! Pipeline stages: geometry, cropping and orchestration

pub mod crop;
pub mod geometry;
pub mod orchestrator;

// Re-export main types
pub use crop::{crop_output_dir, crop_output_path, CropEngine, CropOutcome};
pub use geometry::{bounding_corners, destination, BoundingCorners, PixelWindow};
pub use orchestrator::{AcquisitionReport, AcquisitionRequest, CropReport, Orchestrator, RunReport};
