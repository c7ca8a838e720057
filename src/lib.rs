//! cloudless: annual cloud-free Sentinel-2 mosaics
//!
//! Builds a per-pixel median composite of cloud/shadow-masked Sentinel-2
//! scenes over an area of interest, exports it as a grid of tiles, merges the
//! tiles into one compressed GeoTIFF and clips that to an administrative
//! boundary.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod preview;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{OutputPaths, PipelineConfig};
pub use pipeline::{ExportStageSummary, Pipeline, RunSummary};
pub use types::{
    BoundingBox, CloudProbability, Crs, Extent, GeoTransform, Mask, MosaicError, MosaicResult, PixelGrid, Raster,
    Scene, SpectralBand, NODATA,
};
