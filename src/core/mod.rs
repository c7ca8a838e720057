//! Core mosaic processing modules

pub mod clip;
pub mod cloud_mask;
pub mod composite;
pub mod grid;
pub mod morphology;
pub mod mosaic;
pub mod projection;
pub mod tile_export;

// Re-export main types
pub use clip::{clip_raster, BoundaryClipper, ClipSummary};
pub use cloud_mask::{pair_scenes, CloudMaskBuilder, CloudMaskParams, CloudShadowMask};
pub use composite::{apply_mask, median_composite, CompositeStats, Compositor, MaskedScene};
pub use grid::{make_grid, GridPartitioner, Tile, TileSize};
pub use mosaic::{MosaicAssembler, MosaicIndex, MosaicSource, MosaicSummary};
pub use tile_export::{ExportReport, ExportSettings, RetryPolicy, TileExporter, TileOutcome};
