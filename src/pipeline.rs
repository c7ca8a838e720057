//! Stage orchestration for one yearly run
//!
//! Stage 1 composites and exports tiles, stage 2 merges the downloaded tiles,
//! stage 3 clips the mosaic to the boundary. Each stage only reads what the
//! previous one left on disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::core::clip::{BoundaryClipper, ClipSummary};
use crate::core::cloud_mask::{pair_scenes, CloudMaskBuilder};
use crate::core::composite::{CompositeStats, Compositor};
use crate::core::grid::GridPartitioner;
use crate::core::mosaic::{MosaicAssembler, MosaicSummary};
use crate::core::tile_export::{ExportReport, TileExporter};
use crate::io::catalog::SceneCatalog;
use crate::io::destination::{ExportDestination, TaskState};
use crate::io::store::RasterStore;
use crate::preview::{with_tile_layer, PreviewMap, TileLayer, VisParams};
use crate::types::{BoundingBox, MosaicError, MosaicResult, PixelGrid};

/// Outcome of the composite-and-export stage
#[derive(Debug, Clone)]
pub struct ExportStageSummary {
    pub scenes_found: usize,
    pub scenes_paired: usize,
    pub composite: CompositeStats,
    pub tile_count: usize,
    pub report: ExportReport,
    pub preview_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub export: ExportStageSummary,
    pub mosaic: MosaicSummary,
    pub clip: ClipSummary,
}

/// Runs the stages of one year against its collaborators
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    catalog: &'a dyn SceneCatalog,
    destination: &'a dyn ExportDestination,
    store: &'a dyn RasterStore,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        catalog: &'a dyn SceneCatalog,
        destination: &'a dyn ExportDestination,
        store: &'a dyn RasterStore,
    ) -> MosaicResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            destination,
            store,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        self.config
    }

    /// Composite the year's scenes and export every populated tile
    pub fn export(&self) -> MosaicResult<ExportStageSummary> {
        let config = self.config;
        log::info!("🛰️  Building {} cloud-free composite", config.year);

        log::info!("Step 1: Querying scenes");
        let query = config.scene_query()?;
        log::debug!("Query: {} to {}, cloud ceiling {}%", query.start, query.end, query.max_cloudy_pixel_percentage);
        let (scenes, _) = config.retry.run("scene query", || self.catalog.query_scenes(&query))?;
        let (probabilities, _) = config
            .retry
            .run("cloud probability query", || self.catalog.query_cloud_probability(&query))?;
        let scenes_found = scenes.len();
        log::info!("Found {} scenes and {} probability layers", scenes_found, probabilities.len());

        log::info!("Step 2: Pairing scenes with cloud probability");
        let pairs = pair_scenes(scenes, probabilities);
        let scenes_paired = pairs.len();

        log::info!("Step 3: Masking and compositing");
        let mut compositor = Compositor::new(CloudMaskBuilder::new(config.masking.clone()));
        if let Some((scene, _)) = pairs.first() {
            let grid = PixelGrid::covering(&config.aoi, config.export.crs, scene.reflectance.pixel_size_m())?;
            compositor = compositor.with_grid(grid);
        }
        let (composite, masked, stats) = compositor.composite(pairs)?;
        let footprints: Vec<BoundingBox> = masked.iter().map(|m| m.footprint).collect();
        drop(masked);

        log::info!("Step 4: Partitioning AOI");
        let tiles = GridPartitioner::new(config.tiling)?.partition(&config.aoi)?;

        log::info!("Step 5: Submitting tile exports");
        let exporter = TileExporter::new(self.destination, config.export.clone(), config.retry.clone());
        let report = exporter.export_tiles(config.year, &tiles, &footprints, Arc::new(composite))?;

        log::info!("Step 6: Writing preview");
        let mut map = PreviewMap::for_aoi(&format!("{} cloud-free mosaic", config.year), &config.aoi);
        map.add_tiles(&tiles, &report.skipped());
        if let Some(url) = self.catalog.tile_url() {
            map = with_tile_layer(map, TileLayer::composite(&url, &VisParams::default()));
        }
        let preview_path = config.preview_path();
        map.write(&preview_path)?;

        Ok(ExportStageSummary {
            scenes_found,
            scenes_paired,
            composite: stats,
            tile_count: tiles.len(),
            report,
            preview_path,
        })
    }

    /// Block until every submitted export has finished.
    ///
    /// Failed tasks are logged; exceeding `timeout` is a transient error.
    pub fn wait_for_exports(&self, report: &ExportReport, poll: Duration, timeout: Duration) -> MosaicResult<()> {
        let started = Instant::now();
        let mut pending: Vec<_> = report.submitted().into_iter().cloned().collect();

        while !pending.is_empty() {
            let mut still_pending = Vec::new();
            for task in pending {
                match self.destination.status(&task)? {
                    TaskState::Completed => log::debug!("Export {} completed", task.description),
                    TaskState::Failed(reason) => {
                        log::error!("❌ Export {} failed: {}", task.description, reason)
                    }
                    TaskState::Submitted | TaskState::Running => still_pending.push(task),
                }
            }
            pending = still_pending;
            if pending.is_empty() {
                break;
            }
            if started.elapsed() >= timeout {
                return Err(MosaicError::Transient(format!(
                    "{} exports still running after {:?}",
                    pending.len(),
                    timeout
                )));
            }
            log::info!("Waiting for {} exports...", pending.len());
            std::thread::sleep(poll);
        }
        Ok(())
    }

    /// Merge the downloaded tiles of this year
    pub fn assemble(&self) -> MosaicResult<MosaicSummary> {
        let config = self.config;
        MosaicAssembler::new(self.store)?
            .with_year(config.year)
            .assemble(&config.tiles_dir(), &config.vrt_path(), &config.mosaic_path())
    }

    /// Clip the merged mosaic to the boundary, removing the unclipped file on success
    pub fn clip(&self) -> MosaicResult<ClipSummary> {
        let config = self.config;
        let mut clipper = BoundaryClipper::new(self.store);
        if config.keep_unclipped_mosaic {
            clipper = clipper.keep_source();
        }
        clipper.clip(
            &config.mosaic_path(),
            &config.boundary_path(),
            &config.clipped_path(),
        )
    }

    /// All three stages in order
    pub fn run(&self) -> MosaicResult<RunSummary> {
        let config = self.config;
        log::info!("🚀 Starting {} mosaic run", config.year);

        log::info!("=== Stage 1/3: composite and export ===");
        let export = self.export()?;
        self.wait_for_exports(
            &export.report,
            Duration::from_secs(config.export_poll_interval_s),
            Duration::from_secs(config.export_timeout_s),
        )?;

        log::info!("=== Stage 2/3: mosaic assembly ===");
        let mosaic = self.assemble()?;

        log::info!("=== Stage 3/3: boundary clip ===");
        let clip = self.clip()?;

        log::info!("✅ {} mosaic complete: {}", config.year, clip.output_path.display());
        Ok(RunSummary { export, mosaic, clip })
    }
}
