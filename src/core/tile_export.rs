use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::core::grid::Tile;
use crate::io::destination::{ExportDestination, ExportRequest, ExportTask};
use crate::types::{BoundingBox, Crs, MosaicError, MosaicResult, Raster};

/// Resubmission schedule for transient export failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay before attempt `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.initial_backoff_ms as f64 * factor) as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Returns the value and the number of attempts used.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> MosaicResult<(T, u32)>
    where
        F: FnMut() -> MosaicResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            log::debug!("{}: attempt {} of {}", label, attempt, max_attempts);
            match op() {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    log::warn!("{} attempt {} failed ({}), retrying in {:?}", label, attempt, e, delay);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Fixed export parameters shared by every tile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Destination folder name
    pub folder: String,
    pub scale_m: f64,
    pub crs: Crs,
    pub max_pixels: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            folder: "tiles".to_string(),
            scale_m: 10.0,
            crs: Crs::Utm { zone: 51, north: true },
            max_pixels: 10_000_000_000_000,
        }
    }
}

/// What happened to one tile
#[derive(Debug, Clone, PartialEq)]
pub enum TileOutcome {
    Submitted {
        tile_index: usize,
        scene_count: usize,
        attempts: u32,
        task: ExportTask,
    },
    /// No scene footprint touches the tile
    Skipped { tile_index: usize },
    Failed { tile_index: usize, error: String },
}

impl TileOutcome {
    pub fn tile_index(&self) -> usize {
        match self {
            TileOutcome::Submitted { tile_index, .. }
            | TileOutcome::Skipped { tile_index }
            | TileOutcome::Failed { tile_index, .. } => *tile_index,
        }
    }
}

/// Per-tile outcomes in tile order
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub outcomes: Vec<TileOutcome>,
}

impl ExportReport {
    pub fn submitted(&self) -> Vec<&ExportTask> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                TileOutcome::Submitted { task, .. } => Some(task),
                _ => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                TileOutcome::Skipped { tile_index } => Some(*tile_index),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<(usize, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                TileOutcome::Failed { tile_index, error } => Some((*tile_index, error.as_str())),
                _ => None,
            })
            .collect()
    }
}

/// Number of footprints intersecting the tile outline
pub fn count_contributing(tile: &Tile, footprints: &[BoundingBox]) -> usize {
    footprints.iter().filter(|f| f.intersects(&tile.geometry)).count()
}

/// Submits one export per non-empty tile
pub struct TileExporter<'a> {
    destination: &'a dyn ExportDestination,
    settings: ExportSettings,
    retry: RetryPolicy,
}

impl<'a> TileExporter<'a> {
    pub fn new(destination: &'a dyn ExportDestination, settings: ExportSettings, retry: RetryPolicy) -> Self {
        Self {
            destination,
            settings,
            retry,
        }
    }

    pub fn request_for(&self, tile: &Tile, year: i32, composite: &Arc<Raster>) -> ExportRequest {
        let name = tile.export_name(year);
        ExportRequest {
            image: Arc::clone(composite),
            description: name.clone(),
            folder: self.settings.folder.clone(),
            file_name_prefix: name,
            region: tile.geometry,
            scale_m: self.settings.scale_m,
            crs: self.settings.crs,
            max_pixels: self.settings.max_pixels,
        }
    }

    fn export_tile(&self, tile: &Tile, year: i32, footprints: &[BoundingBox], composite: &Arc<Raster>) -> TileOutcome {
        let scene_count = count_contributing(tile, footprints);
        if scene_count == 0 {
            log::warn!("⚠️  Tile {} has no images, skipping", tile.index);
            return TileOutcome::Skipped { tile_index: tile.index };
        }

        let request = self.request_for(tile, year, composite);
        match self.retry.run(&request.description, || self.destination.submit(&request)) {
            Ok((task, attempts)) => {
                log::info!("📤 Export started for tile {} ({} scenes): {}", tile.index, scene_count, task.id);
                TileOutcome::Submitted {
                    tile_index: tile.index,
                    scene_count,
                    attempts,
                    task,
                }
            }
            Err(e) => {
                log::error!("❌ Export of tile {} failed: {}", tile.index, e);
                TileOutcome::Failed {
                    tile_index: tile.index,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Export every tile of the grid; failures are recorded per tile.
    ///
    /// Errors only when the composite is unusable for any tile.
    pub fn export_tiles(
        &self,
        year: i32,
        tiles: &[Tile],
        footprints: &[BoundingBox],
        composite: Arc<Raster>,
    ) -> MosaicResult<ExportReport> {
        if composite.band_count() == 0 {
            return Err(MosaicError::Processing("Composite has no bands to export".to_string()));
        }
        log::info!("Exporting {} tiles for {} to folder '{}'", tiles.len(), year, self.settings.folder);

        #[cfg(feature = "parallel")]
        let mut outcomes: Vec<TileOutcome> = {
            use rayon::prelude::*;
            tiles
                .par_iter()
                .map(|tile| self.export_tile(tile, year, footprints, &composite))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let mut outcomes: Vec<TileOutcome> = tiles
            .iter()
            .map(|tile| self.export_tile(tile, year, footprints, &composite))
            .collect();

        outcomes.sort_by_key(|o| o.tile_index());
        let report = ExportReport { outcomes };

        log::info!(
            "✅ Exports: {} submitted, {} skipped, {} failed",
            report.submitted().len(),
            report.skipped().len(),
            report.failed().len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::destination::TaskState;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let (value, attempts) = RetryPolicy::immediate(3)
            .run("flaky", || {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(MosaicError::Transient("busy".to_string()))
                } else {
                    Ok(7)
                }
            })
            .unwrap();
        assert_eq!((value, attempts), (7, 3));
    }

    #[test]
    fn test_retry_stops_on_permanent_failure() {
        let calls = AtomicU32::new(0);
        let result: MosaicResult<((), u32)> = RetryPolicy::immediate(5).run("broken", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MosaicError::Config("bad crs".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_report_views() {
        let task = ExportTask {
            id: "t".to_string(),
            description: "2021_tile_0".to_string(),
            target: "tiles/2021_tile_0.tif".into(),
            state: TaskState::Submitted,
        };
        let report = ExportReport {
            outcomes: vec![
                TileOutcome::Submitted { tile_index: 0, scene_count: 2, attempts: 1, task },
                TileOutcome::Skipped { tile_index: 1 },
                TileOutcome::Failed { tile_index: 2, error: "x".to_string() },
            ],
        };
        assert_eq!(report.submitted().len(), 1);
        assert_eq!(report.skipped(), vec![1]);
        assert_eq!(report.failed(), vec![(2, "x")]);
    }
}
