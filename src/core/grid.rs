use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, MosaicError, MosaicResult, KM_PER_DEG_LAT, KM_PER_DEG_LON};

/// Tolerance on cell counts so an exact multiple does not produce a sliver
const CELL_COUNT_EPSILON: f64 = 1e-9;

/// One cell of the AOI export grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// Row-major position in the grid (0 = north-west tile)
    pub index: usize,
    /// Grid row, counted from the north edge
    pub row: usize,
    /// Grid column, counted from the west edge
    pub col: usize,
    /// Tile outline in WGS84 degrees
    pub geometry: BoundingBox,
}

impl Tile {
    /// Deterministic export name, `{year}_tile_{index}`
    pub fn export_name(&self, year: i32) -> String {
        format!("{}_tile_{}", year, self.index)
    }
}

/// Tile dimensions for the grid
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TileSize {
    pub width_km: f64,
    pub height_km: f64,
}

impl Default for TileSize {
    fn default() -> Self {
        Self {
            width_km: 50.0,
            height_km: 50.0,
        }
    }
}

impl TileSize {
    /// Tile size in degrees using the fixed km-per-degree factors.
    ///
    /// Approximate on purpose: tiles only partition exports, nothing
    /// area-sensitive is computed from them.
    pub fn in_degrees(&self) -> (f64, f64) {
        (self.width_km / KM_PER_DEG_LON, self.height_km / KM_PER_DEG_LAT)
    }
}

/// Regular fishnet over the AOI bounding rectangle
#[derive(Debug, Clone)]
pub struct GridPartitioner {
    tile_size: TileSize,
}

impl GridPartitioner {
    pub fn new(tile_size: TileSize) -> MosaicResult<Self> {
        if !(tile_size.width_km > 0.0 && tile_size.height_km > 0.0)
            || !tile_size.width_km.is_finite()
            || !tile_size.height_km.is_finite()
        {
            return Err(MosaicError::Config(format!(
                "Tile size must be positive, got {} x {} km",
                tile_size.width_km, tile_size.height_km
            )));
        }
        Ok(Self { tile_size })
    }

    /// Number of (rows, cols) the AOI splits into
    pub fn grid_shape(&self, aoi: &BoundingBox) -> (usize, usize) {
        let (dx, dy) = self.tile_size.in_degrees();
        let cols = ((aoi.width() / dx) - CELL_COUNT_EPSILON).ceil().max(1.0) as usize;
        let rows = ((aoi.height() / dy) - CELL_COUNT_EPSILON).ceil().max(1.0) as usize;
        (rows, cols)
    }

    /// Partition the AOI into row-major tiles.
    ///
    /// Tiles cover the rectangle without gaps; neighbours share exactly one
    /// seam edge and the last row/column is clipped to the AOI.
    pub fn partition(&self, aoi: &BoundingBox) -> MosaicResult<Vec<Tile>> {
        if !aoi.is_valid() {
            return Err(MosaicError::Config(format!("Invalid AOI bounding box: {:?}", aoi)));
        }

        let (dx, dy) = self.tile_size.in_degrees();
        let (rows, cols) = self.grid_shape(aoi);

        log::info!("🗺️  Partitioning AOI into {} x {} tiles ({} total)", rows, cols, rows * cols);
        log::debug!("Tile size: {:.6}° x {:.6}°", dx, dy);

        // Seam coordinates computed once so adjacent tiles share identical edges
        let lon_edges: Vec<f64> = (0..=cols)
            .map(|c| if c == cols { aoi.max_lon } else { aoi.min_lon + c as f64 * dx })
            .collect();
        let lat_edges: Vec<f64> = (0..=rows)
            .map(|r| if r == rows { aoi.min_lat } else { aoi.max_lat - r as f64 * dy })
            .collect();

        let mut tiles = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                tiles.push(Tile {
                    index: row * cols + col,
                    row,
                    col,
                    geometry: BoundingBox {
                        min_lon: lon_edges[col],
                        max_lon: lon_edges[col + 1],
                        min_lat: lat_edges[row + 1],
                        max_lat: lat_edges[row],
                    },
                });
            }
        }

        Ok(tiles)
    }
}

/// Convenience wrapper: partition an AOI with tiles of `width_km` x `height_km`
pub fn make_grid(aoi: &BoundingBox, width_km: f64, height_km: f64) -> MosaicResult<Vec<Tile>> {
    GridPartitioner::new(TileSize { width_km, height_km })?.partition(aoi)
}
