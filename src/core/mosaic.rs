use ndarray::{s, Array3, Zip};
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::io::store::{RasterInfo, RasterStore, WriteOptions};
use crate::io::vrt::{format_transform, SourceFilename, VrtDataset, VrtRasterBand, VrtRect, VrtSource};
use crate::types::{Crs, GeoTransform, MosaicError, MosaicResult, Raster, NODATA};

/// Exported tile file names: `{year}_tile_{index}.tif`, optionally split into
/// `{year}_tile_{index}-{row offset}-{col offset}.tif` shards
const TILE_NAME_PATTERN: &str = r"(?i)^(\d{4})_tile_(\d+)(?:-\d+-\d+)?\.tif$";

/// Placement of one input raster in the mosaic grid
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicSource {
    pub info: RasterInfo,
    pub col_offset: usize,
    pub row_offset: usize,
}

/// Virtual mosaic: the union grid of all inputs, pixels left in place
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicIndex {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub sources: Vec<MosaicSource>,
}

impl MosaicIndex {
    /// Lay out compatible rasters on their common grid.
    ///
    /// Inputs must share CRS, pixel size and band count.
    pub fn build(infos: Vec<RasterInfo>) -> MosaicResult<Self> {
        let first = infos
            .first()
            .ok_or_else(|| MosaicError::MissingInput("No rasters to index".to_string()))?
            .clone();

        for info in &infos[1..] {
            if info.crs != first.crs {
                return Err(MosaicError::Processing(format!(
                    "{} is in {}, expected {}",
                    info.path.display(),
                    info.crs,
                    first.crs
                )));
            }
            if !info.transform.same_resolution(&first.transform) {
                return Err(MosaicError::Processing(format!(
                    "{} has pixel size {} x {}, expected {} x {}",
                    info.path.display(),
                    info.transform.pixel_width,
                    info.transform.pixel_height,
                    first.transform.pixel_width,
                    first.transform.pixel_height
                )));
            }
            if info.band_count != first.band_count {
                return Err(MosaicError::Processing(format!(
                    "{} has {} bands, expected {}",
                    info.path.display(),
                    info.band_count,
                    first.band_count
                )));
            }
        }

        let pw = first.transform.pixel_width;
        let ph = first.transform.pixel_height.abs();
        let min_x = infos.iter().map(|i| i.transform.top_left_x).fold(f64::INFINITY, f64::min);
        let max_y = infos.iter().map(|i| i.transform.top_left_y).fold(f64::NEG_INFINITY, f64::max);

        let mut width = 0;
        let mut height = 0;
        let mut sources = Vec::with_capacity(infos.len());
        for info in infos {
            let col = (info.transform.top_left_x - min_x) / pw;
            let row = (max_y - info.transform.top_left_y) / ph;
            if (col - col.round()).abs() > 0.01 || (row - row.round()).abs() > 0.01 {
                log::warn!(
                    "⚠️  {} is not pixel-aligned (offset {:.3}, {:.3}), snapping",
                    info.path.display(),
                    col,
                    row
                );
            }
            let col_offset = col.round() as usize;
            let row_offset = row.round() as usize;
            width = width.max(col_offset + info.width);
            height = height.max(row_offset + info.height);
            sources.push(MosaicSource {
                info,
                col_offset,
                row_offset,
            });
        }

        Ok(Self {
            width,
            height,
            band_count: first.band_count,
            transform: GeoTransform {
                top_left_x: min_x,
                top_left_y: max_y,
                ..first.transform
            },
            crs: first.crs,
            sources,
        })
    }

    pub fn to_vrt(&self) -> VrtDataset {
        let bands = (1..=self.band_count)
            .map(|band| VrtRasterBand {
                data_type: "Float32".to_string(),
                band,
                no_data_value: "nan".to_string(),
                sources: self
                    .sources
                    .iter()
                    .map(|source| VrtSource {
                        source_filename: SourceFilename {
                            relative_to_vrt: 0,
                            path: source.info.path.to_string_lossy().into_owned(),
                        },
                        source_band: band,
                        src_rect: VrtRect {
                            x_off: 0,
                            y_off: 0,
                            x_size: source.info.width,
                            y_size: source.info.height,
                        },
                        dst_rect: VrtRect {
                            x_off: source.col_offset as i64,
                            y_off: source.row_offset as i64,
                            x_size: source.info.width,
                            y_size: source.info.height,
                        },
                    })
                    .collect(),
            })
            .collect();

        VrtDataset {
            raster_x_size: self.width,
            raster_y_size: self.height,
            srs: self.crs.to_string(),
            geo_transform: format_transform(&self.transform.to_gdal()),
            bands,
        }
    }

    /// Read every source and stitch it into one raster.
    ///
    /// Later sources overwrite earlier ones only where they hold valid pixels.
    pub fn materialize(&self, store: &dyn RasterStore) -> MosaicResult<Raster> {
        let mut data = Array3::from_elem((self.band_count, self.height, self.width), NODATA);

        for (i, source) in self.sources.iter().enumerate() {
            log::debug!("Stitching {}/{}: {}", i + 1, self.sources.len(), source.info.path.display());
            let tile = store.read(&source.info.path)?;
            let (rows, cols) = tile.shape();
            if (rows, cols) != (source.info.height, source.info.width) || tile.band_count() != self.band_count {
                return Err(MosaicError::Processing(format!(
                    "{} changed since it was indexed",
                    source.info.path.display()
                )));
            }

            let mut target = data.slice_mut(s![
                ..,
                source.row_offset..source.row_offset + rows,
                source.col_offset..source.col_offset + cols
            ]);
            Zip::from(&mut target).and(&tile.data).for_each(|out, &v| {
                if v.is_finite() {
                    *out = v;
                }
            });
        }

        Ok(Raster::new(data, self.transform, self.crs))
    }
}

/// Outcome of an assembly run
#[derive(Debug, Clone)]
pub struct MosaicSummary {
    pub tiles: Vec<PathBuf>,
    pub vrt_path: PathBuf,
    pub output_path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub crs: Crs,
    pub valid_pixels: usize,
}

/// Year and tile index encoded in an exported file name
pub fn parse_tile_name(pattern: &Regex, path: &Path) -> Option<(i32, usize)> {
    let name = path.file_name()?.to_str()?;
    let captures = pattern.captures(name)?;
    let year = captures.get(1)?.as_str().parse().ok()?;
    let index = captures.get(2)?.as_str().parse().ok()?;
    Some((year, index))
}

/// Merges exported tiles into one compressed raster via a virtual index
pub struct MosaicAssembler<'a> {
    store: &'a dyn RasterStore,
    year: Option<i32>,
    options: WriteOptions,
    pattern: Regex,
}

impl<'a> MosaicAssembler<'a> {
    pub fn new(store: &'a dyn RasterStore) -> MosaicResult<Self> {
        let pattern = Regex::new(TILE_NAME_PATTERN)
            .map_err(|e| MosaicError::Processing(format!("Regex error: {}", e)))?;
        Ok(Self {
            store,
            year: None,
            options: WriteOptions::mosaic(),
            pattern,
        })
    }

    /// Only merge tiles named for this year
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// GeoTIFFs in `dir`, ordered by year and tile index
    pub fn list_tiles(&self, dir: &Path) -> MosaicResult<Vec<PathBuf>> {
        let mut keyed: Vec<(Option<(i32, usize)>, PathBuf)> = self
            .store
            .list(dir, "tif")?
            .into_iter()
            .map(|p| (parse_tile_name(&self.pattern, &p), p))
            .filter(|(key, path)| match (self.year, key) {
                (None, _) => true,
                (Some(year), Some((y, _))) if *y == year => true,
                (Some(year), Some((y, _))) => {
                    log::warn!("⚠️  Ignoring {}: tile of {}, not {}", path.display(), y, year);
                    false
                }
                (Some(_), None) => {
                    log::warn!("⚠️  Ignoring {}: not an exported tile name", path.display());
                    false
                }
            })
            .collect();

        // Named tiles first in (year, index) order, anything else after by path
        keyed.sort_by(|(ka, pa), (kb, pb)| match (ka, kb) {
            (Some(a), Some(b)) => a.cmp(b).then_with(|| pa.cmp(pb)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => pa.cmp(pb),
        });

        if keyed.is_empty() {
            return Err(MosaicError::MissingInput(format!(
                "No GeoTIFF tiles found in {}",
                dir.display()
            )));
        }
        Ok(keyed.into_iter().map(|(_, p)| p).collect())
    }

    /// Describe each tile and build the virtual index
    pub fn build_index(&self, tiles: &[PathBuf]) -> MosaicResult<MosaicIndex> {
        let mut infos = Vec::with_capacity(tiles.len());
        for path in tiles {
            let info = self.store.describe(path)?;
            log::info!(
                "  {}: {} | resolution {} x {} | {} x {} px",
                path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
                info.crs,
                info.transform.pixel_width,
                info.transform.pixel_height,
                info.width,
                info.height
            );
            infos.push(info);
        }
        MosaicIndex::build(infos)
    }

    /// Index every tile in `tiles_dir`, persist the index, and write the merged raster
    pub fn assemble(&self, tiles_dir: &Path, vrt_path: &Path, output_path: &Path) -> MosaicResult<MosaicSummary> {
        log::info!("🧩 Assembling mosaic from {}", tiles_dir.display());

        let tiles = self.list_tiles(tiles_dir)?;
        log::info!("Found {} tiles", tiles.len());

        let index = self.build_index(&tiles)?;
        self.store.write_index(vrt_path, &index.to_vrt())?;
        log::info!("Virtual index: {} ({} x {} px)", vrt_path.display(), index.width, index.height);

        let mosaic = index.materialize(self.store)?;
        self.store.write(output_path, &mosaic, &self.options)?;
        let valid_pixels = mosaic.valid_pixel_count();

        log::info!("✅ Mosaic written: {}", output_path.display());
        Ok(MosaicSummary {
            tiles,
            vrt_path: vrt_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            width: index.width,
            height: index.height,
            crs: index.crs,
            valid_pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryStore;

    fn tile(x: f64, y: f64, value: f32, rows: usize, cols: usize) -> Raster {
        Raster::filled(
            2,
            rows,
            cols,
            value,
            GeoTransform::north_up(x, y, 10.0, 10.0),
            Crs::Utm { zone: 51, north: true },
        )
    }

    #[test]
    fn test_tile_name_parsing() {
        let pattern = Regex::new(TILE_NAME_PATTERN).unwrap();
        assert_eq!(parse_tile_name(&pattern, Path::new("t/2021_tile_12.tif")), Some((2021, 12)));
        assert_eq!(
            parse_tile_name(&pattern, Path::new("t/2021_tile_3-0000000000-0000000256.tif")),
            Some((2021, 3))
        );
        assert_eq!(parse_tile_name(&pattern, Path::new("t/2021_tile_3-0000000000.tif")), None);
        assert_eq!(parse_tile_name(&pattern, Path::new("t/mosaic.tif")), None);
    }

    #[test]
    fn test_listing_keeps_sharded_tiles() {
        let store = MemoryStore::new();
        for name in ["2021_tile_4.tif", "2021_tile_3-0000000000-0000000000.tif", "notes.tif"] {
            store.insert(Path::new("tiles").join(name), tile(0.0, 100.0, 1.0, 2, 2)).unwrap();
        }
        let assembler = MosaicAssembler::new(&store).unwrap().with_year(2021);
        let listed = assembler.list_tiles(Path::new("tiles")).unwrap();
        assert_eq!(
            listed,
            vec![
                PathBuf::from("tiles/2021_tile_3-0000000000-0000000000.tif"),
                PathBuf::from("tiles/2021_tile_4.tif"),
            ]
        );
    }

    #[test]
    fn test_listing_orders_by_index_and_filters_year() {
        let store = MemoryStore::new();
        for name in ["2021_tile_10.tif", "2021_tile_2.tif", "2020_tile_0.tif"] {
            store.insert(Path::new("tiles").join(name), tile(0.0, 100.0, 1.0, 2, 2)).unwrap();
        }
        let assembler = MosaicAssembler::new(&store).unwrap().with_year(2021);
        let listed = assembler.list_tiles(Path::new("tiles")).unwrap();
        assert_eq!(
            listed,
            vec![PathBuf::from("tiles/2021_tile_2.tif"), PathBuf::from("tiles/2021_tile_10.tif")]
        );
    }

    #[test]
    fn test_empty_directory_is_missing_input() {
        let store = MemoryStore::new();
        let assembler = MosaicAssembler::new(&store).unwrap();
        assert!(matches!(
            assembler.list_tiles(Path::new("tiles")),
            Err(MosaicError::MissingInput(_))
        ));
    }

    #[test]
    fn test_index_places_tiles_on_union_grid() {
        let store = MemoryStore::new();
        store.insert("tiles/2021_tile_0.tif", tile(0.0, 100.0, 1.0, 3, 4)).unwrap();
        store.insert("tiles/2021_tile_1.tif", tile(40.0, 100.0, 2.0, 3, 4)).unwrap();
        store.insert("tiles/2021_tile_2.tif", tile(0.0, 70.0, 3.0, 2, 4)).unwrap();

        let assembler = MosaicAssembler::new(&store).unwrap();
        let tiles = assembler.list_tiles(Path::new("tiles")).unwrap();
        let index = assembler.build_index(&tiles).unwrap();
        assert_eq!((index.width, index.height), (8, 5));
        assert_eq!((index.sources[1].col_offset, index.sources[1].row_offset), (4, 0));
        assert_eq!((index.sources[2].col_offset, index.sources[2].row_offset), (0, 3));

        let mosaic = index.materialize(&store).unwrap();
        assert_eq!(mosaic.data[[1, 0, 5]], 2.0);
        assert_eq!(mosaic.data[[0, 4, 1]], 3.0);
        // Gap south of tile 1
        assert!(mosaic.data[[0, 4, 6]].is_nan());
    }

    #[test]
    fn test_incompatible_crs_is_rejected() {
        let store = MemoryStore::new();
        store.insert("tiles/2021_tile_0.tif", tile(0.0, 100.0, 1.0, 2, 2)).unwrap();
        let mut other = tile(20.0, 100.0, 1.0, 2, 2);
        other.crs = Crs::Utm { zone: 50, north: true };
        store.insert("tiles/2021_tile_1.tif", other).unwrap();

        let assembler = MosaicAssembler::new(&store).unwrap();
        let tiles = assembler.list_tiles(Path::new("tiles")).unwrap();
        assert!(matches!(assembler.build_index(&tiles), Err(MosaicError::Processing(_))));
    }
}
