use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::io::vrt::VrtDataset;
use crate::types::{Crs, GeoTransform, MosaicError, MosaicResult, Raster};

/// Compression applied when writing rasters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
}

impl Compression {
    /// GDAL `COMPRESS` creation option value
    pub fn gdal_name(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Lzw => Some("LZW"),
            Compression::Deflate => Some("DEFLATE"),
        }
    }
}

/// Raster creation options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    pub compression: Compression,
    /// Allow files larger than 4 GiB
    pub big_tiff: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Lzw,
            big_tiff: false,
        }
    }
}

impl WriteOptions {
    /// Lossless compression with large-file support, for merged mosaics
    pub fn mosaic() -> Self {
        Self {
            compression: Compression::Lzw,
            big_tiff: true,
        }
    }
}

/// Header information of a raster file
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl RasterInfo {
    pub fn describe_raster(path: &Path, raster: &Raster) -> Self {
        let (height, width) = raster.shape();
        Self {
            path: path.to_path_buf(),
            width,
            height,
            band_count: raster.band_count(),
            transform: raster.transform,
            crs: raster.crs,
        }
    }
}

/// Raster file access used by the export, mosaic and clip stages
pub trait RasterStore: Send + Sync {
    /// Read header information without pixels
    fn describe(&self, path: &Path) -> MosaicResult<RasterInfo>;

    /// Read every band; the file's no-data value becomes NaN
    fn read(&self, path: &Path) -> MosaicResult<Raster>;

    /// Create or overwrite a raster file
    fn write(&self, path: &Path, raster: &Raster, options: &WriteOptions) -> MosaicResult<()>;

    /// Files directly inside `dir` with the given extension, sorted by path
    fn list(&self, dir: &Path, extension: &str) -> MosaicResult<Vec<PathBuf>>;

    fn exists(&self, path: &Path) -> bool;

    fn remove(&self, path: &Path) -> MosaicResult<()>;

    /// Persist a virtual mosaic index next to the rasters it references
    fn write_index(&self, path: &Path, index: &VrtDataset) -> MosaicResult<()> {
        index.write(path)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// List files of a local directory by extension
pub fn list_directory(dir: &Path, extension: &str) -> MosaicResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// In-process raster store keyed by path
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<PathBuf, (Raster, WriteOptions)>>,
    indexes: Mutex<HashMap<PathBuf, VrtDataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raster as if it had been written with default options
    pub fn insert<P: AsRef<Path>>(&self, path: P, raster: Raster) -> MosaicResult<()> {
        self.write(path.as_ref(), &raster, &WriteOptions::default())
    }

    /// Options the file was written with
    pub fn options_of(&self, path: &Path) -> Option<WriteOptions> {
        self.files.lock().ok()?.get(path).map(|(_, options)| *options)
    }

    /// Virtual index written to `path`
    pub fn index_of(&self, path: &Path) -> Option<VrtDataset> {
        self.indexes.lock().ok()?.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MosaicResult<std::sync::MutexGuard<'_, HashMap<PathBuf, (Raster, WriteOptions)>>> {
        self.files
            .lock()
            .map_err(|_| MosaicError::Processing("Memory store lock poisoned".to_string()))
    }
}

impl RasterStore for MemoryStore {
    fn describe(&self, path: &Path) -> MosaicResult<RasterInfo> {
        let files = self.lock()?;
        let (raster, _) = files
            .get(path)
            .ok_or_else(|| MosaicError::MissingInput(format!("{} does not exist", path.display())))?;
        Ok(RasterInfo::describe_raster(path, raster))
    }

    fn read(&self, path: &Path) -> MosaicResult<Raster> {
        let files = self.lock()?;
        files
            .get(path)
            .map(|(raster, _)| raster.clone())
            .ok_or_else(|| MosaicError::MissingInput(format!("{} does not exist", path.display())))
    }

    fn write(&self, path: &Path, raster: &Raster, options: &WriteOptions) -> MosaicResult<()> {
        self.lock()?.insert(path.to_path_buf(), (raster.clone(), *options));
        Ok(())
    }

    fn list(&self, dir: &Path, extension: &str) -> MosaicResult<Vec<PathBuf>> {
        let files = self.lock()?;
        let mut paths: Vec<PathBuf> = files
            .keys()
            .filter(|p| p.parent() == Some(dir) && has_extension(p, extension))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().map(|f| f.contains_key(path)).unwrap_or(false)
            || self.indexes.lock().map(|i| i.contains_key(path)).unwrap_or(false)
    }

    fn remove(&self, path: &Path) -> MosaicResult<()> {
        self.lock()?
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| MosaicError::MissingInput(format!("{} does not exist", path.display())))
    }

    fn write_index(&self, path: &Path, index: &VrtDataset) -> MosaicResult<()> {
        self.indexes
            .lock()
            .map_err(|_| MosaicError::Processing("Memory store lock poisoned".to_string()))?
            .insert(path.to_path_buf(), index.clone());
        Ok(())
    }
}
