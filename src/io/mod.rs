//! Input/output: scene catalogs, raster storage, export destinations and vector boundaries

pub mod catalog;
pub mod cutline;
pub mod destination;
#[cfg(feature = "gdal")]
pub mod geotiff;
pub mod store;
pub mod vrt;

pub use catalog::{CatalogManifest, ManifestCatalog, ManifestScene, MemoryCatalog, SceneCatalog, SceneQuery};
pub use cutline::{Cutline, Polygon};
pub use destination::{ExportDestination, ExportRequest, ExportTask, LocalDirectoryDestination, TaskState};
#[cfg(feature = "gdal")]
pub use geotiff::GdalStore;
pub use store::{Compression, MemoryStore, RasterInfo, RasterStore, WriteOptions};
pub use vrt::VrtDataset;
