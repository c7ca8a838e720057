//! GDAL virtual raster (VRT) documents

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{MosaicError, MosaicResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VrtDataset {
    #[serde(rename = "@rasterXSize")]
    pub raster_x_size: usize,
    #[serde(rename = "@rasterYSize")]
    pub raster_y_size: usize,
    #[serde(rename = "SRS")]
    pub srs: String,
    /// Comma-separated six-term affine transform
    #[serde(rename = "GeoTransform")]
    pub geo_transform: String,
    #[serde(rename = "VRTRasterBand", default)]
    pub bands: Vec<VrtRasterBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VrtRasterBand {
    #[serde(rename = "@dataType")]
    pub data_type: String,
    #[serde(rename = "@band")]
    pub band: usize,
    #[serde(rename = "NoDataValue")]
    pub no_data_value: String,
    #[serde(rename = "SimpleSource", default)]
    pub sources: Vec<VrtSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VrtSource {
    #[serde(rename = "SourceFilename")]
    pub source_filename: SourceFilename,
    #[serde(rename = "SourceBand")]
    pub source_band: usize,
    #[serde(rename = "SrcRect")]
    pub src_rect: VrtRect,
    #[serde(rename = "DstRect")]
    pub dst_rect: VrtRect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFilename {
    #[serde(rename = "@relativeToVRT")]
    pub relative_to_vrt: u8,
    #[serde(rename = "$text")]
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrtRect {
    #[serde(rename = "@xOff")]
    pub x_off: i64,
    #[serde(rename = "@yOff")]
    pub y_off: i64,
    #[serde(rename = "@xSize")]
    pub x_size: usize,
    #[serde(rename = "@ySize")]
    pub y_size: usize,
}

impl VrtDataset {
    pub fn to_xml(&self) -> MosaicResult<String> {
        quick_xml::se::to_string_with_root("VRTDataset", self)
            .map_err(|e| MosaicError::Xml(format!("Failed to serialize VRT: {}", e)))
    }

    pub fn from_xml(xml: &str) -> MosaicResult<Self> {
        quick_xml::de::from_str(xml).map_err(|e| MosaicError::Xml(format!("Failed to parse VRT: {}", e)))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> MosaicResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_xml()?)?;
        log::debug!("Wrote VRT index: {}", path.display());
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> MosaicResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_xml(&content)
    }

    /// The six geotransform terms
    pub fn transform_terms(&self) -> MosaicResult<[f64; 6]> {
        let terms: Vec<f64> = self
            .geo_transform
            .split(',')
            .map(|t| t.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| MosaicError::Xml(format!("Bad GeoTransform '{}': {}", self.geo_transform, e)))?;
        terms
            .try_into()
            .map_err(|_| MosaicError::Xml(format!("GeoTransform needs 6 terms: '{}'", self.geo_transform)))
    }
}

/// Format a GDAL geotransform the way VRT files store it
pub fn format_transform(gt: &[f64; 6]) -> String {
    gt.iter()
        .map(|v| format!("{:e}", v))
        .collect::<Vec<_>>()
        .join(", ")
}
