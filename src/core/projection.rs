//! Coordinate transforms between WGS84 and UTM grids (proj4rs)

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use std::fmt;

use crate::types::{Crs, MosaicError, MosaicResult};

/// PROJ definition of a supported CRS
fn proj_string(crs: Crs) -> String {
    match crs {
        Crs::Geographic => "+proj=longlat +ellps=WGS84 +no_defs".to_string(),
        Crs::Utm { zone, north } => format!(
            "+proj=utm +zone={}{} +ellps=WGS84 +units=m +no_defs",
            zone,
            if north { "" } else { " +south" }
        ),
    }
}

fn build_proj(crs: Crs) -> MosaicResult<Proj> {
    Proj::from_proj_string(&proj_string(crs))
        .map_err(|e| MosaicError::Config(format!("Invalid projection for {}: {:?}", crs, e)))
}

/// Reusable point transform from one CRS to another
pub struct CrsTransform {
    source: Crs,
    target: Crs,
    projs: Option<(Proj, Proj)>,
}

impl fmt::Debug for CrsTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrsTransform")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl CrsTransform {
    pub fn new(source: Crs, target: Crs) -> MosaicResult<Self> {
        let projs = if source == target {
            None
        } else {
            Some((build_proj(source)?, build_proj(target)?))
        };
        Ok(Self { source, target, projs })
    }

    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform one point; geographic coordinates are degrees
    pub fn transform(&self, x: f64, y: f64) -> MosaicResult<(f64, f64)> {
        let Some((source_proj, target_proj)) = &self.projs else {
            return Ok((x, y));
        };

        let mut point = if self.source.is_projected() {
            (x, y, 0.0)
        } else {
            (x.to_radians(), y.to_radians(), 0.0)
        };
        transform(source_proj, target_proj, &mut point).map_err(|e| {
            MosaicError::Processing(format!(
                "Cannot transform ({}, {}) from {} to {}: {:?}",
                x, y, self.source, self.target, e
            ))
        })?;

        if self.target.is_projected() {
            Ok((point.0, point.1))
        } else {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        }
    }
}
