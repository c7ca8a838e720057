//! Binary morphology on cloud/shadow masks with circular kernels

use ndarray::{Array2, Zip};

use crate::types::Mask;

/// Focal reduction applied over a kernel neighbourhood
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FocalOp {
    /// True only if every neighbour is true (erosion)
    Min,
    /// True if any neighbour is true (dilation)
    Max,
}

/// Offsets of a circular kernel of the given radius (pixels)
pub fn circle_kernel(radius: f64) -> Vec<(isize, isize)> {
    let r = radius.max(0.0);
    let extent = r.floor() as isize;
    let r2 = r * r;
    let mut offsets = Vec::new();
    for di in -extent..=extent {
        for dj in -extent..=extent {
            if (di * di + dj * dj) as f64 <= r2 {
                offsets.push((di, dj));
            }
        }
    }
    offsets
}

/// Erosion: a pixel stays true only if its whole circular neighbourhood is true.
///
/// Neighbours outside the raster are ignored, matching a masked border.
pub fn focal_min(mask: &Mask, radius: f64) -> Mask {
    focal_reduce(mask, radius, FocalOp::Min)
}

/// Dilation: a pixel becomes true if any neighbour within the radius is true
pub fn focal_max(mask: &Mask, radius: f64) -> Mask {
    focal_reduce(mask, radius, FocalOp::Max)
}

/// Opening with independent radii: erode then dilate
pub fn open_then_buffer(mask: &Mask, erode_radius: f64, dilate_radius: f64) -> Mask {
    let eroded = focal_min(mask, erode_radius);
    focal_max(&eroded, dilate_radius)
}

fn focal_reduce(mask: &Mask, radius: f64, op: FocalOp) -> Mask {
    let kernel = circle_kernel(radius);
    let (height, width) = mask.dim();
    let mut result = Array2::from_elem((height, width), false);

    let reduce = |(i, j): (usize, usize), out: &mut bool| {
        let mut neighbours = kernel.iter().filter_map(|&(di, dj)| {
            let ni = i as isize + di;
            let nj = j as isize + dj;
            if ni < 0 || nj < 0 || ni >= height as isize || nj >= width as isize {
                None
            } else {
                Some(mask[[ni as usize, nj as usize]])
            }
        });
        *out = match op {
            FocalOp::Min => neighbours.all(|v| v),
            FocalOp::Max => neighbours.any(|v| v),
        };
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut result).par_for_each(reduce);

    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut result).for_each(reduce);

    result
}
