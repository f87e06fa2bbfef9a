use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::Array2;

use crate::io::ImageGeometry;
use crate::{Footprint, PipelineError, Result, Vec2D};

/// chips covering less than this fraction of the reference are left out
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.10;

pub trait Reproject {
    /// footprint of `reference` resampled onto the pixel grid of `target`
    fn footprint(&self, reference: &Path, target: &Path) -> Result<Footprint>;

    fn coverage(&self, reference: &Path, target: &Path) -> Result<f64> {
        Ok(self.footprint(reference, target)?.coverage_fraction())
    }
}

/// Nearest-pixel footprint mapping through the TAN WCS of both images.
///
/// Only coverage is computed; pixel values are never resampled.
#[derive(Clone, Copy, Debug, Default)]
pub struct WcsReprojector;

impl Reproject for WcsReprojector {
    fn footprint(&self, reference: &Path, target: &Path) -> Result<Footprint> {
        let source = ImageGeometry::from_fits(reference)?;
        let grid = ImageGeometry::from_fits(target)?;
        let [ref_rows, ref_cols] = source.shape;
        let inside = |v: f64, n: usize| v >= 0.5 && v < n as f64 + 0.5;

        let mask = Array2::from_shape_fn((grid.shape[0], grid.shape[1]), |(row, col)| {
            let pixel = Vec2D {
                x: col as f64 + 1.0,
                y: row as f64 + 1.0,
            };
            let sky = grid.wcs.pixel_to_sky(pixel);
            match source.wcs.sky_to_pixel(sky) {
                Some(p) => inside(p.x, ref_cols) && inside(p.y, ref_rows),
                None => false,
            }
        });
        Ok(Footprint::new(mask))
    }
}

/// Keep the candidates onto which at least `threshold` of their pixels are
/// covered by `reference`, preserving order. Any reprojection failure aborts.
pub fn filter_overlapping<R: Reproject>(
    reprojector: &R,
    reference: &Path,
    candidates: &[PathBuf],
    threshold: f64,
) -> Result<Vec<PathBuf>> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::InvalidParameter(format!(
            "overlap threshold must be between 0 and 1, got {}",
            threshold
        )));
    }
    let mut overlapping = vec![];
    for candidate in candidates {
        let footprint = reprojector.footprint(reference, candidate)?;
        debug!(
            "{} covers {:.1}% of {}",
            reference.display(),
            100.0 * footprint.coverage_fraction(),
            candidate.display()
        );
        if footprint.overlaps(threshold) {
            overlapping.push(candidate.clone());
        }
    }
    info!(
        "{} of {} images overlap {}",
        overlapping.len(),
        candidates.len(),
        reference.display()
    );
    Ok(overlapping)
}
