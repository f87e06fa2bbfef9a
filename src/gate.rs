//! Filesystem checks deciding whether a processing step has already run.
//!
//! The existence of a derived file is the only signal that a step finished;
//! none of these checks fail when the output is missing.

use std::path::{Path, PathBuf};

use crate::io::hdu_summaries;
use crate::{PipelineError, Result};

/// completion marker of the full photometry run
pub const DOLPHOT_OUTPUT: &str = "dp.out";

/// `a.fits` with `.sky.fits` becomes `a.sky.fits`; the suffix is appended when
/// the image has no `.fits` extension
pub fn derived_path(image: &Path, derived_suffix: &str) -> PathBuf {
    let name = image
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".fits").unwrap_or(&name);
    image.with_file_name(format!("{}{}", stem, derived_suffix))
}

/// true iff the derived output of `image` does not exist yet
pub fn needs_step(image: &Path, derived_suffix: &str) -> bool {
    !derived_path(image, derived_suffix).exists()
}

pub fn needs_to_calc_sky(image: &Path) -> bool {
    needs_step(image, ".sky.fits")
}

/// chips written by splitgroups for `image`, in name order
pub fn split_images(image: &Path) -> Result<Vec<PathBuf>> {
    let escaped = glob::Pattern::escape(&derived_path(image, "").to_string_lossy());
    let pattern = format!("{}.chip?.fits", escaped);
    glob::glob(&pattern)?
        .map(|path| path.map_err(PipelineError::from))
        .collect()
}

pub fn needs_to_split_groups(image: &Path) -> Result<bool> {
    Ok(split_images(image)?.is_empty())
}

/// Masking nulls every non-science extension, so any data-carrying HDU that
/// is not SCI means the mask has not been applied.
pub fn needs_to_be_masked(image: &Path) -> Result<bool> {
    Ok(hdu_summaries(image)?
        .iter()
        .any(|hdu| hdu.has_data() && hdu.extname.is_some() && !hdu.is_science()))
}

pub fn need_to_run_dolphot(workdir: &Path) -> bool {
    !workdir.join(DOLPHOT_OUTPUT).exists()
}
