use std::path::Path;

use log::{info, warn};

mod errors;
pub mod catalog;
pub mod config;
pub mod gate;
pub mod geom;
pub mod io;
pub mod manifest;
pub mod overlap;
pub mod params;
pub mod pipeline;
pub mod tools;
#[cfg(test)]
mod testing;

pub use crate::config::PipelineOptions;
pub use crate::errors::{PipelineError, Result};
pub use crate::geom::{Footprint, Vec2D, Wcs};
pub use crate::io::Instrument;
pub use crate::manifest::{ImageStage, Step, StepGate};
pub use crate::overlap::{filter_overlapping, Reproject, WcsReprojector};
pub use crate::pipeline::{Pipeline, RunSummary};
pub use crate::tools::{SystemToolRunner, ToolRunner};

/// Read pipeline options from `filename`, writing the documented defaults
/// there first if it does not exist yet.
pub fn load_options(filename: &Path) -> Result<PipelineOptions> {
    match PipelineOptions::from_yaml(filename) {
        Ok(options) => Ok(options),
        Err(PipelineError::IOError(e)) => {
            match e.kind() {
                std::io::ErrorKind::NotFound => (),
                _ => return Err(PipelineError::IOError(e)),
            }
            // file doesn't exist, create one with defaults
            let options = PipelineOptions::documented();
            options.to_yaml(filename)?;
            warn!("{} not found, wrote default options", filename.display());
            Ok(options)
        }
        Err(e) => Err(e),
    }
}

/// Default system pipeline for `workdir`.
pub fn system_pipeline(
    workdir: &Path,
    options: PipelineOptions,
) -> Pipeline<SystemToolRunner, WcsReprojector> {
    info!("working in {}", workdir.display());
    Pipeline::new(workdir, options, SystemToolRunner, WcsReprojector)
}
