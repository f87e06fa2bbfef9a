use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::io::Instrument;
use crate::overlap::DEFAULT_OVERLAP_THRESHOLD;
use crate::params::{dolphot_defaults, image_defaults, CalcSkyParams, ParameterSet};
use crate::{PipelineError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "snhst.yaml";

fn default_threshold() -> f64 {
    DEFAULT_OVERLAP_THRESHOLD
}

/// User options for a reduction, usually read from `snhst.yaml`.
///
/// Per-image tables are keyed by instrument and detector (`acs_wfc`,
/// `wfc3_uvis`, ...) and override the built-in recommendations.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PipelineOptions {
    /// DOLPHOT master parameters
    #[serde(default)]
    pub dolphot: ParameterSet,
    /// DOLPHOT per-image parameter overrides
    #[serde(default)]
    pub dolphot_img: BTreeMap<String, ParameterSet>,
    /// calcsky overrides
    #[serde(default)]
    pub dolphot_sky: BTreeMap<String, CalcSkyParams>,
    /// minimum covered fraction of a chip for it to take part in photometry
    #[serde(default = "default_threshold")]
    pub overlap_threshold: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            dolphot: ParameterSet::new(),
            dolphot_img: BTreeMap::new(),
            dolphot_sky: BTreeMap::new(),
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

impl PipelineOptions {
    /// options with every default spelled out, as written for a new config
    pub fn documented() -> Self {
        PipelineOptions {
            dolphot: dolphot_defaults(),
            ..Default::default()
        }
    }

    pub fn from_yaml(filename: &Path) -> Result<PipelineOptions> {
        let contents = std::fs::read_to_string(filename)?;
        let options: PipelineOptions = serde_yaml::from_str(&contents)?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_yaml(&self, filename: &Path) -> Result<()> {
        std::fs::write(filename, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.overlap_threshold) {
            return Err(PipelineError::InvalidParameter(format!(
                "overlap_threshold must be between 0 and 1, got {}",
                self.overlap_threshold
            )));
        }
        Ok(())
    }

    /// master parameters with the DOLPHOT defaults filled in
    pub fn master_parameters(&self) -> ParameterSet {
        let mut master = self.dolphot.clone();
        master.merge_defaults(&dolphot_defaults());
        master
    }

    pub fn image_parameters(&self, instrument: &Instrument) -> Result<ParameterSet> {
        let key = instrument.key();
        let mut params = image_defaults(&key)?;
        if let Some(overrides) = self.dolphot_img.get(&key) {
            params.apply(overrides);
        }
        Ok(params)
    }

    pub fn calcsky_parameters(&self, instrument: &Instrument) -> Result<CalcSkyParams> {
        let key = instrument.key();
        match self.dolphot_sky.get(&key) {
            Some(params) => Ok(*params),
            None => CalcSkyParams::for_detector(&key),
        }
    }
}
