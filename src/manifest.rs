//! Persistent per-image stage record, reconciled against the filesystem gates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::gate::{
    need_to_run_dolphot, needs_to_be_masked, needs_to_calc_sky, needs_to_split_groups,
};
use crate::Result;

pub const MANIFEST_FILE: &str = "pipeline_state.yaml";

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ImageStage {
    #[default]
    Raw,
    Masked,
    Split,
    SkyComputed,
    Done,
}

impl ImageStage {
    fn previous(self) -> ImageStage {
        match self {
            ImageStage::Raw | ImageStage::Masked => ImageStage::Raw,
            ImageStage::Split => ImageStage::Masked,
            ImageStage::SkyComputed => ImageStage::Split,
            ImageStage::Done => ImageStage::SkyComputed,
        }
    }
}

/// A gated processing step and the stage it leaves an image in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    Mask,
    SplitGroups,
    CalcSky,
    Photometry,
}

impl Step {
    pub fn completed_stage(self) -> ImageStage {
        match self {
            Step::Mask => ImageStage::Masked,
            Step::SplitGroups => ImageStage::Split,
            Step::CalcSky => ImageStage::SkyComputed,
            Step::Photometry => ImageStage::Done,
        }
    }

    /// filesystem evidence that the step ran for `image` inside `workdir`
    fn observed(self, workdir: &Path, image: &Path) -> Result<bool> {
        let path = workdir.join(image);
        Ok(match self {
            Step::Mask => !needs_to_be_masked(&path)?,
            Step::SplitGroups => !needs_to_split_groups(&path)?,
            Step::CalcSky => !needs_to_calc_sky(&path),
            Step::Photometry => !need_to_run_dolphot(workdir),
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Manifest {
    #[serde(default)]
    pub images: BTreeMap<String, ImageStage>,
}

impl Manifest {
    /// load manifest, or an empty one if the file does not exist
    pub fn from_yaml(filename: &Path) -> Result<Manifest> {
        match std::fs::read_to_string(filename) {
            Ok(contents) => Ok(serde_yaml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn to_yaml(&self, filename: &Path) -> Result<()> {
        std::fs::write(filename, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn stage(&self, image: &str) -> ImageStage {
        self.images.get(image).copied().unwrap_or_default()
    }

    /// raise the recorded stage, never lowering it
    pub fn advance(&mut self, image: &str, stage: ImageStage) {
        let entry = self.images.entry(image.to_string()).or_default();
        *entry = (*entry).max(stage);
    }

    pub fn set(&mut self, image: &str, stage: ImageStage) {
        self.images.insert(image.to_string(), stage);
    }
}

/// Step gate backed by the manifest of one work directory.
///
/// The filesystem wins every disagreement: a marker found on disk is adopted
/// into the record, and a recorded step whose marker is gone is run again.
pub struct StepGate {
    workdir: PathBuf,
    manifest: Manifest,
}

impl StepGate {
    pub fn open(workdir: &Path) -> Result<StepGate> {
        let manifest = Manifest::from_yaml(&workdir.join(MANIFEST_FILE))?;
        Ok(StepGate {
            workdir: workdir.to_path_buf(),
            manifest,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn save(&self) -> Result<()> {
        self.manifest.to_yaml(&self.workdir.join(MANIFEST_FILE))
    }

    /// true if `step` still has to run for `image` (a path relative to the
    /// work directory)
    pub fn needs(&mut self, image: &Path, step: Step) -> Result<bool> {
        let key = image.to_string_lossy();
        let stage = step.completed_stage();
        let recorded = self.manifest.stage(&key) >= stage;
        let observed = step.observed(&self.workdir, image)?;
        match (recorded, observed) {
            (true, true) => {
                debug!("{:?} already done for {}", step, key);
                Ok(false)
            }
            (false, true) => {
                info!("found output of {:?} for {} on disk, recording it", step, key);
                self.manifest.advance(&key, stage);
                self.save()?;
                Ok(false)
            }
            (true, false) => {
                warn!(
                    "{} is recorded as {:?} but the output of {:?} is missing, rerunning",
                    key,
                    self.manifest.stage(&key),
                    step
                );
                self.manifest.set(&key, stage.previous());
                self.save()?;
                Ok(true)
            }
            (false, false) => Ok(true),
        }
    }

    pub fn complete(&mut self, image: &Path, step: Step) -> Result<()> {
        self.manifest
            .advance(&image.to_string_lossy(), step.completed_stage());
        self.save()
    }

    /// run the gate for each of `steps` on `image` and return its stage
    pub fn reconcile(&mut self, image: &Path, steps: &[Step]) -> Result<ImageStage> {
        for step in steps {
            self.needs(image, *step)?;
        }
        Ok(self.manifest.stage(&image.to_string_lossy()))
    }
}
