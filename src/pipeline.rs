//! Sequencing of the reduction inside one work directory.
//!
//! Inputs are copied into the work directory and every later step refers to
//! them by file name. Tools are spawned with the work directory as their
//! working directory; the process itself never changes directory.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::PipelineOptions;
use crate::gate::{
    derived_path, need_to_run_dolphot, needs_step, needs_to_split_groups, split_images,
    DOLPHOT_OUTPUT,
};
use crate::io::Instrument;
use crate::manifest::{ImageStage, Step, StepGate};
use crate::overlap::{filter_overlapping, Reproject};
use crate::params::build_parameter_file;
use crate::tools::{
    calc_sky_command, dolphot_command, fakelist_command, mask_command, split_groups_command,
    ToolInvocation, ToolRunner, DOLPHOT_LOG, DOLPHOT_PARAMS, FAKE_LIST, FAKE_LOG, FAKE_OUTPUT,
};
use crate::{PipelineError, Result};

const FAKE_STARS_LINE: &str = "FakeStars = fakelist.out";

/// What a run decided about the images.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// split template chip the photometry is referenced to
    pub template: PathBuf,
    /// chips taking part in photometry, relative to the work directory
    pub overlapping: Vec<PathBuf>,
    /// false when `dp.out` already existed
    pub photometry_ran: bool,
}

pub struct Pipeline<R: ToolRunner, P: Reproject> {
    workdir: PathBuf,
    options: PipelineOptions,
    runner: R,
    reprojector: P,
}

fn local_name(path: &Path) -> Result<PathBuf> {
    path.file_name().map(PathBuf::from).ok_or_else(|| {
        PipelineError::InvalidParameter(format!("{} is not a file", path.display()))
    })
}

impl<R: ToolRunner, P: Reproject> Pipeline<R, P> {
    pub fn new(workdir: &Path, options: PipelineOptions, runner: R, reprojector: P) -> Self {
        Pipeline {
            workdir: workdir.to_path_buf(),
            options,
            runner,
            reprojector,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn path(&self, image: &Path) -> PathBuf {
        self.workdir.join(image)
    }

    /// Run `invocation`; if it fails, delete whatever of `outputs` it left
    /// behind so the gates see the step as not done.
    fn run_producing(&self, invocation: &ToolInvocation, outputs: &[PathBuf]) -> Result<()> {
        match self.runner.run_checked(invocation) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.discard(&invocation.program, outputs)?;
                Err(e)
            }
        }
    }

    fn discard(&self, program: &str, outputs: &[PathBuf]) -> Result<()> {
        for output in outputs {
            if output.exists() {
                warn!("removing {} left by failed {}", output.display(), program);
                fs::remove_file(output)?;
            }
        }
        Ok(())
    }

    /// copy `source` into the work directory unless a copy is already there
    fn stage_input(&self, source: &Path) -> Result<PathBuf> {
        let name = local_name(source)?;
        let target = self.path(&name);
        if !target.exists() {
            info!("copying {} to {}", source.display(), target.display());
            fs::copy(source, &target)?;
        }
        Ok(name)
    }

    /// full reduction: mask, split, select overlapping chips, sky, photometry
    pub fn run(&self, template: &Path, images: &[PathBuf]) -> Result<RunSummary> {
        fs::create_dir_all(&self.workdir)?;
        let images = images
            .iter()
            .map(|image| self.stage_input(image))
            .collect::<Result<Vec<PathBuf>>>()?;
        let template = self.stage_input(template)?;
        let mut gate = StepGate::open(&self.workdir)?;

        for image in &images {
            self.mask_and_split(&mut gate, image)?;
        }
        let template_chip = self.split_template(&mut gate, &template)?;

        let overlapping = self.overlapping_chips(&template_chip, &images)?;
        if overlapping.is_empty() {
            return Err(PipelineError::NoOverlap(template_chip));
        }

        for chip in &overlapping {
            self.calc_sky(&mut gate, chip)?;
        }

        let photometry_ran = self.photometry(&mut gate, &template_chip, &overlapping)?;
        Ok(RunSummary {
            template: template_chip,
            overlapping,
            photometry_ran,
        })
    }

    fn mask_and_split(&self, gate: &mut StepGate, image: &Path) -> Result<()> {
        if gate.needs(image, Step::Mask)? {
            let instrument = Instrument::from_fits(&self.path(image))?;
            self.runner
                .run_checked(&mask_command(&self.workdir, &instrument, image))?;
            gate.complete(image, Step::Mask)?;
        }
        self.split(gate, image)
    }

    fn split(&self, gate: &mut StepGate, image: &Path) -> Result<()> {
        if gate.needs(image, Step::SplitGroups)? {
            let command = split_groups_command(&self.workdir, image);
            if let Err(e) = self.runner.run_checked(&command) {
                self.discard(&command.program, &split_images(&self.path(image))?)?;
                return Err(e);
            }
            if needs_to_split_groups(&self.path(image))? {
                return Err(PipelineError::MissingOutput(derived_path(
                    &self.path(image),
                    ".chip1.fits",
                )));
            }
            gate.complete(image, Step::SplitGroups)?;
        }
        // chips start out split
        for chip in split_images(&self.path(image))? {
            gate.complete(&local_name(&chip)?, Step::SplitGroups)?;
        }
        Ok(())
    }

    fn split_template(&self, gate: &mut StepGate, template: &Path) -> Result<PathBuf> {
        self.split(gate, template)?;
        let chip = derived_path(template, ".chip1.fits");
        if !self.path(&chip).exists() {
            return Err(PipelineError::MissingOutput(self.path(&chip)));
        }
        Ok(chip)
    }

    /// every chip of `images`, in image order
    pub fn chips(&self, images: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut chips = vec![];
        for image in images {
            for chip in split_images(&self.path(image))? {
                chips.push(local_name(&chip)?);
            }
        }
        Ok(chips)
    }

    /// chips of `images` covered by the template chip
    pub fn overlapping_chips(
        &self,
        template_chip: &Path,
        images: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let chips: Vec<PathBuf> = self
            .chips(images)?
            .iter()
            .map(|chip| self.path(chip))
            .collect();
        filter_overlapping(
            &self.reprojector,
            &self.path(template_chip),
            &chips,
            self.options.overlap_threshold,
        )?
        .iter()
        .map(|chip| local_name(chip))
        .collect()
    }

    fn calc_sky(&self, gate: &mut StepGate, chip: &Path) -> Result<()> {
        if gate.needs(chip, Step::CalcSky)? {
            let instrument = Instrument::from_fits(&self.path(chip))?;
            let params = self.options.calcsky_parameters(&instrument)?;
            let sky = derived_path(&self.path(chip), ".sky.fits");
            self.run_producing(
                &calc_sky_command(&self.workdir, chip, &params),
                &[sky.clone()],
            )?;
            if needs_step(&self.path(chip), ".sky.fits") {
                return Err(PipelineError::MissingOutput(sky));
            }
            gate.complete(chip, Step::CalcSky)?;
        }
        Ok(())
    }

    /// DOLPHOT parameter file for the template chip and the given chips
    pub fn parameter_file(&self, template_chip: &Path, chips: &[PathBuf]) -> Result<String> {
        build_parameter_file(
            &self.options.master_parameters(),
            |chip| {
                let instrument = Instrument::from_fits(&self.path(chip))?;
                self.options.image_parameters(&instrument)
            },
            chips,
            template_chip,
        )
    }

    fn photometry(
        &self,
        gate: &mut StepGate,
        template_chip: &Path,
        chips: &[PathBuf],
    ) -> Result<bool> {
        let mut needed = need_to_run_dolphot(&self.workdir);
        for chip in chips {
            needed |= gate.needs(chip, Step::Photometry)?;
        }
        if !needed {
            info!("{} exists, skipping photometry", DOLPHOT_OUTPUT);
            return Ok(false);
        }

        let params = self.parameter_file(template_chip, chips)?;
        fs::write(self.path(Path::new(DOLPHOT_PARAMS)), params)?;
        self.run_producing(
            &dolphot_command(&self.workdir, DOLPHOT_OUTPUT, DOLPHOT_LOG),
            &[self.path(Path::new(DOLPHOT_OUTPUT))],
        )?;
        if need_to_run_dolphot(&self.workdir) {
            return Err(PipelineError::MissingOutput(self.path(Path::new(DOLPHOT_OUTPUT))));
        }
        for chip in chips {
            gate.complete(chip, Step::Photometry)?;
        }
        Ok(true)
    }

    /// Inject artificial stars in two filters and rerun photometry on them.
    ///
    /// Returns false when `dp_fake.out` already exists.
    pub fn add_fake_stars(&self, filters: &[String]) -> Result<bool> {
        if filters.len() != 2 {
            return Err(PipelineError::InvalidParameter(format!(
                "fakelist needs exactly two filters, got {}",
                filters.len()
            )));
        }
        if need_to_run_dolphot(&self.workdir) {
            return Err(PipelineError::MissingOutput(self.path(Path::new(DOLPHOT_OUTPUT))));
        }
        if self.path(Path::new(FAKE_OUTPUT)).exists() {
            info!("{} exists, skipping artificial stars", FAKE_OUTPUT);
            return Ok(false);
        }

        if self.path(Path::new(FAKE_LIST)).exists() {
            info!("reusing {}", FAKE_LIST);
        } else {
            self.run_producing(
                &fakelist_command(&self.workdir, DOLPHOT_OUTPUT, filters),
                &[self.path(Path::new(FAKE_LIST))],
            )?;
        }

        let params_path = self.path(Path::new(DOLPHOT_PARAMS));
        let params = fs::read_to_string(&params_path)?;
        if params.lines().any(|line| line.trim() == FAKE_STARS_LINE) {
            warn!("{} already lists artificial stars", DOLPHOT_PARAMS);
        } else {
            let mut file = OpenOptions::new().append(true).open(&params_path)?;
            if !params.is_empty() && !params.ends_with('\n') {
                writeln!(file)?;
            }
            writeln!(file, "{}", FAKE_STARS_LINE)?;
        }

        self.run_producing(
            &dolphot_command(&self.workdir, FAKE_OUTPUT, FAKE_LOG),
            &[self.path(Path::new(FAKE_OUTPUT))],
        )?;
        Ok(true)
    }

    /// reconciled stage of every input image and its chips
    pub fn status(&self, images: &[PathBuf]) -> Result<Vec<(PathBuf, ImageStage)>> {
        let mut gate = StepGate::open(&self.workdir)?;
        let mut stages = vec![];
        for image in images {
            let name = local_name(image)?;
            if !self.path(&name).exists() {
                stages.push((name, ImageStage::Raw));
                continue;
            }
            let stage = gate.reconcile(&name, &[Step::Mask, Step::SplitGroups])?;
            stages.push((name.clone(), stage));
            for chip in self.chips(&[name])? {
                let mut stage = gate.reconcile(&chip, &[Step::CalcSky])?;
                if stage == ImageStage::Done {
                    stage = gate.reconcile(&chip, &[Step::Photometry])?;
                }
                stages.push((chip, stage));
            }
        }
        Ok(stages)
    }
}
