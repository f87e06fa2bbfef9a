//! Command line driver for the HST/DOLPHOT reduction.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::info;

use snhst::catalog::{cut_bad_sources, read_catalog, write_catalog};
use snhst::config::DEFAULT_CONFIG_FILE;
use snhst::{filter_overlapping, load_options, system_pipeline, WcsReprojector};

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable HST reduction for DOLPHOT photometry")]
struct Cli {
    /// Pipeline options, created with defaults if missing
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mask, split, sky-subtract and run photometry against a template
    Run {
        /// Drizzled template image
        #[arg(long)]
        template: PathBuf,
        /// Work directory for all intermediate files
        #[arg(long, default_value = "dolphot")]
        workdir: PathBuf,
        /// Calibrated exposures
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Print the images whose footprint overlaps the template
    Overlap {
        #[arg(long)]
        template: PathBuf,
        /// Minimum covered fraction of each image (overrides the config)
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Print the DOLPHOT parameter file for a template chip and chips
    Params {
        /// Template chip, relative to the work directory
        #[arg(long)]
        template: PathBuf,
        #[arg(long, default_value = "dolphot")]
        workdir: PathBuf,
        /// Chips relative to the work directory
        #[arg(required = true)]
        chips: Vec<PathBuf>,
    },
    /// Inject artificial stars and rerun photometry on them
    FakeStars {
        #[arg(long, default_value = "dolphot")]
        workdir: PathBuf,
        /// Filter name, given twice
        #[arg(long = "filter", required = true)]
        filters: Vec<String>,
    },
    /// Apply the object type, sharpness and crowding cuts to a catalog
    Cut { input: PathBuf, output: PathBuf },
    /// Show the stage of every input image and chip
    Status {
        #[arg(long, default_value = "dolphot")]
        workdir: PathBuf,
        /// Inputs to report; defaults to the exposures found in the work directory
        images: Vec<PathBuf>,
    },
}

/// exposures copied into `workdir`, leaving out chips and sky files
fn staged_inputs(workdir: &Path) -> snhst::Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.fits", glob::Pattern::escape(&workdir.to_string_lossy()));
    let mut images = vec![];
    for path in glob::glob(&pattern)? {
        let path = path?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.contains(".chip") && !name.ends_with(".sky.fits") {
            images.push(path);
        }
    }
    Ok(images)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            template,
            workdir,
            images,
        } => {
            let options = load_options(&cli.config)?;
            let summary = system_pipeline(&workdir, options).run(&template, &images)?;
            info!(
                "{} chips overlap {}",
                summary.overlapping.len(),
                summary.template.display()
            );
            for chip in &summary.overlapping {
                println!("{}", chip.display());
            }
        }
        Command::Overlap {
            template,
            threshold,
            images,
        } => {
            let options = load_options(&cli.config)?;
            let threshold = threshold.unwrap_or(options.overlap_threshold);
            for image in filter_overlapping(&WcsReprojector, &template, &images, threshold)? {
                println!("{}", image.display());
            }
        }
        Command::Params {
            template,
            workdir,
            chips,
        } => {
            let options = load_options(&cli.config)?;
            print!(
                "{}",
                system_pipeline(&workdir, options).parameter_file(&template, &chips)?
            );
        }
        Command::FakeStars { workdir, filters } => {
            let options = load_options(&cli.config)?;
            if !system_pipeline(&workdir, options).add_fake_stars(&filters)? {
                eprintln!("artificial star photometry already done");
            }
        }
        Command::Cut { input, output } => {
            let rows = cut_bad_sources(read_catalog(&input)?);
            write_catalog(&output, &rows)?;
        }
        Command::Status { workdir, images } => {
            let options = load_options(&cli.config)?;
            let images = if images.is_empty() {
                staged_inputs(&workdir)?
            } else {
                images
            };
            for (image, stage) in system_pipeline(&workdir, options).status(&images)? {
                println!("{:<40} {:?}", image.display(), stage);
            }
        }
    }
    Ok(())
}
