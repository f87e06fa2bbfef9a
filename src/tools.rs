//! Invocation of the external photometry tools.
//!
//! Every command runs inside the work directory and its exit status is
//! checked; optional log files collect stdout and stderr the way
//! `2>&1 | tee -a` would.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error, info};

use crate::io::Instrument;
use crate::params::CalcSkyParams;
use crate::{PipelineError, Result};

/// One external command, run with `cwd` as its working directory.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// appended with the command output, relative to `cwd`
    pub log: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: &str, cwd: &Path) -> Self {
        ToolInvocation {
            program: program.to_string(),
            args: vec![],
            cwd: cwd.to_path_buf(),
            log: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn log_to(mut self, log: &str) -> Self {
        self.log = Some(PathBuf::from(log));
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<&str>>()
            .join(" ")
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolOutput {
    /// None when the process was killed by a signal
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

pub trait ToolRunner {
    /// run the command to completion; only failures to launch are errors
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;

    /// run the command and turn a non-zero exit into an error
    fn run_checked(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        info!("running {}", invocation.command_line());
        let output = self.run(invocation)?;
        if !output.stdout.is_empty() {
            debug!("{} stdout:\n{}", invocation.program, output.stdout.trim_end());
        }
        if !output.stderr.is_empty() {
            debug!("{} stderr:\n{}", invocation.program, output.stderr.trim_end());
        }
        if output.success() {
            Ok(output)
        } else {
            error!(
                "{} failed with status {:?}",
                invocation.command_line(),
                output.status_code
            );
            Err(PipelineError::ToolFailed {
                program: invocation.program.clone(),
                status: output.status_code,
                output: output.combined(),
            })
        }
    }
}

/// Runs tools as child processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .output()?;
        let output = ToolOutput {
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if let Some(log) = &invocation.log {
            append_log(&invocation.cwd.join(log), &output)?;
        }
        Ok(output)
    }
}

pub fn append_log(filename: &Path, output: &ToolOutput) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(filename)?;
    file.write_all(output.stdout.as_bytes())?;
    file.write_all(output.stderr.as_bytes())?;
    Ok(())
}

pub const DOLPHOT_PARAMS: &str = "dp.params";
pub const DOLPHOT_LOG: &str = "dp.log";
pub const FAKE_OUTPUT: &str = "dp_fake.out";
pub const FAKE_LOG: &str = "dp_fake.log";
pub const FAKE_LIST: &str = "fakelist.out";

fn file_arg(image: &Path) -> String {
    image.to_string_lossy().into_owned()
}

/// `<instrument>mask <image>`
pub fn mask_command(workdir: &Path, instrument: &Instrument, image: &Path) -> ToolInvocation {
    ToolInvocation::new(&format!("{}mask", instrument.name), workdir).arg(file_arg(image))
}

/// `splitgroups <image>`
pub fn split_groups_command(workdir: &Path, image: &Path) -> ToolInvocation {
    ToolInvocation::new("splitgroups", workdir).arg(file_arg(image))
}

/// `calcsky <stem> <r_in> <r_out> <step> <sigma_low> <sigma_high>`
pub fn calc_sky_command(workdir: &Path, image: &Path, params: &CalcSkyParams) -> ToolInvocation {
    ToolInvocation::new("calcsky", workdir)
        .arg(file_arg(&image.with_extension("")))
        .args(params.args())
}

/// `dolphot <output> -p<params>`
pub fn dolphot_command(workdir: &Path, output: &str, log: &str) -> ToolInvocation {
    ToolInvocation::new("dolphot", workdir)
        .arg(output)
        .arg(format!("-p{}", DOLPHOT_PARAMS))
        .log_to(log)
}

/// `fakelist dp.out <filter> <filter>`
pub fn fakelist_command(workdir: &Path, photometry: &str, filters: &[String]) -> ToolInvocation {
    ToolInvocation::new("fakelist", workdir)
        .arg(photometry)
        .args(filters.iter().cloned())
        .log_to(FAKE_LIST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calcsky_uses_stem_and_radii() {
        let params = CalcSkyParams::for_detector("acs_wfc").unwrap();
        let cmd = calc_sky_command(Path::new("dolphot"), Path::new("j1_flt.chip1.fits"), &params);
        assert_eq!(cmd.command_line(), "calcsky j1_flt.chip1 15 35 4 2.25 2");
        assert_eq!(cmd.cwd, PathBuf::from("dolphot"));
        assert_eq!(cmd.log, None);
    }

    #[test]
    fn mask_program_follows_instrument() {
        let instrument = Instrument {
            name: "wfc3".to_string(),
            detector: "uvis".to_string(),
            filter: "f555w".to_string(),
        };
        let cmd = mask_command(Path::new("."), &instrument, Path::new("i1_flt.fits"));
        assert_eq!(cmd.command_line(), "wfc3mask i1_flt.fits");
    }

    #[test]
    fn dolphot_logs_to_file() {
        let cmd = dolphot_command(Path::new("w"), "dp.out", DOLPHOT_LOG);
        assert_eq!(cmd.command_line(), "dolphot dp.out -pdp.params");
        assert_eq!(cmd.log, Some(PathBuf::from("dp.log")));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_output_and_appends_log() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ToolInvocation::new("sh", dir.path())
            .args(["-c", "echo out; echo err 1>&2"])
            .log_to("tool.log");

        SystemToolRunner.run_checked(&cmd).unwrap();
        let output = SystemToolRunner.run_checked(&cmd).unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");

        let log = std::fs::read_to_string(dir.path().join("tool.log")).unwrap();
        assert_eq!(log, "out\nerr\nout\nerr\n");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ToolInvocation::new("sh", dir.path()).args(["-c", "echo broken; exit 4"]);

        match SystemToolRunner.run_checked(&cmd) {
            Err(PipelineError::ToolFailed {
                program,
                status,
                output,
            }) => {
                assert_eq!(program, "sh");
                assert_eq!(status, Some(4));
                assert_eq!(output, "broken\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ToolInvocation::new("snhst-no-such-tool", dir.path());
        assert!(matches!(
            SystemToolRunner.run(&cmd),
            Err(PipelineError::IOError(_))
        ));
    }
}
