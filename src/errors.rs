use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("bad input pattern")]
    BadPattern(#[from] glob::PatternError),
    #[error("unreadable path")]
    UnreadablePath(#[from] glob::GlobError),
    #[error("{0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    YAMLError(#[from] serde_yaml::Error),
    #[error("{0}")]
    InvalidFITS(String),
    #[error("missing {key} in fits header {}", path.display())]
    MissingHeaderKey { key: String, path: PathBuf },
    #[error("unsupported instrument: {0}")]
    UnsupportedInstrument(String),
    #[error("cannot reproject onto {}: {reason}", path.display())]
    Reprojection { path: PathBuf, reason: String },
    #[error("{program} exited with {}\n{output}", status_text(*status))]
    ToolFailed {
        program: String,
        status: Option<i32>,
        output: String,
    },
    #[error("expected output not found: {}", .0.display())]
    MissingOutput(PathBuf),
    #[error("no image overlaps the template {}", .0.display())]
    NoOverlap(PathBuf),
    #[error("{0}")]
    InvalidCatalog(String),
    #[error("{0}")]
    InvalidParameter(String),
}

fn status_text(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "no status (killed by signal)".to_string(),
    }
}

impl PipelineError {
    pub(crate) fn missing_key(key: &str, path: impl Into<PathBuf>) -> Self {
        PipelineError::MissingHeaderKey {
            key: key.to_string(),
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_mentions_program_and_output() {
        let err = PipelineError::ToolFailed {
            program: "calcsky".to_string(),
            status: Some(3),
            output: "bad radius".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("calcsky exited with status 3"));
        assert!(text.contains("bad radius"));

        let killed = PipelineError::ToolFailed {
            program: "dolphot".to_string(),
            status: None,
            output: String::new(),
        };
        assert!(killed.to_string().contains("killed by signal"));
    }

    #[test]
    fn missing_key_names_file() {
        let err = PipelineError::missing_key("EXTNAME", "a.fits");
        assert_eq!(err.to_string(), "missing EXTNAME in fits header a.fits");
    }
}
