use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Why a single metric could not be measured.
///
/// Samplers never hand this to their callers; it is logged and the metric
/// degrades to its sentinel value. A process that exits mid-scan is not an
/// error at all and has no variant here.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("cannot read {}: {}", .path.display(), .source)]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed input: {0}")]
    Parse(String),
    #[error("degenerate value: {0}")]
    Degenerate(&'static str),
}

impl SampleError {
    pub fn unavailable(path: &Path, source: io::Error) -> Self {
        Self::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
