use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems. Raised before any file is touched.
///
/// Per-file failures never surface here: they are recorded as skips in the
/// stage report and the batch continues.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("not a directory ({role}): {}", path.display())]
    NotADirectory { role: &'static str, path: PathBuf },

    #[error("no '{prefix}*' split folders under {}", root.display())]
    NoSplits { root: PathBuf, prefix: String },

    #[error("provide at least an image directory or a mask directory")]
    NoInput,

    #[error("target size must be positive, got {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("cannot read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported report format: {}", path.display())]
    UnsupportedReport { path: PathBuf },
}

/// Fail with [`PrepError::NotADirectory`] unless `path` is an existing directory.
pub fn require_dir(role: &'static str, path: &std::path::Path) -> Result<(), PrepError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(PrepError::NotADirectory {
            role,
            path: path.to_path_buf(),
        })
    }
}
