use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::MASK_SUFFIX;

// ---------------------------------------------------------------------------
// Role – which side of a pair an asset sits on
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Image,
    Mask,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Image => write!(f, "image"),
            Role::Mask => write!(f, "mask"),
        }
    }
}

// ---------------------------------------------------------------------------
// Asset – one image or mask file on disk
// ---------------------------------------------------------------------------

/// A single image or mask file. `basename` is the file stem and is the join
/// key between the two roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub path: PathBuf,
    pub role: Role,
    pub basename: String,
    /// Originating split, set only while gathering raw splits.
    pub split_tag: Option<String>,
}

impl Asset {
    /// Build an asset from a path. `None` when the stem is not valid UTF-8.
    pub fn new(path: PathBuf, role: Role) -> Option<Self> {
        let basename = file_stem(&path)?.to_string();
        Some(Self {
            path,
            role,
            basename,
            split_tag: None,
        })
    }

    pub fn with_split(mut self, tag: &str) -> Self {
        self.split_tag = Some(tag.to_string());
        self
    }

    /// The basename this asset pairs on. For masks that is the stem with the
    /// reserved suffix removed; a mask without the suffix has no root.
    pub fn pair_key(&self) -> Option<&str> {
        match self.role {
            Role::Image => Some(&self.basename),
            Role::Mask => mask_root(&self.basename),
        }
    }
}

/// A named source partition, e.g. folder `data_C1` with tag `C1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub tag: String,
    pub dir: PathBuf,
}

impl Split {
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.tag.clone())
    }
}

// ---------------------------------------------------------------------------
// Naming helpers
// ---------------------------------------------------------------------------

pub fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

/// Strip the reserved mask suffix. `None` when the stem does not end with it.
pub fn mask_root(stem: &str) -> Option<&str> {
    stem.strip_suffix(MASK_SUFFIX)
}

/// `<basename>_mask<ext>`; `ext` includes its leading dot.
pub fn mask_file_name(basename: &str, ext: &str) -> String {
    format!("{basename}{MASK_SUFFIX}{ext}")
}

/// Split-qualified basename used after merging: `<tag>_<basename>`.
pub fn split_basename(tag: &str, basename: &str) -> String {
    format!("{tag}_{basename}")
}
