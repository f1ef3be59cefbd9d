use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::error::PrepError;

// ---------------------------------------------------------------------------
// Shared naming conventions
// ---------------------------------------------------------------------------

/// File extensions recognised as image or mask assets (lowercase, no dot).
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

/// Reserved token appended to an image basename to name its mask.
pub const MASK_SUFFIX: &str = "_mask";

/// Split folders under a raw root are named `<prefix><tag>`, e.g. `data_C1`.
pub const DEFAULT_SPLIT_PREFIX: &str = "data_";

/// Per-split image folders: `images_<tag>`.
pub const IMAGES_PREFIX: &str = "images_";

/// Per-split mask folders: `masks_<tag>`.
pub const MASKS_PREFIX: &str = "masks_";

/// Merged output subfolders under the gather output root.
pub const MERGED_IMAGES_DIR: &str = "img";
pub const MERGED_MASKS_DIR: &str = "mask";

/// Default square edge for the resize stage.
pub const DEFAULT_TARGET_SIZE: u32 = 256;

/// JPEG quality used when a mask is overwritten in place as JPEG.
pub const IN_PLACE_JPEG_QUALITY: u8 = 95;

/// Whether `path` carries one of [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn has_image_extension(path: &Path) -> bool {
    extension_rank(path).is_some()
}

/// Position of the path's extension in [`IMAGE_EXTENSIONS`].
pub fn extension_rank(path: &Path) -> Option<usize> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().position(|e| *e == ext)
}

/// Lowercased extension with a leading dot, or an empty string.
pub fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Operation modes
// ---------------------------------------------------------------------------

/// Apply changes, or only report what would happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Apply,
    DryRun,
}

impl RunMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            RunMode::DryRun
        } else {
            RunMode::Apply
        }
    }

    pub fn is_dry_run(self) -> bool {
        self == RunMode::DryRun
    }
}

/// How masks with three or more levels are collapsed to `{0, 255}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MultilevelPolicy {
    /// Every sample above zero becomes 255.
    #[default]
    NonzeroCollapse,
    /// Samples strictly above the cutoff become 255.
    Threshold(u8),
}

impl fmt::Display for MultilevelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultilevelPolicy::NonzeroCollapse => write!(f, "nonzero-collapse"),
            MultilevelPolicy::Threshold(t) => write!(f, "threshold>{t}"),
        }
    }
}

/// Where and how a binarized mask is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskOutput {
    /// Lossless single-channel PNG named `<base>_mask.png`; the source is
    /// removed when the path changes.
    Png,
    /// Overwrite the source file in its own format. Lossy for JPEG sources.
    InPlace,
}

/// Square or rectangular output resolution. Both sides are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Result<Self, PrepError> {
        if width == 0 || height == 0 {
            return Err(PrepError::InvalidSize { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn square(edge: u32) -> Result<Self, PrepError> {
        Self::new(edge, edge)
    }
}

impl fmt::Display for TargetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_matching_is_case_insensitive() {
        assert!(has_image_extension(Path::new("a/B.JPG")));
        assert!(has_image_extension(Path::new("x.webp")));
        assert!(!has_image_extension(Path::new("notes.txt")));
        assert!(!has_image_extension(Path::new("no_extension")));
        assert_eq!(lowercase_extension(Path::new("a.TiF")), ".tif");
    }

    #[test]
    fn target_size_rejects_zero() {
        assert!(TargetSize::new(0, 10).is_err());
        assert_eq!(TargetSize::square(256).unwrap().to_string(), "256x256");
    }
}
