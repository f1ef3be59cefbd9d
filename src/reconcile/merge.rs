use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cancel::Cancel;
use crate::config::{
    extension_rank, lowercase_extension, RunMode, IMAGES_PREFIX, MASKS_PREFIX, MASK_SUFFIX,
    MERGED_IMAGES_DIR, MERGED_MASKS_DIR,
};
use crate::dataset::model::file_stem;
use crate::dataset::{
    discover_splits, find_subdir, list_assets, list_media_files, mask_file_name, split_basename,
    Role, Split,
};
use crate::error::{require_dir, PrepError};
use crate::report::{ItemRecord, Skip, StageReport, Summary};

// ---------------------------------------------------------------------------
// Mask resolution
// ---------------------------------------------------------------------------

/// Whether a file stem carries the mask marker anywhere, ignoring case.
fn has_mask_marker(stem: &str) -> bool {
    stem.to_lowercase().contains(&MASK_SUFFIX.to_lowercase())
}

/// Outcome of looking up the mask for one image basename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskMatch {
    /// `<basename>_mask.<ext>` exists.
    Exact(PathBuf),
    /// No exact file, but exactly one mask stem starts with the basename and
    /// carries the mask marker.
    UniqueRelaxed(PathBuf),
    /// Several relaxed candidates. Never guessed.
    Ambiguous(Vec<PathBuf>),
    NoMatch,
}

impl MaskMatch {
    /// The resolved mask, if resolution succeeded.
    pub fn path(&self) -> Option<&Path> {
        match self {
            MaskMatch::Exact(p) | MaskMatch::UniqueRelaxed(p) => Some(p),
            MaskMatch::Ambiguous(_) | MaskMatch::NoMatch => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MaskMatch::Exact(_) => "exact",
            MaskMatch::UniqueRelaxed(_) => "relaxed",
            MaskMatch::Ambiguous(_) => "ambiguous",
            MaskMatch::NoMatch => "none",
        }
    }
}

/// Find the mask for `basename` among `masks`.
///
/// Exact `<basename>_mask` stems win; when several extensions exist the first
/// in allow-list order is taken. The relaxed scan compares case-insensitively.
pub fn resolve_mask(basename: &str, masks: &[PathBuf]) -> MaskMatch {
    let exact_stem = format!("{basename}{MASK_SUFFIX}");
    let exact = masks
        .iter()
        .filter(|m| file_stem(m) == Some(exact_stem.as_str()))
        .min_by_key(|m| extension_rank(m).unwrap_or(usize::MAX));
    if let Some(path) = exact {
        return MaskMatch::Exact(path.clone());
    }

    let base_lower = basename.to_lowercase();
    let mut candidates: Vec<PathBuf> = masks
        .iter()
        .filter(|m| {
            file_stem(m)
                .is_some_and(|s| s.to_lowercase().starts_with(&base_lower) && has_mask_marker(s))
        })
        .cloned()
        .collect();

    match candidates.len() {
        0 => MaskMatch::NoMatch,
        1 => MaskMatch::UniqueRelaxed(candidates.remove(0)),
        _ => MaskMatch::Ambiguous(candidates),
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CopyRecord {
    pub role: Role,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// How the mask was found; `None` for images.
    pub matched_by: Option<&'static str>,
    pub copied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AmbiguousMatch {
    pub image: String,
    pub candidates: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    pub split: String,
    pub tag: String,
    pub images_dir: PathBuf,
    pub masks_dir: PathBuf,
    pub images_copied: usize,
    pub masks_copied: usize,
    /// `<tag>:<basename>` of images whose mask did not resolve.
    pub images_without_mask: Vec<String>,
    /// `<tag>:<stem>` of mask files no image claimed.
    pub unclaimed_masks: Vec<String>,
    pub ambiguous: Vec<AmbiguousMatch>,
    pub copies: Vec<CopyRecord>,
    pub skipped: Vec<Skip>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedSplit {
    pub split: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatherReport {
    pub root: PathBuf,
    pub out_images: PathBuf,
    pub out_masks: PathBuf,
    pub mode: RunMode,
    pub splits: Vec<SplitReport>,
    pub skipped_splits: Vec<SkippedSplit>,
    pub cancelled: bool,
}

impl GatherReport {
    pub fn images_copied(&self) -> usize {
        self.splits.iter().map(|s| s.images_copied).sum()
    }

    pub fn masks_copied(&self) -> usize {
        self.splits.iter().map(|s| s.masks_copied).sum()
    }

    pub fn images_without_mask(&self) -> Vec<&str> {
        self.splits
            .iter()
            .flat_map(|s| s.images_without_mask.iter().map(String::as_str))
            .collect()
    }

    pub fn unclaimed_masks(&self) -> Vec<&str> {
        self.splits
            .iter()
            .flat_map(|s| s.unclaimed_masks.iter().map(String::as_str))
            .collect()
    }
}

impl StageReport for GatherReport {
    const STAGE: &'static str = "gather";

    fn summary(&self) -> Summary {
        Summary {
            processed: self.images_copied() + self.masks_copied(),
            skipped: self.splits.iter().map(|s| s.skipped.len()).sum(),
            unpaired_images: self.images_without_mask().len(),
            unpaired_masks: self.unclaimed_masks().len(),
        }
    }

    fn items(&self) -> Vec<ItemRecord> {
        let mut items = Vec::new();
        for split in &self.splits {
            for copy in &split.copies {
                let action = if copy.copied { "copy" } else { "plan-copy" };
                items.push(
                    ItemRecord::new(Self::STAGE, action, &copy.source)
                        .to(&copy.destination)
                        .detail(copy.matched_by.unwrap_or(copy_role(copy.role))),
                );
            }
            for name in &split.images_without_mask {
                items.push(
                    ItemRecord::new(Self::STAGE, "missing-mask", &split.images_dir).detail(name),
                );
            }
            for name in &split.unclaimed_masks {
                items.push(
                    ItemRecord::new(Self::STAGE, "unclaimed-mask", &split.masks_dir).detail(name),
                );
            }
            for amb in &split.ambiguous {
                let candidates: Vec<String> =
                    amb.candidates.iter().map(|c| c.display().to_string()).collect();
                items.push(
                    ItemRecord::new(Self::STAGE, "ambiguous-mask", &split.masks_dir)
                        .detail(format!("{}: {}", amb.image, candidates.join(" | "))),
                );
            }
            for skip in &split.skipped {
                items.push(ItemRecord::new(Self::STAGE, "skip", &skip.path).detail(&skip.reason));
            }
        }
        for split in &self.skipped_splits {
            items.push(
                ItemRecord::new(Self::STAGE, "skip-split", Path::new(&split.split))
                    .detail(&split.reason),
            );
        }
        items
    }
}

fn copy_role(role: Role) -> &'static str {
    match role {
        Role::Image => "image",
        Role::Mask => "mask",
    }
}

// ---------------------------------------------------------------------------
// Gather
// ---------------------------------------------------------------------------

fn copy_file(src: &Path, dst: &Path, mode: RunMode) -> Result<bool> {
    if mode.is_dry_run() {
        log::debug!("[DRY] {} -> {}", src.display(), dst.display());
        return Ok(false);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("copying {} -> {}", src.display(), dst.display()))?;
    Ok(true)
}

struct Outputs<'a> {
    images: &'a Path,
    masks: &'a Path,
    mode: RunMode,
}

fn gather_split(
    split: &Split,
    out: &Outputs<'_>,
    claimed_names: &mut HashSet<String>,
    cancel: &Cancel,
) -> Result<SplitReport, SkippedSplit> {
    let images_dir = find_subdir(&split.dir, &format!("{IMAGES_PREFIX}{}", split.tag), IMAGES_PREFIX);
    let masks_dir = find_subdir(&split.dir, &format!("{MASKS_PREFIX}{}", split.tag), MASKS_PREFIX);
    let (Some(images_dir), Some(masks_dir)) = (images_dir, masks_dir) else {
        log::warn!("Skipping {}: missing images_/masks_ folder(s).", split.name());
        return Err(SkippedSplit {
            split: split.name(),
            reason: "missing images_/masks_ folder(s)".to_string(),
        });
    };

    let images = list_assets(&images_dir, Role::Image);
    let masks = list_media_files(&masks_dir);

    let mut report = SplitReport {
        split: split.name(),
        tag: split.tag.clone(),
        images_dir,
        masks_dir,
        images_copied: 0,
        masks_copied: 0,
        images_without_mask: Vec::new(),
        unclaimed_masks: Vec::new(),
        ambiguous: Vec::new(),
        copies: Vec::new(),
        skipped: Vec::new(),
    };
    let mut claimed_masks: BTreeSet<PathBuf> = BTreeSet::new();

    let mut interrupted = false;
    for image in images {
        if cancel.is_cancelled() {
            interrupted = true;
            break;
        }
        let image = image.with_split(&split.tag);
        let label = format!("{}:{}", split.tag, image.basename);
        let dest_base = split_basename(&split.tag, &image.basename);

        if !claimed_names.insert(dest_base.clone()) {
            let err = anyhow::anyhow!("duplicate basename {dest_base}; first occurrence kept");
            report.skipped.push(Skip::from_error(&image.path, &err));
            continue;
        }

        let resolution = resolve_mask(&image.basename, &masks);
        let image_dst = out
            .images
            .join(format!("{dest_base}{}", lowercase_extension(&image.path)));
        match copy_file(&image.path, &image_dst, out.mode) {
            Ok(copied) => {
                report.images_copied += 1;
                report.copies.push(CopyRecord {
                    role: Role::Image,
                    source: image.path.clone(),
                    destination: image_dst,
                    matched_by: None,
                    copied,
                });
            }
            Err(e) => {
                // The mask goes with its skipped image, not into the unclaimed list.
                if let Some(mask_path) = resolution.path() {
                    claimed_masks.insert(mask_path.to_path_buf());
                }
                report.skipped.push(Skip::from_error(&image.path, &e));
                continue;
            }
        }

        let Some(mask_path) = resolution.path() else {
            if let MaskMatch::Ambiguous(candidates) = &resolution {
                log::warn!(
                    "Ambiguous mask for {label}: {} candidates, none chosen",
                    candidates.len()
                );
                report.ambiguous.push(AmbiguousMatch {
                    image: label.clone(),
                    candidates: candidates.clone(),
                });
            }
            report.images_without_mask.push(label);
            continue;
        };

        let mask_dst = out
            .masks
            .join(mask_file_name(&dest_base, &lowercase_extension(mask_path)));
        claimed_masks.insert(mask_path.to_path_buf());
        match copy_file(mask_path, &mask_dst, out.mode) {
            Ok(copied) => {
                report.masks_copied += 1;
                report.copies.push(CopyRecord {
                    role: Role::Mask,
                    source: mask_path.to_path_buf(),
                    destination: mask_dst,
                    matched_by: Some(resolution.kind()),
                    copied,
                });
            }
            Err(e) => report.skipped.push(Skip::from_error(mask_path, &e)),
        }
    }

    if interrupted {
        log::warn!(
            "[{}] cancelled before all images were matched; unclaimed masks not computed",
            report.split
        );
    } else {
        report.unclaimed_masks = masks
            .iter()
            .filter(|m| file_stem(m).is_some_and(has_mask_marker))
            .filter(|m| !claimed_masks.contains(*m))
            .map(|m| format!("{}:{}", split.tag, file_stem(m).unwrap_or_default()))
            .collect();
    }

    log::info!(
        "[{}] images={}, masks={}, missing_masks={}, extra_masks={}",
        report.split,
        report.images_copied,
        report.masks_copied,
        report.images_without_mask.len(),
        report.unclaimed_masks.len()
    );
    Ok(report)
}

/// Merge every `<split_prefix><tag>` folder under `root` into
/// `<out_root>/img` and `<out_root>/mask`.
pub fn gather(
    root: &Path,
    out_root: &Path,
    split_prefix: &str,
    mode: RunMode,
    cancel: &Cancel,
) -> Result<GatherReport, PrepError> {
    require_dir("root", root)?;
    let splits = discover_splits(root, split_prefix)?;
    if splits.is_empty() {
        return Err(PrepError::NoSplits {
            root: root.to_path_buf(),
            prefix: split_prefix.to_string(),
        });
    }

    let names: Vec<String> = splits.iter().map(Split::name).collect();
    log::info!("Found splits: {names:?}");

    let out_images = out_root.join(MERGED_IMAGES_DIR);
    let out_masks = out_root.join(MERGED_MASKS_DIR);
    let outputs = Outputs {
        images: &out_images,
        masks: &out_masks,
        mode,
    };

    let mut report = GatherReport {
        root: root.to_path_buf(),
        out_images: out_images.clone(),
        out_masks: out_masks.clone(),
        mode,
        splits: Vec::new(),
        skipped_splits: Vec::new(),
        cancelled: false,
    };
    let mut claimed_names = HashSet::new();

    for split in &splits {
        if cancel.is_cancelled() {
            break;
        }
        match gather_split(split, &outputs, &mut claimed_names, cancel) {
            Ok(split_report) => report.splits.push(split_report),
            Err(skipped) => report.skipped_splits.push(skipped),
        }
    }
    report.cancelled = cancel.is_cancelled();

    for name in report.images_without_mask() {
        log::debug!("  missing mask: {name}");
    }
    for name in report.unclaimed_masks() {
        log::debug!("  extra mask: {name}");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(path, path.to_string_lossy().as_bytes()).expect("write file");
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("masks").join(n)).collect()
    }

    #[test]
    fn exact_match_wins_over_relaxed() {
        let masks = paths(&["img1_mask.png", "img1_mask_v2.png"]);
        assert_eq!(
            resolve_mask("img1", &masks),
            MaskMatch::Exact(PathBuf::from("masks/img1_mask.png"))
        );
    }

    #[test]
    fn exact_match_prefers_allow_list_order() {
        let masks = paths(&["a_mask.png", "a_mask.jpg"]);
        assert_eq!(
            resolve_mask("a", &masks),
            MaskMatch::Exact(PathBuf::from("masks/a_mask.jpg"))
        );
    }

    #[test]
    fn unique_relaxed_candidate_is_accepted() {
        let masks = paths(&["IMG1_Mask_final.png", "other_mask.png"]);
        assert_eq!(
            resolve_mask("img1", &masks),
            MaskMatch::UniqueRelaxed(PathBuf::from("masks/IMG1_Mask_final.png"))
        );
    }

    #[test]
    fn several_relaxed_candidates_are_ambiguous() {
        let masks = paths(&["img1_mask_a.png", "img10_mask.png"]);
        let outcome = resolve_mask("img1", &masks);
        assert!(matches!(outcome, MaskMatch::Ambiguous(ref c) if c.len() == 2));
        assert_eq!(outcome.path(), None);
    }

    #[test]
    fn relaxed_scan_requires_marker() {
        let masks = paths(&["img1_label.png"]);
        assert_eq!(resolve_mask("img1", &masks), MaskMatch::NoMatch);
    }

    fn raw_layout(root: &Path) {
        touch(&root.join("data_C1/images_C1/100H0001.jpg"));
        touch(&root.join("data_C1/images_C1/100H0002.JPG"));
        touch(&root.join("data_C1/images_C1/100H0003.png"));
        touch(&root.join("data_C1/masks_C1/100H0001_mask.png"));
        touch(&root.join("data_C1/masks_C1/100H0003_mask_x.png"));
        touch(&root.join("data_C1/masks_C1/999_mask.png"));
        // Fallback folder names for C2.
        touch(&root.join("data_C2/images_c2_raw/a.png"));
        touch(&root.join("data_C2/masks_c2_raw/a_mask.PNG"));
        // No masks folder at all.
        touch(&root.join("data_C3/images_C3/z.png"));
    }

    #[test]
    fn gather_merges_splits_with_prefixed_names() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("raw");
        let out = temp.path().join("out");
        raw_layout(&root);

        let report =
            gather(&root, &out, "data_", RunMode::Apply, &Cancel::new()).expect("gather");

        assert!(out.join("img/C1_100H0001.jpg").is_file());
        assert!(out.join("img/C1_100H0002.jpg").is_file());
        assert!(out.join("mask/C1_100H0001_mask.png").is_file());
        assert!(out.join("mask/C1_100H0003_mask.png").is_file());
        assert!(out.join("img/C2_a.png").is_file());
        assert!(out.join("mask/C2_a_mask.png").is_file());

        assert_eq!(report.images_copied(), 4);
        assert_eq!(report.masks_copied(), 3);
        assert_eq!(report.images_without_mask(), vec!["C1:100H0002"]);
        assert_eq!(report.unclaimed_masks(), vec!["C1:999_mask"]);
        assert_eq!(report.skipped_splits.len(), 1);
        assert_eq!(report.skipped_splits[0].split, "data_C3");

        let summary = report.summary();
        assert_eq!(summary.processed, 7);
        assert_eq!(summary.unpaired_images, 1);
        assert_eq!(summary.unpaired_masks, 1);
    }

    #[test]
    fn gather_dry_run_writes_nothing() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("raw");
        let out = temp.path().join("out");
        raw_layout(&root);

        let report =
            gather(&root, &out, "data_", RunMode::DryRun, &Cancel::new()).expect("gather");

        assert!(!out.exists());
        assert_eq!(report.images_copied(), 4);
        assert!(report.splits.iter().flat_map(|s| &s.copies).all(|c| !c.copied));
    }

    #[test]
    fn gather_without_splits_is_a_configuration_error() {
        let temp = tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(temp.path().join("unrelated")).unwrap();
        let err = gather(
            temp.path(),
            &temp.path().join("out"),
            "data_",
            RunMode::Apply,
            &Cancel::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PrepError::NoSplits { .. }));
    }

    #[test]
    fn files_without_marker_are_not_unclaimed_masks() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("raw");
        touch(&root.join("data_C1/images_C1/a.png"));
        touch(&root.join("data_C1/masks_C1/a_mask.png"));
        touch(&root.join("data_C1/masks_C1/legend.png"));

        let out = temp.path().join("out");
        let report = gather(&root, &out, "data_", RunMode::Apply, &Cancel::new()).expect("gather");

        assert_eq!(report.masks_copied(), 1);
        assert!(report.unclaimed_masks().is_empty());
        assert_eq!(report.summary().unpaired_masks, 0);
    }

    #[test]
    fn failed_image_copy_keeps_its_mask_claimed() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("raw");
        let out = temp.path().join("out");
        raw_layout(&root);
        // A directory squatting on the destination makes the copy fail.
        fs::create_dir_all(out.join("img/C1_100H0001.jpg")).expect("block destination");

        let report = gather(&root, &out, "data_", RunMode::Apply, &Cancel::new()).expect("gather");

        let c1 = &report.splits[0];
        assert_eq!(c1.skipped.len(), 1);
        assert!(c1.skipped[0].path.ends_with("100H0001.jpg"));
        assert_eq!(c1.unclaimed_masks, vec!["C1:999_mask"]);
        assert!(!out.join("mask/C1_100H0001_mask.png").exists());
    }

    #[test]
    fn interrupted_split_does_not_report_unclaimed_masks() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("raw");
        raw_layout(&root);
        let out_images = temp.path().join("out/img");
        let out_masks = temp.path().join("out/mask");
        let outputs = Outputs {
            images: &out_images,
            masks: &out_masks,
            mode: RunMode::DryRun,
        };
        let split = Split {
            tag: "C1".to_string(),
            dir: root.join("data_C1"),
        };
        let cancel = Cancel::new();
        cancel.cancel();

        let report = gather_split(&split, &outputs, &mut HashSet::new(), &cancel)
            .expect("split has both folders");

        assert_eq!(report.images_copied, 0);
        assert!(report.unclaimed_masks.is_empty());
    }

    #[test]
    fn cancelled_gather_copies_nothing() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("raw");
        let out = temp.path().join("out");
        raw_layout(&root);

        let cancel = Cancel::new();
        cancel.cancel();
        let report = gather(&root, &out, "data_", RunMode::Apply, &cancel).expect("gather");
        assert!(report.cancelled);
        assert_eq!(report.images_copied(), 0);
    }
}
