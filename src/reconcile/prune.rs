use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cancel::Cancel;
use crate::config::RunMode;
use crate::dataset::{list_assets, Asset, Role};
use crate::error::{require_dir, PrepError};
use crate::report::{ItemRecord, Skip, StageReport, Summary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnpairedReason {
    /// Stem does not end with the mask suffix.
    MissingSuffix,
    /// Suffix present, but no image has the stripped basename.
    NoImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpairedMask {
    pub path: PathBuf,
    pub reason: UnpairedReason,
}

/// Classification of a merged dataset snapshot. Computing it touches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub images_found: usize,
    pub masks_found: usize,
    pub unpaired_images: Vec<PathBuf>,
    pub unpaired_masks: Vec<UnpairedMask>,
}

/// Pair images and masks by exact basename equality.
///
/// An image is unpaired iff its basename is not a mask root. A mask is
/// unpaired iff it lacks the suffix or its root is not an image basename.
pub fn plan_prune(images: &[Asset], masks: &[Asset]) -> PrunePlan {
    let image_bases: HashSet<&str> = images.iter().filter_map(Asset::pair_key).collect();
    let mask_roots: HashSet<&str> = masks.iter().filter_map(Asset::pair_key).collect();

    let unpaired_images = images
        .iter()
        .filter(|img| !mask_roots.contains(img.basename.as_str()))
        .map(|img| img.path.clone())
        .collect();

    let unpaired_masks = masks
        .iter()
        .filter_map(|mask| {
            let reason = match mask.pair_key() {
                None => UnpairedReason::MissingSuffix,
                Some(root) if !image_bases.contains(root) => UnpairedReason::NoImage,
                Some(_) => return None,
            };
            Some(UnpairedMask {
                path: mask.path.clone(),
                reason,
            })
        })
        .collect();

    PrunePlan {
        images_found: images.len(),
        masks_found: masks.len(),
        unpaired_images,
        unpaired_masks,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneReport {
    pub img_dir: PathBuf,
    pub mask_dir: PathBuf,
    pub mode: RunMode,
    pub images_found: usize,
    pub masks_found: usize,
    pub unpaired_images: Vec<PathBuf>,
    pub unpaired_masks: Vec<UnpairedMask>,
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<Skip>,
    pub cancelled: bool,
}

impl StageReport for PruneReport {
    const STAGE: &'static str = "prune";

    fn summary(&self) -> Summary {
        Summary {
            processed: self.images_found + self.masks_found,
            skipped: self.failed.len(),
            unpaired_images: self.unpaired_images.len(),
            unpaired_masks: self.unpaired_masks.len(),
        }
    }

    fn items(&self) -> Vec<ItemRecord> {
        let deleted: HashSet<&PathBuf> = self.deleted.iter().collect();
        let action = |path: &PathBuf| {
            if deleted.contains(path) {
                "delete"
            } else if self.mode.is_dry_run() {
                "plan-delete"
            } else {
                "keep"
            }
        };

        let images = self.unpaired_images.iter().map(|p| {
            ItemRecord::new(Self::STAGE, action(p), p).detail("no matching mask")
        });
        let masks = self.unpaired_masks.iter().map(|m| {
            let detail = match m.reason {
                UnpairedReason::MissingSuffix => "bad mask name",
                UnpairedReason::NoImage => "no matching image",
            };
            ItemRecord::new(Self::STAGE, action(&m.path), &m.path).detail(detail)
        });
        let failed = self
            .failed
            .iter()
            .map(|s| ItemRecord::new(Self::STAGE, "delete-failed", &s.path).detail(&s.reason));
        images.chain(masks).chain(failed).collect()
    }
}

#[derive(Debug, Default)]
struct Deletions {
    deleted: Vec<PathBuf>,
    failed: Vec<Skip>,
    cancelled: bool,
}

/// Delete each path on its own; a failure is recorded and the rest proceed.
fn delete_each(paths: Vec<PathBuf>, cancel: &Cancel) -> Deletions {
    let mut outcome = Deletions::default();
    for path in paths {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }
        match fs::remove_file(&path) {
            Ok(()) => outcome.deleted.push(path),
            Err(e) => {
                let err = anyhow::Error::new(e).context(format!("deleting {}", path.display()));
                outcome.failed.push(Skip::from_error(&path, &err));
            }
        }
    }
    outcome
}

/// Remove images and masks that have no exact counterpart.
///
/// In dry-run mode the report carries the same candidate sets and nothing
/// is deleted. A failed delete is recorded and the remaining files are
/// still processed.
pub fn prune(
    img_dir: &Path,
    mask_dir: &Path,
    mode: RunMode,
    cancel: &Cancel,
) -> Result<PruneReport, PrepError> {
    require_dir("image dir", img_dir)?;
    require_dir("mask dir", mask_dir)?;

    let images = list_assets(img_dir, Role::Image);
    let masks = list_assets(mask_dir, Role::Mask);
    let plan = plan_prune(&images, &masks);

    log::info!("=== CHECK ===");
    log::info!("Images found: {}", plan.images_found);
    log::info!("Masks  found: {}", plan.masks_found);
    log::info!("Unpaired images: {}", plan.unpaired_images.len());
    log::info!("Unpaired masks:  {}", plan.unpaired_masks.len());
    for path in &plan.unpaired_images {
        log::info!("  image without mask: {}", path.display());
    }
    for mask in &plan.unpaired_masks {
        log::info!("  mask without image ({:?}): {}", mask.reason, mask.path.display());
    }

    let mut report = PruneReport {
        img_dir: img_dir.to_path_buf(),
        mask_dir: mask_dir.to_path_buf(),
        mode,
        images_found: plan.images_found,
        masks_found: plan.masks_found,
        unpaired_images: plan.unpaired_images,
        unpaired_masks: plan.unpaired_masks,
        deleted: Vec::new(),
        failed: Vec::new(),
        cancelled: false,
    };

    if mode.is_dry_run() {
        log::info!("[DRY-RUN] No files were deleted.");
        return Ok(report);
    }

    let targets: Vec<PathBuf> = report
        .unpaired_images
        .iter()
        .cloned()
        .chain(report.unpaired_masks.iter().map(|m| m.path.clone()))
        .collect();

    let outcome = delete_each(targets, cancel);
    report.deleted = outcome.deleted;
    report.failed = outcome.failed;
    report.cancelled = outcome.cancelled;

    log::info!("Deleted files: {}", report.deleted.len());
    Ok(report)
}
