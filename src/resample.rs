use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageBuffer, Pixel};
use serde::Serialize;

use crate::cancel::Cancel;
use crate::config::{RunMode, TargetSize};
use crate::dataset::list_media_files;
use crate::error::{require_dir, PrepError};
use crate::report::{ItemRecord, Skip, StageReport, Summary};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Size and offset of the undistorted content inside the padded canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    pub left: u32,
    pub top: u32,
}

/// Fit `src_w x src_h` inside `target` keeping the aspect ratio, centered.
///
/// `scale = min(W/w, H/h)`; each side is rounded half-to-even and never
/// drops below one pixel.
pub fn placement(src_w: u32, src_h: u32, target: TargetSize) -> Placement {
    let (src_w, src_h) = (src_w.max(1), src_h.max(1));
    let scale = f64::min(
        f64::from(target.width) / f64::from(src_w),
        f64::from(target.height) / f64::from(src_h),
    );
    let fit = |side: u32, limit: u32| -> u32 {
        ((f64::from(side) * scale).round_ties_even() as u32).clamp(1, limit)
    };
    let width = fit(src_w, target.width);
    let height = fit(src_h, target.height);

    Placement {
        width,
        height,
        left: (target.width - width) / 2,
        top: (target.height - height) / 2,
    }
}

// ---------------------------------------------------------------------------
// Buffer transforms
// ---------------------------------------------------------------------------

/// Sampling kernel: labels must never gain intermediate values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Nearest,
    Linear,
}

impl Kernel {
    pub fn for_role(is_label: bool) -> Self {
        if is_label {
            Kernel::Nearest
        } else {
            Kernel::Linear
        }
    }

    fn filter(self) -> FilterType {
        match self {
            Kernel::Nearest => FilterType::Nearest,
            Kernel::Linear => FilterType::Triangle,
        }
    }
}

/// Reduce any color/alpha encoding to an 8-bit luma buffer.
pub fn to_single_channel(img: &DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_) => img.clone(),
        other => DynamicImage::ImageLuma8(other.to_luma8()),
    }
}

fn pad_center<P: Pixel>(
    content: &ImageBuffer<P, Vec<P::Subpixel>>,
    target: TargetSize,
    at: Placement,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut canvas = ImageBuffer::new(target.width, target.height);
    imageops::replace(&mut canvas, content, i64::from(at.left), i64::from(at.top));
    canvas
}

/// Paste `content` centered on a zero-filled canvas of the same color type.
fn letterbox(content: DynamicImage, target: TargetSize, at: Placement) -> DynamicImage {
    match content {
        DynamicImage::ImageLuma8(b) => DynamicImage::ImageLuma8(pad_center(&b, target, at)),
        DynamicImage::ImageLumaA8(b) => DynamicImage::ImageLumaA8(pad_center(&b, target, at)),
        DynamicImage::ImageRgb8(b) => DynamicImage::ImageRgb8(pad_center(&b, target, at)),
        DynamicImage::ImageRgba8(b) => DynamicImage::ImageRgba8(pad_center(&b, target, at)),
        DynamicImage::ImageLuma16(b) => DynamicImage::ImageLuma16(pad_center(&b, target, at)),
        DynamicImage::ImageLumaA16(b) => DynamicImage::ImageLumaA16(pad_center(&b, target, at)),
        DynamicImage::ImageRgb16(b) => DynamicImage::ImageRgb16(pad_center(&b, target, at)),
        DynamicImage::ImageRgba16(b) => DynamicImage::ImageRgba16(pad_center(&b, target, at)),
        DynamicImage::ImageRgb32F(b) => DynamicImage::ImageRgb32F(pad_center(&b, target, at)),
        DynamicImage::ImageRgba32F(b) => DynamicImage::ImageRgba32F(pad_center(&b, target, at)),
        other => DynamicImage::ImageRgba8(pad_center(&other.to_rgba8(), target, at)),
    }
}

/// Resample `img` to exactly `target`.
///
/// Labels are reduced to one channel first and sampled nearest-neighbour;
/// everything else is sampled linearly. With `preserve_aspect` the content
/// is scaled to fit and centered on a zero background.
pub fn resize(
    img: &DynamicImage,
    target: TargetSize,
    preserve_aspect: bool,
    is_label: bool,
) -> DynamicImage {
    let source = if is_label {
        to_single_channel(img)
    } else {
        img.clone()
    };
    let filter = Kernel::for_role(is_label).filter();

    if !preserve_aspect {
        return source.resize_exact(target.width, target.height, filter);
    }

    let at = placement(source.width(), source.height(), target);
    let content = source.resize_exact(at.width, at.height, filter);
    letterbox(content, target, at)
}

// ---------------------------------------------------------------------------
// Directory stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResizeOptions {
    pub target: TargetSize,
    pub preserve_aspect: bool,
    pub mode: RunMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResizeRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub before: (u32, u32),
    pub after: (u32, u32),
    /// Content region inside the canvas when aspect is preserved.
    pub content: Option<Placement>,
    pub written: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResizeReport {
    pub input_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub is_mask: bool,
    pub options: ResizeOptions,
    pub records: Vec<ResizeRecord>,
    pub skipped: Vec<Skip>,
    pub cancelled: bool,
}

impl StageReport for ResizeReport {
    const STAGE: &'static str = "resize";

    fn summary(&self) -> Summary {
        Summary {
            processed: self.records.len(),
            skipped: self.skipped.len(),
            ..Summary::default()
        }
    }

    fn items(&self) -> Vec<ItemRecord> {
        let done = self.records.iter().map(|r| {
            let action = if r.written { "write" } else { "plan" };
            ItemRecord::new(Self::STAGE, action, &r.source)
                .to(&r.destination)
                .detail(format!(
                    "{}x{} -> {}x{} (mask={})",
                    r.before.0, r.before.1, r.after.0, r.after.1, self.is_mask
                ))
        });
        let skipped = self
            .skipped
            .iter()
            .map(|s| ItemRecord::new(Self::STAGE, "skip", &s.path).detail(&s.reason));
        done.chain(skipped).collect()
    }
}

fn destination(src: &Path, in_dir: &Path, out_dir: Option<&Path>, is_mask: bool) -> PathBuf {
    let mut dst = match out_dir {
        Some(out) => {
            let rel = src
                .strip_prefix(in_dir)
                .unwrap_or_else(|_| Path::new(src.file_name().unwrap_or_default()));
            out.join(rel)
        }
        None => src.to_path_buf(),
    };
    let is_png = dst
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"));
    if is_mask && !is_png {
        dst.set_extension("png");
    }
    dst
}

fn resize_file(
    src: &Path,
    in_dir: &Path,
    out_dir: Option<&Path>,
    is_mask: bool,
    opts: ResizeOptions,
) -> Result<ResizeRecord> {
    let img = image::open(src).with_context(|| format!("decoding {}", src.display()))?;
    let out = resize(&img, opts.target, opts.preserve_aspect, is_mask);

    let mut record = ResizeRecord {
        source: src.to_path_buf(),
        destination: destination(src, in_dir, out_dir, is_mask),
        before: img.dimensions(),
        after: out.dimensions(),
        content: opts
            .preserve_aspect
            .then(|| placement(img.width(), img.height(), opts.target)),
        written: false,
    };

    if opts.mode.is_dry_run() {
        log::info!(
            "[DRY] {} -> {} size {:?} -> {:?} (mask={is_mask})",
            src.display(),
            record.destination.display(),
            record.before,
            record.after
        );
        return Ok(record);
    }

    let dst = &record.destination;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    out.save(dst)
        .with_context(|| format!("writing {}", dst.display()))?;

    // An in-place mask rewritten as PNG would otherwise leave a stale twin.
    if out_dir.is_none() && dst != src {
        if let Err(e) = fs::remove_file(src) {
            log::warn!("Could not remove original {}: {e}", src.display());
        }
    }

    log::debug!("{} -> {}", src.display(), dst.display());
    record.written = true;
    Ok(record)
}

/// Resize every media file under `in_dir`. Output mirrors the relative
/// layout under `out_dir`, or overwrites in place when `out_dir` is `None`.
pub fn resize_dir(
    in_dir: &Path,
    out_dir: Option<&Path>,
    is_mask: bool,
    opts: ResizeOptions,
    cancel: &Cancel,
) -> Result<ResizeReport, PrepError> {
    require_dir(if is_mask { "mask dir" } else { "image dir" }, in_dir)?;
    if let Some(out) = out_dir.filter(|_| !opts.mode.is_dry_run()) {
        fs::create_dir_all(out).map_err(|source| PrepError::Io {
            path: out.to_path_buf(),
            source,
        })?;
    }

    let files = list_media_files(in_dir);
    if files.is_empty() {
        log::warn!("No images found in: {}", in_dir.display());
    }

    let mut report = ResizeReport {
        input_dir: in_dir.to_path_buf(),
        output_dir: out_dir.map(Path::to_path_buf),
        is_mask,
        options: opts,
        records: Vec::new(),
        skipped: Vec::new(),
        cancelled: false,
    };

    for src in &files {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match resize_file(src, in_dir, out_dir, is_mask, opts) {
            Ok(record) => report.records.push(record),
            Err(e) => report.skipped.push(Skip::from_error(src, &e)),
        }
    }

    log::info!(
        "[{}] processed={}, skipped={}",
        if is_mask { "MASKS " } else { "IMAGES" },
        report.records.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// Image and mask resize runs of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetResizeReport {
    pub images: Option<ResizeReport>,
    pub masks: Option<ResizeReport>,
}

impl StageReport for DatasetResizeReport {
    const STAGE: &'static str = "resize";

    fn summary(&self) -> Summary {
        let parts = [&self.images, &self.masks];
        parts
            .iter()
            .filter_map(|r| r.as_ref().map(StageReport::summary))
            .fold(Summary::default(), |acc, s| Summary {
                processed: acc.processed + s.processed,
                skipped: acc.skipped + s.skipped,
                ..acc
            })
    }

    fn items(&self) -> Vec<ItemRecord> {
        [&self.images, &self.masks]
            .iter()
            .filter_map(|r| r.as_ref())
            .flat_map(StageReport::items)
            .collect()
    }
}

/// Resize an image directory and/or a mask directory. At least one is required.
pub fn resize_dataset(
    images: Option<(&Path, Option<&Path>)>,
    masks: Option<(&Path, Option<&Path>)>,
    opts: ResizeOptions,
    cancel: &Cancel,
) -> Result<DatasetResizeReport, PrepError> {
    if images.is_none() && masks.is_none() {
        return Err(PrepError::NoInput);
    }
    if let Some((dir, _)) = images {
        require_dir("image dir", dir)?;
    }
    if let Some((dir, _)) = masks {
        require_dir("mask dir", dir)?;
    }

    let images = images
        .map(|(dir, out)| resize_dir(dir, out, false, opts, cancel))
        .transpose()?;
    let masks = masks
        .map(|(dir, out)| resize_dir(dir, out, true, opts, cancel))
        .transpose()?;
    Ok(DatasetResizeReport { images, masks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn square(edge: u32) -> TargetSize {
        TargetSize::square(edge).expect("positive size")
    }

    #[test]
    fn placement_matches_letterbox_scenario() {
        let at = placement(512, 384, square(256));
        assert_eq!(
            at,
            Placement {
                width: 256,
                height: 192,
                left: 0,
                top: 32,
            }
        );
    }

    #[test]
    fn placement_rounds_half_to_even_and_never_collapses() {
        let target = TargetSize::new(5, 5).unwrap();
        assert_eq!(placement(5, 10, target).width, 2);
        assert_eq!(placement(5, 10, target).left, 1);

        let thin = placement(1000, 1, square(256));
        assert_eq!((thin.width, thin.height), (256, 1));
        assert_eq!(thin.top, 127);
    }

    #[test]
    fn stretch_hits_target_exactly() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(37, 91));
        let out = resize(&img, TargetSize::new(64, 48).unwrap(), false, false);
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn aspect_mode_pads_with_zero_outside_content() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(512, 384, Rgb([200, 100, 50])));
        let out = resize(&img, square(256), true, false).to_rgb8();
        assert_eq!(out.dimensions(), (256, 256));

        for (x, y, px) in out.enumerate_pixels() {
            let inside = (32..224).contains(&y);
            if inside {
                let expected = [200u8, 100, 50];
                for (got, want) in px.0.iter().zip(expected) {
                    assert!(got.abs_diff(want) <= 1, "content at ({x},{y}): {px:?}");
                }
            } else {
                assert_eq!(px, &Rgb([0, 0, 0]), "padding at ({x},{y})");
            }
        }
    }

    #[test]
    fn labels_keep_their_values_and_become_single_channel() {
        let mut mask = RgbImage::new(30, 20);
        for (x, _, px) in mask.enumerate_pixels_mut() {
            if x % 3 == 0 {
                *px = Rgb([255, 255, 255]);
            }
        }
        let out = resize(&DynamicImage::ImageRgb8(mask), square(17), true, true);

        let DynamicImage::ImageLuma8(gray) = out else {
            panic!("mask should be single-channel");
        };
        assert!(gray.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(gray.pixels().any(|p| p.0[0] == 255));
    }

    #[test]
    fn resize_dir_writes_masks_as_png_and_skips_corrupt_files() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let masks = temp.path().join("mask");
        let out = temp.path().join("mask_r");
        fs::create_dir_all(masks.join("sub")).unwrap();
        GrayImage::from_pixel(40, 20, Luma([255]))
            .save(masks.join("sub/a_mask.png"))
            .unwrap();
        fs::write(masks.join("b_mask.png"), b"garbage").unwrap();

        let opts = ResizeOptions {
            target: square(16),
            preserve_aspect: true,
            mode: RunMode::Apply,
        };
        let report = resize_dir(&masks, Some(&out), true, opts, &Cancel::new()).expect("resize");

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        let written = out.join("sub/a_mask.png");
        assert_eq!(report.records[0].destination, written);
        let gray = image::open(&written).unwrap().into_luma8();
        assert_eq!(gray.dimensions(), (16, 16));
        assert_eq!(gray.get_pixel(8, 0).0[0], 0);
        assert_eq!(gray.get_pixel(8, 8).0[0], 255);
        assert!(masks.join("sub/a_mask.png").exists());
    }

    #[test]
    fn in_place_mask_resize_replaces_the_source() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let src = temp.path().join("a_mask.jpg");
        GrayImage::from_pixel(8, 8, Luma([255])).save(&src).unwrap();

        let opts = ResizeOptions {
            target: square(4),
            preserve_aspect: false,
            mode: RunMode::Apply,
        };
        resize_dir(temp.path(), None, true, opts, &Cancel::new()).expect("resize");

        assert!(!src.exists());
        let gray = image::open(temp.path().join("a_mask.png")).unwrap().into_luma8();
        assert_eq!(gray.dimensions(), (4, 4));
    }

    #[test]
    fn resize_dataset_requires_an_input() {
        let opts = ResizeOptions {
            target: square(8),
            preserve_aspect: false,
            mode: RunMode::DryRun,
        };
        let err = resize_dataset(None, None, opts, &Cancel::new()).unwrap_err();
        assert!(matches!(err, PrepError::NoInput));
    }
}
