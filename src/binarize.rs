use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::GrayImage;
use serde::Serialize;

use crate::cancel::Cancel;
use crate::config::{MaskOutput, MultilevelPolicy, RunMode, IN_PLACE_JPEG_QUALITY, MASK_SUFFIX};
use crate::dataset::list_media_files;
use crate::error::{require_dir, PrepError};
use crate::report::{ItemRecord, Skip, StageReport, Summary};

// ---------------------------------------------------------------------------
// Value-set classification
// ---------------------------------------------------------------------------

/// Which encoding a mask arrives in, judged from its distinct sample values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Values ⊆ {0, 255}.
    AlreadyBinary,
    /// Values ⊆ {0, 1}, but not ⊆ {0, 255}.
    ZeroOneLabels,
    /// Anything else: multi-class labels or antialiased edges.
    Multilevel,
}

/// The set of distinct `u8` values present in a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSet([bool; 256]);

impl ValueSet {
    pub fn from_samples(samples: &[u8]) -> Self {
        let mut seen = [false; 256];
        for &v in samples {
            seen[v as usize] = true;
        }
        Self(seen)
    }

    /// Distinct values in ascending order.
    pub fn values(&self) -> Vec<u8> {
        (0..=255u8).filter(|&v| self.0[v as usize]).collect()
    }

    pub fn is_subset_of(&self, allowed: &[u8]) -> bool {
        self.values().iter().all(|v| allowed.contains(v))
    }

    /// Classification is tiered: {0,255} is checked before {0,1}, so an
    /// all-zero buffer is `AlreadyBinary`.
    pub fn classify(&self) -> Encoding {
        if self.is_subset_of(&[0, 255]) {
            Encoding::AlreadyBinary
        } else if self.is_subset_of(&[0, 1]) {
            Encoding::ZeroOneLabels
        } else {
            Encoding::Multilevel
        }
    }
}

pub fn classify(samples: &[u8]) -> Encoding {
    ValueSet::from_samples(samples).classify()
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Map one sample according to the input's encoding.
fn map_sample(v: u8, encoding: Encoding, policy: MultilevelPolicy) -> u8 {
    match encoding {
        Encoding::AlreadyBinary => v,
        Encoding::ZeroOneLabels => v * 255,
        Encoding::Multilevel => {
            let foreground = match policy {
                MultilevelPolicy::NonzeroCollapse => v > 0,
                MultilevelPolicy::Threshold(cutoff) => v > cutoff,
            };
            if foreground {
                255
            } else {
                0
            }
        }
    }
}

/// Map a single-channel mask to the `{0, 255}` alphabet. Shape is preserved.
pub fn binarize(mask: &GrayImage, policy: MultilevelPolicy) -> (Encoding, GrayImage) {
    let encoding = classify(mask.as_raw());
    let mut out = mask.clone();
    if encoding != Encoding::AlreadyBinary {
        for v in out.iter_mut() {
            *v = map_sample(*v, encoding, policy);
        }
    }
    (encoding, out)
}

// ---------------------------------------------------------------------------
// Per-file processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct BinarizeRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub encoding: Encoding,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
    pub written: bool,
    /// Non-fatal remarks: lossy overwrite, source left behind.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BinarizeReport {
    pub mask_dir: PathBuf,
    pub policy: MultilevelPolicy,
    pub output: MaskOutput,
    pub mode: RunMode,
    pub records: Vec<BinarizeRecord>,
    pub skipped: Vec<Skip>,
    pub cancelled: bool,
}

impl StageReport for BinarizeReport {
    const STAGE: &'static str = "binarize";

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
                .detail(format!("{:?} -> {:?}", r.before, r.after))
        });
        let skipped = self
            .skipped
            .iter()
            .map(|s| ItemRecord::new(Self::STAGE, "skip", &s.path).detail(s.reason.clone()));
        done.chain(skipped).collect()
    }
}

/// PNG destination for a mask: `<stem>.png`, with the mask suffix appended
/// to the stem when missing. A `.PNG` extension is kept as-is.
pub fn png_destination(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = if stem.ends_with(MASK_SUFFIX) {
        stem
    } else {
        format!("{stem}{MASK_SUFFIX}")
    };
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.eq_ignore_ascii_case("png"))
        .unwrap_or("png");
    path.with_file_name(format!("{stem}.{ext}"))
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

fn write_png(mask: &GrayImage, dest: &Path) -> Result<()> {
    let file = File::create(dest).with_context(|| format!("creating {}", dest.display()))?;
    let encoder =
        PngEncoder::new_with_quality(BufWriter::new(file), CompressionType::Best, PngFilter::Adaptive);
    mask.write_with_encoder(encoder)
        .with_context(|| format!("encoding PNG {}", dest.display()))
}

fn write_in_place(mask: &GrayImage, dest: &Path) -> Result<()> {
    if is_jpeg(dest) {
        let file = File::create(dest).with_context(|| format!("creating {}", dest.display()))?;
        let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), IN_PLACE_JPEG_QUALITY);
        mask.write_with_encoder(encoder)
            .with_context(|| format!("encoding JPEG {}", dest.display()))
    } else {
        mask.save(dest)
            .with_context(|| format!("writing {}", dest.display()))
    }
}

/// Decode, luma-reduce, binarize and (unless dry-run) persist one mask.
pub fn binarize_file(
    path: &Path,
    policy: MultilevelPolicy,
    output: MaskOutput,
    mode: RunMode,
) -> Result<BinarizeRecord> {
    let gray = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .into_luma8();

    let before = ValueSet::from_samples(gray.as_raw()).values();
    let (encoding, binary) = binarize(&gray, policy);
    let after = ValueSet::from_samples(binary.as_raw()).values();

    let destination = match output {
        MaskOutput::Png => png_destination(path),
        MaskOutput::InPlace => path.to_path_buf(),
    };

    log::info!(
        "[OK] {}: before uniques={before:?} -> after uniques={after:?}",
        path.display()
    );

    let mut record = BinarizeRecord {
        source: path.to_path_buf(),
        destination,
        encoding,
        before,
        after,
        written: false,
        notes: Vec::new(),
    };

    if mode.is_dry_run() {
        log::debug!("[DRY] {} -> {}", path.display(), record.destination.display());
        return Ok(record);
    }

    match output {
        MaskOutput::Png => {
            write_png(&binary, &record.destination)?;
            if record.destination != path {
                if let Err(e) = fs::remove_file(path) {
                    log::warn!("Could not remove original {}: {e}", path.display());
                    record.notes.push(format!("original kept: {e}"));
                }
            }
        }
        MaskOutput::InPlace => {
            write_in_place(&binary, &record.destination)?;
            if is_jpeg(&record.destination) {
                log::warn!(
                    "{} rewritten as lossy JPEG; intermediate levels may reappear",
                    record.destination.display()
                );
                record.notes.push("lossy jpeg overwrite".to_string());
            }
        }
    }
    record.written = true;
    Ok(record)
}

// ---------------------------------------------------------------------------
// Stage entry-point
// ---------------------------------------------------------------------------

/// Binarize every mask under `mask_dir` (recursively).
pub fn binarize_dir(
    mask_dir: &Path,
    policy: MultilevelPolicy,
    output: MaskOutput,
    mode: RunMode,
    cancel: &Cancel,
) -> Result<BinarizeReport, PrepError> {
    require_dir("mask dir", mask_dir)?;

    let files = list_media_files(mask_dir);
    if files.is_empty() {
        log::warn!("No image files found in {}", mask_dir.display());
    } else {
        log::info!("Found {} mask files (policy: {policy}).", files.len());
    }

    let mut report = BinarizeReport {
        mask_dir: mask_dir.to_path_buf(),
        policy,
        output,
        mode,
        records: Vec::new(),
        skipped: Vec::new(),
        cancelled: false,
    };

    for path in &files {
        if cancel.is_cancelled() {
            log::warn!("Cancelled before {}", path.display());
            report.cancelled = true;
            break;
        }
        match binarize_file(path, policy, output, mode) {
            Ok(record) => report.records.push(record),
            Err(e) => report.skipped.push(Skip::from_error(path, &e)),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gray(width: u32, height: u32, data: Vec<u8>) -> GrayImage {
        GrayImage::from_raw(width, height, data).expect("valid buffer")
    }

    #[test]
    fn classification_is_tiered() {
        assert_eq!(classify(&[0, 255, 0]), Encoding::AlreadyBinary);
        assert_eq!(classify(&[0, 0]), Encoding::AlreadyBinary);
        assert_eq!(classify(&[]), Encoding::AlreadyBinary);
        assert_eq!(classify(&[1, 1]), Encoding::ZeroOneLabels);
        assert_eq!(classify(&[0, 1]), Encoding::ZeroOneLabels);
        assert_eq!(classify(&[0, 1, 255]), Encoding::Multilevel);
        assert_eq!(classify(&[0, 128, 255]), Encoding::Multilevel);
        assert_eq!(classify(&[0, 2]), Encoding::Multilevel);
    }

    #[test]
    fn already_binary_is_unchanged() {
        let mask = gray(3, 1, vec![0, 255, 0]);
        let (encoding, out) = binarize(&mask, MultilevelPolicy::NonzeroCollapse);
        assert_eq!(encoding, Encoding::AlreadyBinary);
        assert_eq!(out, mask);
    }

    #[test]
    fn zero_one_labels_are_scaled() {
        let mask = gray(2, 2, vec![0, 1, 1, 0]);
        let (_, out) = binarize(&mask, MultilevelPolicy::Threshold(127));
        assert_eq!(out.as_raw(), &vec![0, 255, 255, 0]);
    }

    #[test]
    fn multilevel_collapses_nonzero() {
        let mask = gray(4, 1, vec![0, 128, 255, 3]);
        let (encoding, out) = binarize(&mask, MultilevelPolicy::NonzeroCollapse);
        assert_eq!(encoding, Encoding::Multilevel);
        assert_eq!(out.as_raw(), &vec![0, 255, 255, 255]);
        assert_eq!(ValueSet::from_samples(out.as_raw()).values(), vec![0, 255]);
    }

    #[test]
    fn multilevel_threshold_is_strict() {
        let mask = gray(4, 1, vec![0, 127, 128, 255]);
        let (_, out) = binarize(&mask, MultilevelPolicy::Threshold(127));
        assert_eq!(out.as_raw(), &vec![0, 0, 255, 255]);
    }

    #[test]
    fn binarize_is_idempotent() {
        let samples: Vec<u8> = (0..=255u8).collect();
        for policy in [MultilevelPolicy::NonzeroCollapse, MultilevelPolicy::Threshold(127)] {
            let once = binarize(&gray(16, 16, samples.clone()), policy).1;
            let twice = binarize(&once, policy).1;
            assert_eq!(once, twice);
            assert!(once.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        }
    }

    #[test]
    fn png_destination_appends_suffix_once() {
        assert_eq!(
            png_destination(Path::new("m/a.jpg")),
            PathBuf::from("m/a_mask.png")
        );
        assert_eq!(
            png_destination(Path::new("m/a_mask.jpg")),
            PathBuf::from("m/a_mask.png")
        );
        assert_eq!(
            png_destination(Path::new("m/a_mask.PNG")),
            PathBuf::from("m/a_mask.PNG")
        );
    }

    #[test]
    fn png_output_renames_and_removes_source() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let src = temp.path().join("a.png");
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(1, 1, Luma([128]));
        mask.put_pixel(2, 2, Luma([3]));
        mask.save(&src).expect("write png");

        let report = binarize_dir(
            temp.path(),
            MultilevelPolicy::NonzeroCollapse,
            MaskOutput::Png,
            RunMode::Apply,
            &Cancel::new(),
        )
        .expect("binarize dir");

        assert_eq!(report.summary().processed, 1);
        let dest = temp.path().join("a_mask.png");
        assert!(!src.exists());
        let written = image::open(&dest).expect("open png").into_luma8();
        assert_eq!(written.get_pixel(1, 1).0[0], 255);
        assert_eq!(written.get_pixel(2, 2).0[0], 255);
        assert_eq!(written.get_pixel(0, 0).0[0], 0);
    }

    fn multilevel_mask() -> GrayImage {
        let mut mask = GrayImage::new(8, 8);
        mask.put_pixel(1, 1, Luma([128]));
        mask.put_pixel(2, 2, Luma([3]));
        mask.put_pixel(5, 5, Luma([255]));
        mask
    }

    #[test]
    fn in_place_keeps_path_and_writes_binary_values() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let src = temp.path().join("c_mask.tif");
        multilevel_mask().save(&src).expect("write tiff");

        let record = binarize_file(
            &src,
            MultilevelPolicy::NonzeroCollapse,
            MaskOutput::InPlace,
            RunMode::Apply,
        )
        .expect("binarize tiff");

        assert_eq!(record.destination, src);
        assert!(record.written);
        assert!(record.notes.is_empty());
        let reloaded = image::open(&src).expect("open tiff").into_luma8();
        assert_eq!(ValueSet::from_samples(reloaded.as_raw()).values(), vec![0, 255]);
        assert_eq!(reloaded.get_pixel(2, 2).0[0], 255);
        assert_eq!(fs::read_dir(temp.path()).expect("list dir").count(), 1);
    }

    #[test]
    fn in_place_jpeg_is_flagged_as_lossy() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let src = temp.path().join("d_mask.jpg");
        multilevel_mask().save(&src).expect("write jpeg");

        let record = binarize_file(
            &src,
            MultilevelPolicy::NonzeroCollapse,
            MaskOutput::InPlace,
            RunMode::Apply,
        )
        .expect("binarize jpeg");

        assert_eq!(record.destination, src);
        assert_eq!(record.notes, vec!["lossy jpeg overwrite".to_string()]);
        assert!(src.is_file());
        assert!(!temp.path().join("d_mask.png").exists());
    }

    #[test]
    fn dry_run_leaves_files_alone_and_corrupt_files_are_skipped() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let src = temp.path().join("b_mask.png");
        gray(2, 1, vec![0, 1]).save(&src).expect("write png");
        fs::write(temp.path().join("broken_mask.png"), b"not an image").unwrap();

        let before = fs::read(&src).unwrap();
        let report = binarize_dir(
            temp.path(),
            MultilevelPolicy::NonzeroCollapse,
            MaskOutput::Png,
            RunMode::DryRun,
            &Cancel::new(),
        )
        .expect("binarize dir");

        assert_eq!(fs::read(&src).unwrap(), before);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].after, vec![0, 255]);
        assert!(!report.records[0].written);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("broken_mask.png"));
    }

    #[test]
    fn missing_dir_is_a_configuration_error() {
        let err = binarize_dir(
            Path::new("/definitely/not/here"),
            MultilevelPolicy::NonzeroCollapse,
            MaskOutput::Png,
            RunMode::DryRun,
            &Cancel::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PrepError::NotADirectory { .. }));
    }
}
