use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::config::{DEFAULT_SPLIT_PREFIX, IMAGES_PREFIX, MASKS_PREFIX, MASK_SUFFIX};
use crate::dataset::split_basename;

// ---------------------------------------------------------------------------
// Deterministic noise
// ---------------------------------------------------------------------------

/// SplitMix64 stream; one seed gives the same dataset on every platform.
struct NoiseRng(u64);

impl NoiseRng {
    fn new(seed: u64) -> Self {
        NoiseRng(seed)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Zero-mean pixel noise (Box-Muller).
    fn jitter(&mut self, sigma: f64) -> f64 {
        let radius = (-2.0 * self.unit().max(f64::MIN_POSITIVE).ln()).sqrt();
        let angle = std::f64::consts::TAU * self.unit();
        sigma * radius * angle.cos()
    }
}

// ---------------------------------------------------------------------------
// Sample layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SampleSpec {
    pub splits: usize,
    pub images_per_split: usize,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            splits: 2,
            images_per_split: 4,
            width: 48,
            height: 36,
            seed: 42,
        }
    }
}

/// What the generated raw dataset should gather into, by merged basename.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleManifest {
    pub images: usize,
    pub masks: usize,
    pub expected_pairs: Vec<String>,
    pub unpaired_images: Vec<String>,
    pub orphan_masks: Vec<String>,
}

fn sample_image(spec: &SampleSpec, rng: &mut NoiseRng) -> RgbImage {
    let (w, h) = (spec.width as f64, spec.height as f64);
    RgbImage::from_fn(spec.width, spec.height, |x, y| {
        let base = 255.0 * (x as f64 / w + y as f64 / h) / 2.0;
        let noisy = |offset: f64, rng: &mut NoiseRng| {
            (base + offset + rng.jitter(8.0)).clamp(0.0, 255.0) as u8
        };
        Rgb([noisy(0.0, rng), noisy(-20.0, rng), noisy(20.0, rng)])
    })
}

/// Disc with a soft ring: 255 core, 128 edge, 0 background.
fn sample_mask(spec: &SampleSpec, rng: &mut NoiseRng) -> GrayImage {
    let (w, h) = (spec.width as f64, spec.height as f64);
    let cx = w * (0.35 + 0.3 * rng.unit());
    let cy = h * (0.35 + 0.3 * rng.unit());
    let r = w.min(h) * 0.25;
    GrayImage::from_fn(spec.width, spec.height, |x, y| {
        let d = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
        if d < r - 1.5 {
            Luma([255])
        } else if d < r {
            Luma([128])
        } else {
            Luma([0])
        }
    })
}

fn save_rgb(img: &RgbImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("writing {}", path.display()))
}

fn save_gray(img: &GrayImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("writing {}", path.display()))
}

/// Write `data_C1..` split folders under `root`.
///
/// Split 1 holds an image without a mask, an orphan mask and an image with
/// two relaxed mask candidates. Split 2 (if any) uses a non-exact masks
/// folder name and one relaxed mask name.
pub fn write_sample_dataset(root: &Path, spec: &SampleSpec) -> Result<SampleManifest> {
    let mut rng = NoiseRng::new(spec.seed);
    let mut manifest = SampleManifest::default();

    for i in 1..=spec.splits {
        let tag = format!("C{i}");
        let split_dir = root.join(format!("{DEFAULT_SPLIT_PREFIX}{tag}"));
        let images_dir = split_dir.join(format!("{IMAGES_PREFIX}{tag}"));
        let masks_dir = if i == 2 {
            split_dir.join(format!("{MASKS_PREFIX}{tag}_export"))
        } else {
            split_dir.join(format!("{MASKS_PREFIX}{tag}"))
        };
        fs::create_dir_all(&images_dir).context("creating images folder")?;
        fs::create_dir_all(&masks_dir).context("creating masks folder")?;

        for n in 1..=spec.images_per_split {
            let base = format!("100H{n:04}");
            save_rgb(&sample_image(spec, &mut rng), &images_dir.join(format!("{base}.jpg")))?;
            manifest.images += 1;

            let merged = split_basename(&tag, &base);
            let mask_name = match (i, n) {
                (1, n) if n == spec.images_per_split => None,
                (2, 1) => Some(format!("{base}{MASK_SUFFIX}_v2.png")),
                _ => Some(format!("{base}{MASK_SUFFIX}.png")),
            };
            match mask_name {
                Some(name) => {
                    save_gray(&sample_mask(spec, &mut rng), &masks_dir.join(name))?;
                    manifest.masks += 1;
                    manifest.expected_pairs.push(merged);
                }
                None => manifest.unpaired_images.push(merged),
            }
        }

        if i == 1 {
            let orphan = format!("900H0000{MASK_SUFFIX}");
            save_gray(&sample_mask(spec, &mut rng), &masks_dir.join(format!("{orphan}.png")))?;
            manifest.masks += 1;
            manifest.orphan_masks.push(format!("{tag}:{orphan}"));

            let base = "amb0001";
            save_rgb(&sample_image(spec, &mut rng), &images_dir.join(format!("{base}.jpg")))?;
            manifest.images += 1;
            manifest.unpaired_images.push(split_basename(&tag, base));
            for variant in ["a", "b"] {
                let stem = format!("{base}{MASK_SUFFIX}_{variant}");
                save_gray(&sample_mask(spec, &mut rng), &masks_dir.join(format!("{stem}.png")))?;
                manifest.masks += 1;
                manifest.orphan_masks.push(format!("{tag}:{stem}"));
            }
        }
    }

    manifest.expected_pairs.sort();
    manifest.unpaired_images.sort();
    manifest.orphan_masks.sort();
    Ok(manifest)
}
