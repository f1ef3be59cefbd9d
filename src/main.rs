use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use maskprep::binarize::binarize_dir;
use maskprep::config::{DEFAULT_SPLIT_PREFIX, DEFAULT_TARGET_SIZE};
use maskprep::reconcile::{gather, prune};
use maskprep::report::{write_report, ReportFormat};
use maskprep::resample::{resize_dataset, ResizeOptions};
use maskprep::{Cancel, MaskOutput, MultilevelPolicy, RunMode, StageReport, TargetSize};

#[derive(Parser)]
#[command(
    name = "maskprep",
    version,
    about = "Prepare paired image/segmentation-mask datasets",
    after_help = "Typical order:\n  \
                  maskprep gather --root raw --out output\n  \
                  maskprep prune --img-dir output/img --mask-dir output/mask\n  \
                  maskprep binarize --mask-dir output/mask --out-png\n  \
                  maskprep resize --img-dir output/img --mask-dir output/mask --keep-aspect"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge data_<tag>/images_<tag> + masks_<tag> splits into img/ and mask/
    Gather(GatherArgs),
    /// Delete images and masks without an exact <base> <-> <base>_mask pair
    Prune(PruneArgs),
    /// Force masks to single-channel binary {0,255}
    Binarize(BinarizeArgs),
    /// Resize images and masks to a fixed square size
    Resize(ResizeArgs),
}

#[derive(Args)]
struct Common {
    /// Show planned actions without touching any file
    #[arg(long)]
    dry_run: bool,

    /// Write the stage report (.json or .csv)
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

impl Common {
    fn mode(&self) -> RunMode {
        RunMode::from_dry_run(self.dry_run)
    }

    /// Reject an unusable report path before any file is touched.
    fn validate(&self) -> Result<()> {
        if let Some(path) = &self.report {
            ReportFormat::from_path(path)?;
        }
        Ok(())
    }

    fn finish<R: StageReport>(&self, report: &R) -> Result<()> {
        report.summary().log(R::STAGE);
        if let Some(path) = &self.report {
            write_report(report, path)?;
        }
        Ok(())
    }
}

#[derive(Args)]
struct GatherArgs {
    /// Folder containing the split folders (data_C1, data_C2, ...)
    #[arg(long)]
    root: PathBuf,

    /// Output root (creates 'img' and 'mask')
    #[arg(long)]
    out: PathBuf,

    /// Name prefix of split folders; the remainder is the split tag
    #[arg(long, default_value = DEFAULT_SPLIT_PREFIX)]
    split_prefix: String,

    #[command(flatten)]
    common: Common,
}

#[derive(Args)]
struct PruneArgs {
    /// Directory with images
    #[arg(long)]
    img_dir: PathBuf,

    /// Directory with masks
    #[arg(long)]
    mask_dir: PathBuf,

    #[command(flatten)]
    common: Common,
}

#[derive(Args)]
struct BinarizeArgs {
    /// Folder with mask images
    #[arg(long)]
    mask_dir: PathBuf,

    /// Write masks as lossless PNG renamed to *_mask.png (otherwise overwrite in place)
    #[arg(long)]
    out_png: bool,

    /// Collapse multi-level masks with `value > N` instead of `value > 0`
    #[arg(long, value_name = "N")]
    threshold: Option<u8>,

    #[command(flatten)]
    common: Common,
}

#[derive(Args)]
struct ResizeArgs {
    /// Input images directory
    #[arg(long)]
    img_dir: Option<PathBuf>,

    /// Input masks directory
    #[arg(long)]
    mask_dir: Option<PathBuf>,

    /// Output dir for images (omit to overwrite)
    #[arg(long)]
    out_img: Option<PathBuf>,

    /// Output dir for masks (omit to overwrite)
    #[arg(long)]
    out_mask: Option<PathBuf>,

    /// Target size (square)
    #[arg(long, default_value_t = DEFAULT_TARGET_SIZE)]
    size: u32,

    /// Keep aspect ratio with zero padding
    #[arg(long)]
    keep_aspect: bool,

    #[command(flatten)]
    common: Common,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let cancel = Cancel::new();

    match cli.command {
        Commands::Gather(args) => {
            args.common.validate()?;
            let report = gather(
                &args.root,
                &args.out,
                &args.split_prefix,
                args.common.mode(),
                &cancel,
            )?;
            log::info!(
                "Images copied: {}, masks copied: {}",
                report.images_copied(),
                report.masks_copied()
            );
            args.common.finish(&report)
        }
        Commands::Prune(args) => {
            args.common.validate()?;
            let report = prune(&args.img_dir, &args.mask_dir, args.common.mode(), &cancel)?;
            args.common.finish(&report)
        }
        Commands::Binarize(args) => {
            args.common.validate()?;
            let policy = args
                .threshold
                .map(MultilevelPolicy::Threshold)
                .unwrap_or_default();
            let output = if args.out_png {
                MaskOutput::Png
            } else {
                MaskOutput::InPlace
            };
            let report = binarize_dir(&args.mask_dir, policy, output, args.common.mode(), &cancel)?;
            args.common.finish(&report)
        }
        Commands::Resize(args) => {
            args.common.validate()?;
            let opts = ResizeOptions {
                target: TargetSize::square(args.size)?,
                preserve_aspect: args.keep_aspect,
                mode: args.common.mode(),
            };
            let images = args
                .img_dir
                .as_deref()
                .map(|dir| (dir, args.out_img.as_deref()));
            let masks = args
                .mask_dir
                .as_deref()
                .map(|dir| (dir, args.out_mask.as_deref()));
            let report = resize_dataset(images, masks, opts, &cancel)?;
            args.common.finish(&report)
        }
    }
}
