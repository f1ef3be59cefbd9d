//! Segmentation dataset preparation.
//!
//! Stages, normally run in this order:
//! 1. [`reconcile::gather`] merges per-split image/mask folders into one pair
//!    of folders with split-qualified basenames.
//! 2. [`reconcile::prune`] deletes images and masks without an exact partner.
//! 3. [`binarize::binarize_dir`] normalizes masks to `{0, 255}`.
//! 4. [`resample::resize_dataset`] brings everything to a fixed resolution.
//!
//! Stages share no state besides the directories they read and write.

pub mod binarize;
pub mod cancel;
pub mod config;
pub mod dataset;
pub mod error;
pub mod reconcile;
pub mod report;
pub mod resample;
pub mod synth;

pub use cancel::Cancel;
pub use config::{MaskOutput, MultilevelPolicy, RunMode, TargetSize};
pub use error::PrepError;
pub use report::{StageReport, Summary};
