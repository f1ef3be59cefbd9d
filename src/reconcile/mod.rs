//! Image/mask pairing across split folders.
//!
//! Two passes, run in this order and composed only through the directories
//! they read and write:
//!
//! * [`merge`] gathers `data_<tag>/images_<tag>` + `masks_<tag>` splits into a
//!   single `img/` + `mask/` pair of folders, prefixing every basename with its
//!   split tag so names never collide.
//! * [`prune`] removes images without a `<base>_mask.*` counterpart and masks
//!   without a `<base>.*` image.
//!
//! Matching is exact string equality on basenames. The only relaxed lookup is
//! the single-candidate fallback in [`merge::resolve_mask`], and ambiguity
//! there is reported, never resolved.

pub mod merge;
pub mod prune;

pub use merge::{gather, resolve_mask, GatherReport, MaskMatch, SplitReport};
pub use prune::{plan_prune, prune, PrunePlan, PruneReport, UnpairedMask, UnpairedReason};
