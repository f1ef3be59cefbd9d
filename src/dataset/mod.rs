/// Dataset layer: asset naming rules and directory enumeration.
///
/// Architecture:
/// ```text
///  raw root / merged img + mask dirs
///        │
///        ▼
///   ┌──────────┐
///   │  scan     │  walk dirs → sorted media paths, split folders
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model    │  Asset { basename, role, split_tag }, mask roots
///   └──────────┘
///        │
///        ▼
///   reconcile / binarize / resample
/// ```

pub mod model;
pub mod scan;

pub use model::{mask_file_name, mask_root, split_basename, Asset, Role, Split};
pub use scan::{discover_splits, find_subdir, list_assets, list_media_files};
