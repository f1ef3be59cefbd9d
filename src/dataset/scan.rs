use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::model::{Asset, Role, Split};
use crate::config::has_image_extension;
use crate::error::PrepError;

// ---------------------------------------------------------------------------
// Media enumeration
// ---------------------------------------------------------------------------

/// Recursively list media files under `dir`, sorted by path.
///
/// Only regular files with an allow-listed extension are returned; hidden
/// files (leading dot) are always excluded. Entries that cannot be read are
/// logged and skipped.
pub fn list_media_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {e}", dir.display());
                continue;
            }
        };
        if !entry.file_type().is_file() || is_hidden(entry.path()) {
            continue;
        }
        if has_image_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    files
}

/// [`list_media_files`] wrapped into [`Asset`]s of the given role.
pub fn list_assets(dir: &Path, role: Role) -> Vec<Asset> {
    list_media_files(dir)
        .into_iter()
        .filter_map(|path| {
            let shown = path.display().to_string();
            let asset = Asset::new(path, role);
            if asset.is_none() {
                log::warn!("Skipping {shown}: file name is not valid UTF-8");
            }
            asset
        })
        .collect()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Split layout discovery
// ---------------------------------------------------------------------------

/// Locate a subdirectory of `base`.
///
/// `exact` wins when it exists. Otherwise, among subdirectories whose name
/// starts with `prefix` (case-insensitive), the one sharing the longest
/// common prefix with `exact` is chosen; ties go to the smallest name.
pub fn find_subdir(base: &Path, exact: &str, prefix: &str) -> Option<PathBuf> {
    let exact_dir = base.join(exact);
    if exact_dir.is_dir() {
        return Some(exact_dir);
    }

    let exact_lower = exact.to_ascii_lowercase();
    let prefix_lower = prefix.to_ascii_lowercase();
    let mut best: Option<(usize, String, PathBuf)> = None;

    for entry in fs::read_dir(base).ok()?.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let lower = name.to_ascii_lowercase();
        if !lower.starts_with(&prefix_lower) {
            continue;
        }
        let shared = common_prefix_len(&lower, &exact_lower);
        let better = match &best {
            None => true,
            Some((best_len, best_name, _)) => {
                shared > *best_len || (shared == *best_len && name < *best_name)
            }
        };
        if better {
            best = Some((shared, name, path));
        }
    }

    best.map(|(_, _, path)| path)
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

/// Split folders directly under `root` whose name starts with `prefix`
/// (case-insensitive), sorted by name. The tag is the remainder of the name.
pub fn discover_splits(root: &Path, prefix: &str) -> Result<Vec<Split>, PrepError> {
    let prefix_lower = prefix.to_ascii_lowercase();
    let mut splits = Vec::new();

    let entries = fs::read_dir(root).map_err(|source| PrepError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.to_ascii_lowercase().starts_with(&prefix_lower) {
            continue;
        }
        let tag = name[prefix.len()..].to_string();
        if tag.is_empty() {
            log::warn!("Ignoring split folder without a tag: {}", dir.display());
            continue;
        }
        splits.push(Split { tag, dir });
    }

    splits.sort_by(|a, b| a.dir.cmp(&b.dir));
    Ok(splits)
}
