//! Shallow tree-size estimation.
//!
//! Before asking the OS for a watch we want a rough file count, cheaply.
//! We count the files directly under the root, then walk a handful of
//! top-level subdirectories and extrapolate their average over all of
//! them. Ignored subtrees are never entered, and each sampled walk stops
//! once the running total passes `cap`, so a 50k-file dependency tree
//! costs nothing and a genuinely huge tree costs at most `cap` entries.
//!
//! Uneven trees get misestimated. That's fine: the result only picks
//! between watching and skipping, and a skipped root still has manual
//! refresh.

use grove_core::IgnoreRules;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Result of a size probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEstimate {
    pub estimated_files: usize,
    pub top_level_files: usize,
    pub subdirectories: usize,
    pub sampled: usize,
}

/// Estimates how many files live under `root`.
///
/// Fails only if the root itself can't be listed; unreadable entries below
/// it are skipped.
pub fn estimate_tree_size(
    root: &Path,
    rules: &IgnoreRules,
    sample_dirs: usize,
    cap: usize,
) -> io::Result<TreeEstimate> {
    let mut top_level_files = 0usize;
    let mut subdirs = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry in {}: {}", root.display(), e);
                continue;
            }
        };
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if file_type.is_symlink() {
            continue;
        }

        let path = entry.path();
        if rules.is_ignored(&path, file_type.is_dir()) {
            continue;
        }
        if file_type.is_dir() {
            subdirs.push(path);
        } else {
            top_level_files += 1;
        }
    }

    subdirs.sort();
    let subdirectories = subdirs.len();
    let mut sampled = 0usize;
    let mut sampled_files = 0usize;

    for dir in subdirs.iter().take(sample_dirs) {
        sampled += 1;
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !rules.is_ignored(e.path(), e.file_type().is_dir()));

        for entry in walker.filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                sampled_files += 1;
            }
            if top_level_files + sampled_files > cap {
                break;
            }
        }
        if top_level_files + sampled_files > cap {
            break;
        }
    }

    let estimated_files = if sampled == 0 {
        top_level_files
    } else {
        let average = sampled_files as f64 / sampled as f64;
        let extrapolated = (average * subdirectories as f64).ceil() as usize;
        top_level_files + extrapolated.max(sampled_files)
    };

    debug!(
        "Estimated {} files under {} ({} of {} subdirectories sampled)",
        estimated_files,
        root.display(),
        sampled,
        subdirectories
    );

    Ok(TreeEstimate {
        estimated_files,
        top_level_files,
        subdirectories,
        sampled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch_many(dir: &Path, count: usize) {
        fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            fs::write(dir.join(format!("f{}.txt", i)), "").unwrap();
        }
    }

    #[test]
    fn test_extrapolates_from_sample() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "hi").unwrap();
        for name in ["a", "b", "c", "d"] {
            touch_many(&dir.path().join(name), 10);
        }

        let rules = IgnoreRules::with_defaults(dir.path()).unwrap();
        let estimate = estimate_tree_size(dir.path(), &rules, 2, 10_000).unwrap();

        assert_eq!(estimate.top_level_files, 1);
        assert_eq!(estimate.subdirectories, 4);
        assert_eq!(estimate.sampled, 2);
        assert_eq!(estimate.estimated_files, 41);
    }

    #[test]
    fn test_ignored_subtrees_are_not_counted() {
        let dir = tempdir().unwrap();
        touch_many(&dir.path().join("node_modules/pkg"), 50);
        touch_many(&dir.path().join("src"), 3);

        let rules = IgnoreRules::with_defaults(dir.path()).unwrap();
        let estimate = estimate_tree_size(dir.path(), &rules, 5, 10_000).unwrap();

        assert_eq!(estimate.subdirectories, 1);
        assert_eq!(estimate.estimated_files, 3);
    }

    #[test]
    fn test_walk_stops_at_cap() {
        let dir = tempdir().unwrap();
        touch_many(&dir.path().join("big"), 40);

        let rules = IgnoreRules::new(dir.path(), &[]).unwrap();
        let estimate = estimate_tree_size(dir.path(), &rules, 5, 10).unwrap();

        assert!(estimate.estimated_files > 10);
        assert!(estimate.estimated_files < 40);
    }
}
