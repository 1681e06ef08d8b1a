//! Filesystem enumeration: every file and directory under a run's root,
//! honoring the exclude-glob list (§4.1 step 1).

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::globs::ExcludeGlobs;

/// One enumerated file, relative to the scan root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub absolute_path: PathBuf,
    pub relative_path: String,
}

/// One enumerated directory (used to seed directory-level analysis jobs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedDir {
    pub relative_path: String,
}

/// Result of a full walk.
#[derive(Debug, Default)]
pub struct WalkResult {
    pub files: Vec<WalkedFile>,
    pub dirs: Vec<WalkedDir>,
}

/// Walks `root`, applying `excludes` to both files and the directories
/// that contain them. Individual entries that cannot be read (permission
/// errors, broken symlinks encountered mid-walk) are logged and skipped
/// rather than aborting the whole walk; an unreadable root itself is
/// the one failure this returns as an `Err`, since there is nothing
/// useful left to scout.
pub fn walk(root: &Path, excludes: &ExcludeGlobs) -> anyhow::Result<WalkResult> {
    if !root.exists() {
        anyhow::bail!("scan root does not exist: {}", root.display());
    }
    let mut result = WalkResult::default();
    let mut seen_dirs = std::collections::BTreeSet::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        let Ok(relative) = entry.path().strip_prefix(root) else {
            return true;
        };
        if relative.as_os_str().is_empty() || !entry.file_type().is_dir() {
            return true;
        }
        let included = excludes.decide(relative).is_included();
        if !included {
            tracing::debug!(path = %relative.display(), "excluded directory pruned from walk");
        }
        included
    });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        if excludes.decide(relative).is_included() {
            if entry.file_type().is_file() {
                result.files.push(WalkedFile {
                    absolute_path: path.to_path_buf(),
                    relative_path: relative.to_string_lossy().replace('\\', "/"),
                });
                if let Some(parent) = relative.parent()
                    && !parent.as_os_str().is_empty()
                    && seen_dirs.insert(parent.to_path_buf())
                {
                    result.dirs.push(WalkedDir {
                        relative_path: parent.to_string_lossy().replace('\\', "/"),
                    });
                }
            } else if entry.file_type().is_dir() && seen_dirs.insert(relative.to_path_buf()) {
                result.dirs.push(WalkedDir {
                    relative_path: relative.to_string_lossy().replace('\\', "/"),
                });
            }
        }
    }

    Ok(result)
}
