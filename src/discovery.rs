use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::FileOrder;

/// List the regular files directly inside `dir` whose extension is `extension`.
///
/// The match is exact and case-sensitive. Subdirectories, dangling symlinks
/// and other non-regular entries are skipped; symlinks to regular files count.
/// There is no recursion.
pub fn discover_log_files(dir: &Path, extension: &str, order: FileOrder) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list directory '{}'", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("Failed to list directory '{}'", dir.display()))?;
        let path = entry.path();

        // fs::metadata follows symlinks; broken links fail and are skipped
        let is_file = fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false);
        if is_file && has_extension(&path, extension) {
            files.push(path);
        }
    }

    sort_files(&mut files, order);
    Ok(files)
}

/// Exact match on the text after the last dot of the file name, so `.log`
/// has the extension `log`
fn has_extension(path: &Path, extension: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.rsplit_once('.'))
        .is_some_and(|(_, ext)| ext == extension)
}

/// Apply the requested dispatch order
pub fn sort_files(files: &mut [PathBuf], order: FileOrder) {
    match order {
        FileOrder::None => {
            // Keep directory order - no sorting needed
        }
        FileOrder::Name => {
            files.sort();
        }
        FileOrder::Mtime => {
            // Sort by modification time (oldest first)
            files.sort_by_key(|path| {
                fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            });
        }
    }
}

/// Create the input directory when it does not exist yet
///
/// Returns true when the directory was created.
pub fn ensure_dir(dir: &Path) -> Result<bool> {
    if dir.exists() {
        return Ok(false);
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory '{}'", dir.display()))?;
    Ok(true)
}
