//! Archive discovery

use backfill_common::Result;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Recursively list regular files under `dir` whose name ends in `.{extension}`
///
/// Paths are joined onto `dir` as given, so they match the ledger entries of
/// earlier runs started with the same directory argument. Entries are visited
/// in file-name order within each directory. Dotfiles and everything below a
/// dot-directory are skipped; `dir` itself may be hidden.
pub fn discover_archives(dir: impl AsRef<Path>, extension: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let suffix = format!(".{}", extension.trim_start_matches('.'));
    let mut archives = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.len() > suffix.len() && name.ends_with(&suffix));
        if matches {
            archives.push(entry.into_path());
        }
    }

    debug!(dir = %dir.display(), count = archives.len(), "Archive scan complete");
    Ok(archives)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().as_encoded_bytes().starts_with(b".")
}
