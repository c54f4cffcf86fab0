//! Progress ledger
//!
//! An append-only text file with one `size<TAB>path` line per archive whose
//! every batch was accepted. The ledger is never rewritten: resuming a run
//! means reading it back and skipping the paths it names.

use backfill_common::{BackfillError, Result};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One completed archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    /// Archive size in bytes when it was marked done
    pub size: u64,
    pub path: PathBuf,
}

impl ProgressRecord {
    fn to_line(&self) -> Result<String> {
        Ok(format!("{}\t{}\n", self.size, ledger_path(&self.path)?))
    }
}

/// The ledger form of `path`
///
/// A ledger line holds UTF-8 text with no line breaks, so any other path can
/// never be marked done.
pub fn ledger_path(path: &Path) -> Result<&str> {
    path.to_str()
        .filter(|p| !p.contains(['\n', '\r']))
        .ok_or_else(|| BackfillError::UnrecordablePath(path.to_path_buf()))
}

/// Paths already delivered, as read at the start of a run
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    done: HashSet<PathBuf>,
    records: usize,
}

impl ProgressSnapshot {
    pub fn from_records(records: impl IntoIterator<Item = ProgressRecord>) -> Self {
        let mut snapshot = Self::default();
        for record in records {
            snapshot.records += 1;
            snapshot.done.insert(record.path);
        }
        snapshot
    }

    pub fn is_done(&self, path: &Path) -> bool {
        self.done.contains(path)
    }

    /// Distinct completed paths
    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Ledger lines read, duplicates included
    pub fn records(&self) -> usize {
        self.records
    }
}

/// Parse ledger text
///
/// Blank lines are ignored and the path is everything after the first TAB.
/// Every record ends in `\n`; an unterminated final line is an append cut
/// off mid-write and is skipped, since its path may be a prefix of another.
/// Any other malformed line is an error so a damaged ledger never silently
/// re-enables delivered archives.
pub fn parse_ledger(contents: &str, origin: &Path) -> Result<Vec<ProgressRecord>> {
    let complete = contents.rfind('\n').map_or("", |end| &contents[..=end]);
    if !contents[complete.len()..].trim().is_empty() {
        warn!(path = %origin.display(), "Ignoring torn final ledger line");
    }

    let mut records = Vec::new();

    for (idx, raw) in complete.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match line.split_once('\t') {
            Some((size, path)) => {
                let size = size
                    .trim()
                    .parse()
                    .map_err(|_| BackfillError::ledger(origin, line_no, "size is not a number"))?;
                if path.is_empty() {
                    return Err(BackfillError::ledger(origin, line_no, "empty path"));
                }
                records.push(ProgressRecord {
                    size,
                    path: PathBuf::from(path),
                });
            },
            None => {
                return Err(BackfillError::ledger(origin, line_no, "missing tab separator"));
            },
        }
    }

    Ok(records)
}

/// Single-writer handle on the ledger file
pub struct ProgressStore {
    path: PathBuf,
    file: File,
}

impl ProgressStore {
    /// Open the ledger for appending, creating it (and its directory) if needed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        // Drop the tail of an append that was cut short
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        let complete = contents.iter().rposition(|&b| b == b'\n').map_or(0, |end| end + 1);
        if complete < contents.len() {
            warn!(
                path = %path.display(),
                bytes = contents.len() - complete,
                "Discarding torn ledger tail"
            );
            file.set_len(complete as u64)?;
            file.sync_data()?;
        }

        debug!(path = %path.display(), "Progress ledger opened");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every completed path recorded so far
    pub fn load(&self) -> Result<ProgressSnapshot> {
        let contents = std::fs::read_to_string(&self.path)?;
        let records = parse_ledger(&contents, &self.path)?;
        Ok(ProgressSnapshot::from_records(records))
    }

    /// Append a record and force it to disk before returning
    pub fn mark_done(&mut self, path: &Path, size: u64) -> Result<ProgressRecord> {
        let record = ProgressRecord {
            size,
            path: path.to_path_buf(),
        };

        self.file.write_all(record.to_line()?.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;

        Ok(record)
    }
}
