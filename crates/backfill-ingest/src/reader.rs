//! Archive reader
//!
//! Decompresses one gzip archive and parses every line as a JSON event. A
//! line that is not valid JSON is skipped and counted; a stream that cannot
//! be decompressed fails the whole archive.

use crate::Event;
use backfill_common::{BackfillError, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Events decoded from one archive, in file order
#[derive(Debug, Default)]
pub struct ArchiveContents {
    pub events: Vec<Event>,

    /// Non-blank lines that failed to parse
    pub malformed: usize,
}

/// Read and parse a gzip-compressed JSON-lines archive
pub fn read_archive(path: impl AsRef<Path>) -> Result<ArchiveContents> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| BackfillError::decompress(path, e))?;

    let contents = parse_lines(MultiGzDecoder::new(file), path)?;
    debug!(
        path = %path.display(),
        events = contents.events.len(),
        malformed = contents.malformed,
        "Archive decoded"
    );

    Ok(contents)
}

/// Parse newline-delimited JSON from an already-decompressed stream
///
/// `origin` is only used for error and log context.
pub fn parse_lines<R: Read>(reader: R, origin: &Path) -> Result<ArchiveContents> {
    let mut reader = BufReader::new(reader);
    let mut contents = ArchiveContents::default();
    let mut line = Vec::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| BackfillError::decompress(origin, e))?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let record = trim_line_ending(&line);
        if record.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<Event>(record) {
            Ok(event) => contents.events.push(event),
            Err(e) => {
                contents.malformed += 1;
                warn!(
                    path = %origin.display(),
                    line = line_no,
                    error = %e,
                    "Skipping malformed event"
                );
            },
        }
    }

    Ok(contents)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
