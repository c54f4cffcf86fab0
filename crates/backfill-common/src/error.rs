//! Error types for backfill

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for backfill operations
pub type Result<T> = std::result::Result<T, BackfillError>;

/// Main error type for backfill
///
/// Delivery failures are not errors: the HTTP client reports them as a
/// `DeliveryOutcome` so the importer can decide what to do with them.
#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decompress '{}': {source}", path.display())]
    Decompress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt progress ledger '{}' at line {line}: {reason}", path.display())]
    Ledger {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Path cannot be recorded in the progress ledger: {0:?}")]
    UnrecordablePath(PathBuf),

    #[error("Missing credential: set {0} before running an import")]
    MissingCredential(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackfillError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a ledger corruption error
    pub fn ledger(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::Ledger {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error raised while reading an archive
    pub fn decompress(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Decompress {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_names_line() {
        let err = BackfillError::ledger("progress.txt", 3, "missing tab separator");
        assert_eq!(
            err.to_string(),
            "Corrupt progress ledger 'progress.txt' at line 3: missing tab separator"
        );
    }

    #[test]
    fn test_missing_credential_message() {
        let err = BackfillError::MissingCredential("API_KEY");
        assert!(err.to_string().contains("API_KEY"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BackfillError = io.into();
        assert!(matches!(err, BackfillError::Io(_)));
    }
}
