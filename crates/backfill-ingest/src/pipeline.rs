//! Import orchestration
//!
//! Archives are processed strictly one after another. For each archive the
//! importer reads every event, sends the batches in order under the rate
//! limit, and appends the archive to the progress ledger only once every
//! batch was accepted. The first failure halts the run: later archives are
//! left untouched so a rerun picks up exactly where this one stopped.

use crate::batch::{batch_count, batches};
use crate::client::{BatchSink, DeliveryFailure, DeliveryOutcome};
use crate::config::ImportConfig;
use crate::discover::discover_archives;
use crate::progress::{ledger_path, ProgressSnapshot, ProgressStore};
use crate::rate_limit::RateLimiter;
use crate::reader::read_archive;
use backfill_common::Result;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

/// Archives still to deliver, in discovery order
pub fn plan_work(discovered: Vec<PathBuf>, done: &ProgressSnapshot) -> Vec<PathBuf> {
    discovered
        .into_iter()
        .filter(|path| !done.is_done(path))
        .collect()
}

/// Why an archive could not be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The archive could not be opened or decompressed
    Unreadable(String),

    /// The path has no ledger form, so delivery could never be checkpointed
    Unrecordable(String),

    /// The endpoint refused batch number `batch` (1-based)
    Rejected {
        batch: usize,
        failure: DeliveryFailure,
    },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Unreadable(msg) => write!(f, "unreadable archive: {}", msg),
            FailureReason::Unrecordable(msg) => write!(f, "{}", msg),
            FailureReason::Rejected { batch, failure } => {
                write!(f, "batch {} rejected: {}", batch, failure)
            },
        }
    }
}

/// Terminal state of one archive
#[derive(Debug)]
enum FileOutcome {
    Done { events: usize, size: u64 },
    Failed { events: usize, reason: FailureReason },
}

/// The archive that stopped a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub path: PathBuf,
    pub reason: FailureReason,
}

/// Totals reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Archives found by the directory scan
    pub discovered: usize,

    /// Archives skipped because the ledger already lists them
    pub skipped: usize,

    pub completed_files: usize,

    /// Events in archives that were fully delivered
    pub submitted: usize,

    /// Events in the archive that halted the run
    pub failed: usize,

    /// Lines dropped because they were not valid JSON
    pub malformed: usize,

    /// Batches the endpoint accepted, including those of a failed archive
    pub batches_delivered: usize,

    pub halted: Option<Halt>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.halted.is_none()
    }
}

/// Drives archives through read, batch, throttle and delivery
pub struct Importer<S> {
    config: ImportConfig,
    sink: S,
    limiter: RateLimiter,
}

impl<S: BatchSink> Importer<S> {
    pub fn new(config: ImportConfig, sink: S) -> Self {
        let limiter = RateLimiter::new(config.rate_interval);
        Self {
            config,
            sink,
            limiter,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Import every archive under `dir` not yet in the progress ledger
    ///
    /// Returns `Err` only when the run cannot trust its own bookkeeping (scan
    /// or ledger I/O failed). A rejected batch or unreadable archive is a
    /// normal halt reported through [`RunSummary::halted`].
    pub async fn run(&mut self, dir: impl AsRef<Path>) -> Result<RunSummary> {
        let dir = dir.as_ref();
        let archives = discover_archives(dir, &self.config.extension)?;

        let mut progress = ProgressStore::open(&self.config.progress_path)?;
        let snapshot = progress.load()?;
        let work = plan_work(archives.clone(), &snapshot);

        let mut summary = RunSummary {
            discovered: archives.len(),
            skipped: archives.len() - work.len(),
            ..RunSummary::default()
        };

        info!(
            dir = %dir.display(),
            discovered = summary.discovered,
            skipped = summary.skipped,
            pending = work.len(),
            "Processing archives"
        );

        for path in work {
            match self.process_file(&path, &mut summary).await {
                FileOutcome::Done { events, size } => {
                    if let Err(e) = progress.mark_done(&path, size) {
                        error!(path = %path.display(), error = %e, "Failed to record archive");
                        log_totals(&summary);
                        return Err(e);
                    }
                    summary.submitted += events;
                    summary.completed_files += 1;
                    info!(path = %path.display(), events, size, "Archive delivered");
                },
                FileOutcome::Failed { events, reason } => {
                    summary.failed += events;
                    error!(
                        path = %path.display(),
                        events,
                        reason = %reason,
                        "Archive failed, halting run"
                    );
                    summary.halted = Some(Halt { path, reason });
                    break;
                },
            }
        }

        log_totals(&summary);
        Ok(summary)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn process_file(&mut self, path: &Path, summary: &mut RunSummary) -> FileOutcome {
        if let Err(e) = ledger_path(path) {
            return FileOutcome::Failed {
                events: 0,
                reason: FailureReason::Unrecordable(e.to_string()),
            };
        }

        let archive_size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                return FileOutcome::Failed {
                    events: 0,
                    reason: FailureReason::Unreadable(e.to_string()),
                }
            },
        };

        let contents = match read_archive(path) {
            Ok(contents) => contents,
            Err(e) => {
                return FileOutcome::Failed {
                    events: 0,
                    reason: FailureReason::Unreadable(e.to_string()),
                }
            },
        };

        summary.malformed += contents.malformed;
        let total = contents.events.len();
        let size = self.config.batch_size;

        info!(
            events = total,
            malformed = contents.malformed,
            batches = batch_count(total, size),
            "Processing archive"
        );

        for (idx, batch) in batches(&contents.events, size).enumerate() {
            self.limiter.wait().await;
            let outcome = self.sink.deliver(batch).await;
            self.limiter.record();

            match outcome {
                DeliveryOutcome::Success => {
                    summary.batches_delivered += 1;
                    info!(
                        batch = idx + 1,
                        size = batch.len(),
                        total,
                        "Submitted batch successfully"
                    );
                },
                DeliveryOutcome::Failure(failure) => {
                    error!(
                        batch = idx + 1,
                        size = batch.len(),
                        status = ?failure.status,
                        message = %failure.message,
                        body = %failure.body,
                        "Failed to upload events"
                    );
                    return FileOutcome::Failed {
                        events: total,
                        reason: FailureReason::Rejected {
                            batch: idx + 1,
                            failure,
                        },
                    };
                },
            }
        }

        FileOutcome::Done {
            events: total,
            size: archive_size,
        }
    }
}

fn log_totals(summary: &RunSummary) {
    info!(submitted = summary.submitted, "Submitted events");
    info!(failed = summary.failed, "Failed to submit events");
    if summary.failed > 0 || summary.malformed > 0 {
        warn!(
            malformed = summary.malformed,
            "Some events were not delivered; check the log for details"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::Event;
    use async_trait::async_trait;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::num::NonZeroUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records batch sizes; rejects the call numbers listed in `reject`
    #[derive(Default)]
    struct RecordingSink {
        sizes: Mutex<Vec<usize>>,
        reject: Vec<usize>,
    }

    impl RecordingSink {
        fn rejecting(calls: &[usize]) -> Self {
            Self {
                sizes: Mutex::new(Vec::new()),
                reject: calls.to_vec(),
            }
        }

        fn sizes(&self) -> Vec<usize> {
            self.sizes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn deliver(&self, events: &[Event]) -> DeliveryOutcome {
            let mut sizes = self.sizes.lock().unwrap();
            sizes.push(events.len());
            if self.reject.contains(&sizes.len()) {
                DeliveryOutcome::Failure(DeliveryFailure {
                    status: Some(500),
                    message: "Internal Server Error".to_string(),
                    body: "boom".to_string(),
                })
            } else {
                DeliveryOutcome::Success
            }
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let fixture = Self {
                dir: tempfile::tempdir().unwrap(),
            };
            std::fs::create_dir_all(fixture.archives()).unwrap();
            fixture
        }

        fn archives(&self) -> PathBuf {
            self.dir.path().join("archives")
        }

        fn ledger(&self) -> PathBuf {
            self.dir.path().join("progress.txt")
        }

        fn config(&self) -> ImportConfig {
            ImportConfig::new("test-key")
                .unwrap()
                .with_progress_path(self.ledger())
                .with_rate_interval(Duration::ZERO)
        }

        fn write_archive(&self, name: &str, events: usize, malformed: usize) -> PathBuf {
            let mut body = String::new();
            for n in 0..events {
                body.push_str(&format!("{{\"event_type\":\"{}\",\"n\":{}}}\n", name, n));
                if n < malformed {
                    body.push_str("{truncated\n");
                }
            }
            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(body.as_bytes()).unwrap();

            let path = self.archives().join(name);
            std::fs::write(&path, encoder.finish().unwrap()).unwrap();
            path
        }

        fn ledger_snapshot(&self) -> ProgressSnapshot {
            ProgressStore::open(self.ledger()).unwrap().load().unwrap()
        }
    }

    #[test]
    fn test_plan_work_filters_done_and_keeps_order() {
        let done = ProgressSnapshot::from_records(vec![crate::progress::ProgressRecord {
            size: 1,
            path: PathBuf::from("d/b.gz"),
        }]);
        let discovered = vec![
            PathBuf::from("d/c.gz"),
            PathBuf::from("d/b.gz"),
            PathBuf::from("d/a.gz"),
        ];

        assert_eq!(
            plan_work(discovered, &done),
            vec![PathBuf::from("d/c.gz"), PathBuf::from("d/a.gz")]
        );
    }

    #[tokio::test]
    async fn test_all_archives_delivered() {
        let fx = Fixture::new();
        let a = fx.write_archive("a.gz", 2500, 0);
        let b = fx.write_archive("b.gz", 500, 0);

        let mut importer = Importer::new(fx.config(), RecordingSink::default());
        let summary = importer.run(fx.archives()).await.unwrap();

        assert_eq!(importer.sink().sizes(), vec![1000, 1000, 500, 500]);
        assert!(summary.is_success());
        assert_eq!(summary.submitted, 3000);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.completed_files, 2);
        assert_eq!(summary.batches_delivered, 4);

        let snapshot = fx.ledger_snapshot();
        assert_eq!(snapshot.records(), 2);
        assert!(snapshot.is_done(&a) && snapshot.is_done(&b));
    }

    #[tokio::test]
    async fn test_failed_batch_halts_run_without_checkpoint() {
        let fx = Fixture::new();
        let a = fx.write_archive("a.gz", 2500, 0);
        fx.write_archive("b.gz", 500, 0);

        let mut importer = Importer::new(fx.config(), RecordingSink::rejecting(&[2]));
        let summary = importer.run(fx.archives()).await.unwrap();

        // third batch of a and all of b are never attempted
        assert_eq!(importer.sink().sizes(), vec![1000, 1000]);
        assert_eq!(summary.submitted, 0);
        assert_eq!(summary.failed, 2500);
        assert_eq!(summary.batches_delivered, 1);
        assert!(fx.ledger_snapshot().is_empty());

        let halt = summary.halted.unwrap();
        assert_eq!(halt.path, a);
        assert!(matches!(halt.reason, FailureReason::Rejected { batch: 2, .. }));
    }

    #[tokio::test]
    async fn test_second_run_sends_nothing() {
        let fx = Fixture::new();
        fx.write_archive("a.gz", 1200, 0);
        fx.write_archive("b.gz", 10, 0);

        let mut first = Importer::new(fx.config(), RecordingSink::default());
        assert!(first.run(fx.archives()).await.unwrap().is_success());

        let mut second = Importer::new(fx.config(), RecordingSink::default());
        let summary = second.run(fx.archives()).await.unwrap();

        assert!(second.sink().sizes().is_empty());
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.submitted, 0);
        assert_eq!(fx.ledger_snapshot().records(), 2);
    }

    #[tokio::test]
    async fn test_rerun_resumes_at_failed_archive() {
        let fx = Fixture::new();
        let a = fx.write_archive("a.gz", 300, 0);
        let b = fx.write_archive("b.gz", 1500, 0);
        let c = fx.write_archive("c.gz", 20, 0);

        // a: call 1, b: calls 2 and 3
        let mut first = Importer::new(fx.config(), RecordingSink::rejecting(&[3]));
        let summary = first.run(fx.archives()).await.unwrap();
        assert_eq!(summary.submitted, 300);
        assert_eq!(summary.failed, 1500);
        assert_eq!(summary.halted.unwrap().path, b);

        let mut second = Importer::new(fx.config(), RecordingSink::default());
        let summary = second.run(fx.archives()).await.unwrap();

        // b is sent again in full, a is not
        assert_eq!(second.sink().sizes(), vec![1000, 500, 20]);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.submitted, 1520);

        let snapshot = fx.ledger_snapshot();
        assert!(snapshot.is_done(&a) && snapshot.is_done(&b) && snapshot.is_done(&c));
        assert_eq!(snapshot.records(), 3);
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_abort() {
        let fx = Fixture::new();
        fx.write_archive("a.gz", 40, 7);

        let mut importer = Importer::new(fx.config(), RecordingSink::default());
        let summary = importer.run(fx.archives()).await.unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.submitted, 40);
        assert_eq!(summary.malformed, 7);
        assert_eq!(importer.sink().sizes(), vec![40]);
    }

    #[tokio::test]
    async fn test_unreadable_archive_halts_before_later_files() {
        let fx = Fixture::new();
        let a = fx.archives().join("a.gz");
        std::fs::write(&a, b"not gzip").unwrap();
        fx.write_archive("b.gz", 5, 0);

        let mut importer = Importer::new(fx.config(), RecordingSink::default());
        let summary = importer.run(fx.archives()).await.unwrap();

        assert!(importer.sink().sizes().is_empty());
        assert_eq!(summary.failed, 0);
        let halt = summary.halted.unwrap();
        assert_eq!(halt.path, a);
        assert!(matches!(halt.reason, FailureReason::Unreadable(_)));
        assert!(fx.ledger_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_empty_archive_is_marked_done() {
        let fx = Fixture::new();
        let empty = fx.write_archive("empty.gz", 0, 0);

        let mut importer = Importer::new(fx.config(), RecordingSink::default());
        let summary = importer.run(fx.archives()).await.unwrap();

        assert!(importer.sink().sizes().is_empty());
        assert_eq!(summary.completed_files, 1);
        assert!(fx.ledger_snapshot().is_done(&empty));
    }

    #[tokio::test]
    async fn test_ledger_records_archive_size() {
        let fx = Fixture::new();
        let a = fx.write_archive("a.gz", 3, 0);
        let expected = format!("{}\t{}\n", std::fs::metadata(&a).unwrap().len(), a.display());

        let mut importer = Importer::new(fx.config(), RecordingSink::default());
        importer.run(fx.archives()).await.unwrap();

        assert_eq!(std::fs::read_to_string(fx.ledger()).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_custom_batch_size() {
        let fx = Fixture::new();
        fx.write_archive("a.gz", 7, 0);

        let config = fx.config().with_batch_size(NonZeroUsize::new(3).unwrap());
        let mut importer = Importer::new(config, RecordingSink::default());
        importer.run(fx.archives()).await.unwrap();

        assert_eq!(importer.sink().sizes(), vec![3, 3, 1]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unrecordable_archive_is_never_sent() {
        let fx = Fixture::new();
        let good = fx.write_archive("bad.gz", 5, 0);
        let bad = fx.archives().join("bad\nname.gz");
        std::fs::rename(&good, &bad).unwrap();
        fx.write_archive("later.gz", 3, 0);

        for _ in 0..2 {
            let mut importer = Importer::new(fx.config(), RecordingSink::default());
            let summary = importer.run(fx.archives()).await.unwrap();

            assert!(importer.sink().sizes().is_empty());
            assert_eq!(summary.submitted, 0);
            let halt = summary.halted.unwrap();
            assert_eq!(halt.path, bad);
            assert!(matches!(halt.reason, FailureReason::Unrecordable(_)));
        }
        assert!(fx.ledger_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_stops_before_any_delivery() {
        let fx = Fixture::new();
        fx.write_archive("a.gz", 3, 0);
        std::fs::write(fx.ledger(), "garbage line\n").unwrap();

        let mut importer = Importer::new(fx.config(), RecordingSink::default());
        assert!(importer.run(fx.archives()).await.is_err());
        assert!(importer.sink().sizes().is_empty());
    }
}
