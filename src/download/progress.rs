//! Per-file and aggregate transfer accounting.
//!
//! Workers report byte deltas as they stream; the display loop reads
//! snapshots. State sits behind an RW lock with short critical sections so
//! readers never hold up the writers.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::trace;

/// Lifecycle state of one tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Registered, transfer not started.
    Pending,
    /// Transfer in flight.
    Downloading,
    /// Fully written.
    Completed,
    /// Gave up after retries.
    Failed,
    /// Intentionally not transferred (existing file, filter).
    Skipped,
}

/// Progress record for one file.
#[derive(Debug, Clone)]
struct FileProgress {
    state: FileState,
    bytes_downloaded: u64,
    bytes_total: Option<u64>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    /// Rolling speed window: bytes and timestamp at the window start.
    window_start: Instant,
    window_bytes: u64,
    speed_bps: f64,
}

/// Snapshot of one file's progress.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    /// Tracker key (relative path).
    pub key: String,
    /// Current state.
    pub state: FileState,
    /// Bytes written so far.
    pub bytes_downloaded: u64,
    /// Expected bytes, when known.
    pub bytes_total: Option<u64>,
    /// Speed over the rolling last-update window, bytes per second.
    pub speed_bps: f64,
}

/// Aggregate snapshot across all tracked files.
#[derive(Debug, Clone)]
pub struct AggregateSnapshot {
    /// Files registered.
    pub files_total: usize,
    /// Files completed.
    pub completed: usize,
    /// Files failed.
    pub failed: usize,
    /// Files skipped.
    pub skipped: usize,
    /// Files currently transferring.
    pub downloading: usize,
    /// Total bytes written.
    pub bytes_downloaded: u64,
    /// Total expected bytes over files with a known size.
    pub bytes_total: u64,
    /// Time since the tracker was created.
    pub elapsed: Duration,
    /// Mean speed over the whole run, bytes per second.
    pub speed_bps: f64,
    /// Estimated time to completion; `None` until a file has completed
    /// and the speed is non-zero.
    pub eta: Option<Duration>,
}

/// Transfer progress accounting for one download run.
#[derive(Debug)]
pub struct ProgressTracker {
    files: RwLock<HashMap<String, FileProgress>>,
    started: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Creates an empty tracker; the aggregate clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Registers a file in `Pending` state.
    pub fn register(&self, key: impl Into<String>, bytes_total: Option<u64>) {
        let now = Instant::now();
        if let Ok(mut files) = self.files.write() {
            files.insert(
                key.into(),
                FileProgress {
                    state: FileState::Pending,
                    bytes_downloaded: 0,
                    bytes_total,
                    started_at: None,
                    finished_at: None,
                    window_start: now,
                    window_bytes: 0,
                    speed_bps: 0.0,
                },
            );
        }
    }

    /// Marks a file as transferring.
    pub fn start(&self, key: &str) {
        self.update(key, |file| {
            file.state = FileState::Downloading;
            file.started_at = Some(Instant::now());
        });
    }

    /// Adds written bytes and refreshes the rolling speed window.
    pub fn add_bytes(&self, key: &str, delta: u64) {
        self.update(key, |file| {
            file.bytes_downloaded += delta;
            let window = file.window_start.elapsed();
            // Refresh the rolling window roughly once a second.
            if window >= Duration::from_secs(1) {
                let bytes_in_window = file.bytes_downloaded - file.window_bytes;
                file.speed_bps = bytes_in_window as f64 / window.as_secs_f64();
                file.window_start = Instant::now();
                file.window_bytes = file.bytes_downloaded;
            }
        });
    }

    /// Marks a file fully written.
    pub fn complete(&self, key: &str) {
        self.finish(key, FileState::Completed);
    }

    /// Marks a file failed.
    pub fn fail(&self, key: &str) {
        self.finish(key, FileState::Failed);
    }

    /// Marks a file skipped.
    pub fn skip(&self, key: &str) {
        self.finish(key, FileState::Skipped);
    }

    fn finish(&self, key: &str, state: FileState) {
        trace!(key, ?state, "file finished");
        self.update(key, |file| {
            file.state = state;
            file.finished_at = Some(Instant::now());
        });
    }

    fn update(&self, key: &str, apply: impl FnOnce(&mut FileProgress)) {
        if let Ok(mut files) = self.files.write() {
            if let Some(file) = files.get_mut(key) {
                apply(file);
            }
        }
    }

    /// Returns a snapshot of one file, when tracked.
    #[must_use]
    pub fn file(&self, key: &str) -> Option<FileSnapshot> {
        let files = self.files.read().ok()?;
        files.get(key).map(|file| FileSnapshot {
            key: key.to_string(),
            state: file.state,
            bytes_downloaded: file.bytes_downloaded,
            bytes_total: file.bytes_total,
            speed_bps: file.speed_bps,
        })
    }

    /// Returns the aggregate snapshot.
    #[must_use]
    pub fn aggregate(&self) -> AggregateSnapshot {
        let elapsed = self.started.elapsed();
        let Ok(files) = self.files.read() else {
            return AggregateSnapshot {
                files_total: 0,
                completed: 0,
                failed: 0,
                skipped: 0,
                downloading: 0,
                bytes_downloaded: 0,
                bytes_total: 0,
                elapsed,
                speed_bps: 0.0,
                eta: None,
            };
        };

        let mut snapshot = AggregateSnapshot {
            files_total: files.len(),
            completed: 0,
            failed: 0,
            skipped: 0,
            downloading: 0,
            bytes_downloaded: 0,
            bytes_total: 0,
            elapsed,
            speed_bps: 0.0,
            eta: None,
        };

        for file in files.values() {
            match file.state {
                FileState::Completed => snapshot.completed += 1,
                FileState::Failed => snapshot.failed += 1,
                FileState::Skipped => snapshot.skipped += 1,
                FileState::Downloading => snapshot.downloading += 1,
                FileState::Pending => {}
            }
            snapshot.bytes_downloaded += file.bytes_downloaded;
            snapshot.bytes_total += file.bytes_total.unwrap_or(0);
        }

        if elapsed.as_secs_f64() > 0.0 {
            snapshot.speed_bps = snapshot.bytes_downloaded as f64 / elapsed.as_secs_f64();
        }

        // ETA only once a completion proves the pipeline is moving.
        if snapshot.completed > 0
            && snapshot.speed_bps > 0.0
            && snapshot.bytes_total > snapshot.bytes_downloaded
        {
            let remaining = snapshot.bytes_total - snapshot.bytes_downloaded;
            snapshot.eta = Some(Duration::from_secs_f64(
                remaining as f64 / snapshot.speed_bps,
            ));
        }

        snapshot
    }
}
