//! Shared download execution for source adapters.
//!
//! Adapters plan a file set; the engine materializes it: directory
//! preparation, bounded-concurrency transfers with per-file progress,
//! per-file failure tolerance, aggregate statistics, and the final
//! witness write. Keeping this here means every adapter inherits the same
//! conflict handling and provenance behavior.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::client::{CHECKSUM_ALGORITHM, RepoClient};
use super::directory::{self, Action, ConflictPrompter};
use super::error::DownloadError;
use super::progress::ProgressTracker;
use super::witness::Witness;
use super::{
    Collection, DownloadRequest, DownloadResult, DownloadStats, FileInfo, Metadata,
};
use crate::pool::WorkerPool;

/// One file an adapter wants written.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    /// Fetch URL.
    pub url: String,
    /// Path relative to the dataset root.
    pub relative_path: String,
    /// Name the source uses for the file.
    pub original_name: String,
    /// Expected size, when the source reported one.
    pub expected_size: Option<u64>,
    /// Optional files tolerate absence: a 404 skips instead of failing.
    pub optional: bool,
}

impl PlannedFile {
    /// Creates a required planned file stored under its original name.
    #[must_use]
    pub fn required(url: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            url: url.into(),
            relative_path: name.clone(),
            original_name: name,
            expected_size: None,
            optional: false,
        }
    }

    /// Creates an optional planned file (absence tolerated).
    #[must_use]
    pub fn optional(url: impl Into<String>, name: impl Into<String>) -> Self {
        let mut planned = Self::required(url, name);
        planned.optional = true;
        planned
    }

    /// Places the file under a subdirectory of the dataset root.
    #[must_use]
    pub fn under(mut self, subdir: &str) -> Self {
        self.relative_path = format!("{subdir}/{}", self.relative_path);
        self
    }
}

/// Everything the engine needs to run one adapter's plan.
pub struct PlanExecution<'a> {
    /// Source type for the result and witness.
    pub source: &'static str,
    /// Identifier as requested.
    pub id: String,
    /// URL the identifier resolved to, when applicable.
    pub resolved_url: Option<String>,
    /// Metadata snapshot.
    pub metadata: Metadata,
    /// Collections covered by the plan.
    pub collections: Vec<Collection>,
    /// Files to write.
    pub planned: Vec<PlannedFile>,
    /// Warnings accumulated while planning.
    pub warnings: Vec<String>,
    /// Client used for the transfers.
    pub client: &'a RepoClient,
    /// Conflict decision source for interactive runs.
    pub prompter: &'a dyn ConflictPrompter,
}

/// Runs a plan to completion and writes the witness.
///
/// Per-file failures become warnings; the aggregate succeeds when at
/// least one file was written, or when the plan was empty and nothing
/// hard-failed. A cancelled run returns [`DownloadError::Cancelled`] and
/// leaves no witness.
///
/// # Errors
///
/// Directory preparation failures, explicit aborts, insufficient space,
/// and cancellation.
#[instrument(skip_all, fields(source = execution.source, id = %execution.id, files = execution.planned.len()))]
pub async fn execute_plan(
    execution: PlanExecution<'_>,
    request: &DownloadRequest,
) -> Result<DownloadResult, DownloadError> {
    let started = Instant::now();
    let options = &request.options;
    let PlanExecution {
        source,
        id,
        resolved_url,
        metadata,
        collections,
        planned,
        mut warnings,
        client,
        prompter,
    } = execution;

    // Directory protocol runs before any write.
    let preparation = directory::prepare(&request.output_dir, options.non_interactive, prompter)?;
    match preparation.action {
        Action::Abort => return Err(DownloadError::Cancelled),
        Action::Skip => {
            info!(dir = %request.output_dir.display(), "skipping per directory resolution");
            warnings.push("target directory skipped".to_string());
            return Ok(empty_result(
                source,
                id,
                resolved_url,
                metadata,
                request,
                warnings,
                started,
                options.max_concurrent,
            ));
        }
        Action::Proceed | Action::Merge | Action::Overwrite => {
            directory::apply_action(&request.output_dir, preparation.action).await?;
        }
    }

    let bytes_total: u64 = planned.iter().filter_map(|f| f.expected_size).sum();
    if bytes_total > 0 {
        directory::check_space(&request.output_dir, bytes_total)?;
    }

    let tracker = Arc::new(ProgressTracker::new());
    for file in &planned {
        tracker.register(&file.relative_path, file.expected_size);
    }

    let client = client.clone();
    let output_dir = request.output_dir.clone();
    let resume = options.resume;
    let skip_existing = options.skip_existing;
    let worker_tracker = Arc::clone(&tracker);
    let files_planned = planned.len();

    let transfer_cancel = request.cancel.clone();
    let mut pool = WorkerPool::start_with_cancel(
        options.max_concurrent.max(1),
        move |file: PlannedFile| {
            let client = client.clone();
            let tracker = Arc::clone(&worker_tracker);
            let output_dir = output_dir.clone();
            let cancel = transfer_cancel.clone();
            async move {
                transfer_one(
                    &client,
                    &tracker,
                    &output_dir,
                    file,
                    resume,
                    skip_existing,
                    &cancel,
                )
                .await
            }
        },
        request.cancel.clone(),
    );

    for file in planned {
        if pool.submit(file).await.is_err() {
            break;
        }
    }
    pool.close();

    let mut files: Vec<FileInfo> = Vec::new();
    let mut files_skipped = 0usize;
    let mut files_failed = 0usize;
    let mut resumed_any = false;

    for outcome in pool.collect().await {
        match outcome.result {
            Ok(TransferOutcome::Written(info, resumed)) => {
                resumed_any |= resumed;
                files.push(info);
            }
            Ok(TransferOutcome::Skipped(path)) => {
                debug!(path, "file skipped");
                files_skipped += 1;
            }
            Err(message) => {
                files_failed += 1;
                warnings.push(message);
            }
        }
    }

    if request.cancel.is_cancelled() {
        // A cancelled download must not leave a witness.
        return Err(DownloadError::Cancelled);
    }

    // Stable file order regardless of completion interleaving.
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let duration = started.elapsed();
    let bytes_downloaded: u64 = files.iter().map(|f| f.size).sum();
    let stats = DownloadStats {
        duration: duration.as_secs_f64(),
        bytes_total,
        bytes_downloaded,
        files_total: files_planned,
        files_downloaded: files.len(),
        files_skipped,
        files_failed,
        average_speed_bps: if duration.as_secs_f64() > 0.0 {
            bytes_downloaded as f64 / duration.as_secs_f64()
        } else {
            0.0
        },
        max_concurrent: options.max_concurrent.max(1),
        resumed_download: resumed_any,
    };

    let success = DownloadResult::aggregate_success(files.len(), files_planned, &[]);
    let result = DownloadResult {
        source: source.to_string(),
        id,
        output_dir: request.output_dir.clone(),
        resolved_url,
        metadata: Some(metadata),
        files,
        collections,
        stats,
        warnings,
        errors: Vec::new(),
        success,
    };

    // Witness only after at least one fully written file.
    if !result.files.is_empty() {
        let witness = Witness::from_result(&result, options)
            .with_size_verification(&request.output_dir);
        witness.write(&request.output_dir).await?;
    }

    info!(
        downloaded = result.stats.files_downloaded,
        skipped = result.stats.files_skipped,
        failed = result.stats.files_failed,
        "download finished"
    );
    Ok(result)
}

/// Result of one file transfer attempt.
enum TransferOutcome {
    /// Written with provenance; the flag records a resumed transfer.
    Written(FileInfo, bool),
    /// Not transferred (already present, or optional and absent).
    Skipped(String),
}

async fn transfer_one(
    client: &RepoClient,
    tracker: &ProgressTracker,
    output_dir: &Path,
    file: PlannedFile,
    resume: bool,
    skip_existing: bool,
    cancel: &crate::pool::CancelToken,
) -> Result<TransferOutcome, String> {
    let dest = output_dir.join(&file.relative_path);

    if skip_existing && dest.is_file() {
        tracker.skip(&file.relative_path);
        return Ok(TransferOutcome::Skipped(file.relative_path));
    }

    tracker.start(&file.relative_path);

    let key = file.relative_path.clone();
    let result = client
        .download_to_file(&file.url, &dest, resume, cancel, |delta| {
            tracker.add_bytes(&key, delta);
        })
        .await;

    match result {
        Ok(written) => {
            tracker.complete(&file.relative_path);
            Ok(TransferOutcome::Written(
                FileInfo {
                    path: file.relative_path,
                    original_name: file.original_name,
                    size: written.size,
                    checksum: written.checksum,
                    checksum_type: CHECKSUM_ALGORITHM.to_string(),
                    download_time: unix_now(),
                    source_url: file.url,
                    content_type: written.content_type,
                },
                written.resumed,
            ))
        }
        Err(DownloadError::HttpStatus { status: 404, .. }) if file.optional => {
            tracker.skip(&file.relative_path);
            Ok(TransferOutcome::Skipped(file.relative_path))
        }
        Err(DownloadError::Cancelled) => {
            tracker.fail(&file.relative_path);
            Err("cancelled".to_string())
        }
        Err(error) => {
            tracker.fail(&file.relative_path);
            warn!(url = %file.url, %error, "file transfer failed");
            Err(format!("{}: {error}", file.relative_path))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn empty_result(
    source: &str,
    id: String,
    resolved_url: Option<String>,
    metadata: Metadata,
    request: &DownloadRequest,
    warnings: Vec<String>,
    started: Instant,
    max_concurrent: usize,
) -> DownloadResult {
    DownloadResult {
        source: source.to_string(),
        id,
        output_dir: request.output_dir.clone(),
        resolved_url,
        metadata: Some(metadata),
        files: Vec::new(),
        collections: Vec::new(),
        stats: DownloadStats {
            duration: started.elapsed().as_secs_f64(),
            max_concurrent,
            ..DownloadStats::default()
        },
        warnings,
        errors: Vec::new(),
        success: true,
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
