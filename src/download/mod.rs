//! Dataset retrieval from remote repositories.
//!
//! A [`Downloader`] adapter per source resolves an identifier to a
//! concrete file set using that source's protocol (REST, bulk FTP
//! listings, shared-link resolution) and materializes it on disk with
//! provenance. The [`registry`] dispatches identifiers to adapters and
//! auto-detects the source when none is named.
//!
//! # Architecture
//!
//! - [`Downloader`] - capability trait each source adapter implements
//! - [`registry::DownloaderRegistry`] - name/alias dispatch and auto-detection
//! - [`client`] - shared rate-limited HTTP plumbing with streaming writes
//! - [`geo`], [`figshare`], [`generic`] - per-source adapters
//! - [`directory`] - target-directory conflict handling
//! - [`witness`] - on-disk provenance manifest
//! - [`progress`] - per-file and aggregate transfer accounting

pub mod client;
pub mod directory;
pub mod engine;
mod error;
pub mod figshare;
pub mod generic;
pub mod geo;
pub mod progress;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod witness;

pub use error::DownloadError;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pool::CancelToken;

/// Default number of concurrent file transfers per download.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Outcome of adapter identifier validation.
///
/// Validation is pure format checking; it performs no network or file I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceValidation {
    /// True when the identifier is usable by this adapter.
    pub valid: bool,
    /// The identifier, possibly canonicalized.
    pub id: String,
    /// Reasons the identifier was rejected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Non-fatal observations (unusual ranges, unsupported sub-kinds).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SourceValidation {
    /// Creates a passing validation with a canonicalized identifier.
    #[must_use]
    pub fn valid(id: impl Into<String>) -> Self {
        Self {
            valid: true,
            id: id.into(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Creates a failing validation with one error.
    #[must_use]
    pub fn invalid(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            id: id.into(),
            errors: vec![error.into()],
            warnings: Vec::new(),
        }
    }

    /// Appends a warning, keeping the validation status.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// A request to materialize one dataset.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Source identifier (accession, article id, or URL).
    pub id: String,
    /// Directory the dataset is written into.
    pub output_dir: PathBuf,
    /// Behavior options.
    pub options: DownloadOptions,
    /// Pre-fetched metadata, when the caller already resolved it.
    pub metadata: Option<Metadata>,
    /// Cooperative cancellation signal.
    pub cancel: CancelToken,
}

impl DownloadRequest {
    /// Creates a request with default options and a fresh cancel token.
    #[must_use]
    pub fn new(id: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            output_dir: output_dir.into(),
            options: DownloadOptions::default(),
            metadata: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Behavior options for a download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Include raw-format files where the source distinguishes them.
    pub include_raw: bool,
    /// Skip files the source marks as supplementary.
    pub exclude_supplementary: bool,
    /// Concurrent file transfers (minimum 1).
    pub max_concurrent: usize,
    /// Resume partially written files where the server supports ranges.
    pub resume: bool,
    /// Skip files that already exist with a plausible size.
    pub skip_existing: bool,
    /// Never prompt; apply the non-interactive conflict defaults.
    pub non_interactive: bool,
    /// Filter-kind to parameter mapping. Recognized kinds: `extension`,
    /// `contains`, `excludes`, `mimetype`, `max_size`, `min_size`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_filters: BTreeMap<String, String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            include_raw: false,
            exclude_supplementary: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            resume: false,
            skip_existing: false,
            non_interactive: false,
            custom_filters: BTreeMap::new(),
        }
    }
}

/// Compiled per-file filters from [`DownloadOptions::custom_filters`].
#[derive(Debug, Default, Clone)]
pub struct FileFilters {
    extensions: Vec<String>,
    contains: Option<String>,
    excludes: Option<String>,
    mimetype: Option<String>,
    max_size: Option<u64>,
    min_size: Option<u64>,
}

impl FileFilters {
    /// Parses the custom-filter map; unrecognized kinds and unparseable
    /// parameters are returned as warnings rather than errors.
    #[must_use]
    pub fn parse(custom_filters: &BTreeMap<String, String>) -> (Self, Vec<String>) {
        let mut filters = Self::default();
        let mut warnings = Vec::new();

        for (kind, parameter) in custom_filters {
            match kind.as_str() {
                "extension" => {
                    filters.extensions = parameter
                        .split(',')
                        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                        .filter(|e| !e.is_empty())
                        .collect();
                }
                "contains" => filters.contains = Some(parameter.to_ascii_lowercase()),
                "excludes" => filters.excludes = Some(parameter.to_ascii_lowercase()),
                "mimetype" => filters.mimetype = Some(parameter.to_ascii_lowercase()),
                "max_size" => match parameter.parse() {
                    Ok(size) => filters.max_size = Some(size),
                    Err(_) => warnings.push(format!("unparseable max_size '{parameter}'")),
                },
                "min_size" => match parameter.parse() {
                    Ok(size) => filters.min_size = Some(size),
                    Err(_) => warnings.push(format!("unparseable min_size '{parameter}'")),
                },
                other => warnings.push(format!("unrecognized filter kind '{other}'")),
            }
        }

        (filters, warnings)
    }

    /// Returns true when a file passes every configured filter.
    #[must_use]
    pub fn matches(&self, name: &str, size: Option<u64>, content_type: Option<&str>) -> bool {
        let name_lower = name.to_ascii_lowercase();

        if !self.extensions.is_empty()
            && !self
                .extensions
                .iter()
                .any(|ext| name_lower.ends_with(&format!(".{ext}")))
        {
            return false;
        }
        if let Some(needle) = &self.contains {
            if !name_lower.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.excludes {
            if name_lower.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(expected) = &self.mimetype {
            let Some(actual) = content_type else {
                return false;
            };
            if !actual.to_ascii_lowercase().contains(expected.as_str()) {
                return false;
            }
        }
        if let (Some(max), Some(size)) = (self.max_size, size) {
            if size > max {
                return false;
            }
        }
        if let (Some(min), Some(size)) = (self.min_size, size) {
            if size < min {
                return false;
            }
        }

        true
    }
}

/// Dataset metadata resolved from a source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Source type that resolved the metadata.
    pub source: String,
    /// Canonical identifier at the source.
    pub id: String,
    /// Dataset title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-text description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Author display names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Source-assigned tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Source-assigned keywords.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Associated DOI, when minted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// License name or URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Dataset version label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Creation timestamp, verbatim from the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Last-modified timestamp, verbatim from the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Total dataset size in bytes, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    /// Number of files, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    /// Sub-collections (e.g. sample groups).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<Collection>>,
    /// Source-specific fields that have no schema slot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

/// A sub-collection of a dataset (sample group, article group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Collection kind tag (e.g. `samples`, `articles`).
    pub collection_type: String,
    /// Collection identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Number of files in the collection.
    pub file_count: usize,
    /// Estimated size in bytes.
    pub estimated_size: u64,
    /// True when the user explicitly confirmed downloading it.
    pub confirmed: bool,
    /// Preview of member file names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_files: Vec<String>,
}

/// Provenance record for one downloaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// Path relative to the dataset root.
    pub path: String,
    /// Name the source used for the file.
    pub original_name: String,
    /// Size in bytes as written.
    pub size: u64,
    /// Checksum hex digest.
    pub checksum: String,
    /// Checksum algorithm tag.
    pub checksum_type: String,
    /// Unix timestamp (seconds) when the file finished writing.
    pub download_time: u64,
    /// URL the content was fetched from.
    pub source_url: String,
    /// Content-Type reported by the server, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Aggregate statistics for one download run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadStats {
    /// Wall-clock duration in seconds.
    pub duration: f64,
    /// Total bytes the source reported for planned files.
    pub bytes_total: u64,
    /// Bytes actually written.
    pub bytes_downloaded: u64,
    /// Files planned.
    pub files_total: usize,
    /// Files fully written.
    pub files_downloaded: usize,
    /// Files skipped (already present, filtered at write time).
    pub files_skipped: usize,
    /// Files that failed after retries.
    pub files_failed: usize,
    /// Mean transfer speed in bytes per second.
    pub average_speed_bps: f64,
    /// Concurrency the run used.
    pub max_concurrent: usize,
    /// True when any file transfer was resumed.
    pub resumed_download: bool,
}

/// The outcome of one download request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Source type that handled the request.
    pub source: String,
    /// Identifier as requested.
    pub id: String,
    /// Dataset root directory.
    pub output_dir: PathBuf,
    /// URL the identifier resolved to, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
    /// Metadata snapshot used for the download.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Provenance for every fully written file.
    pub files: Vec<FileInfo>,
    /// Collections touched by the download.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<Collection>,
    /// Aggregate statistics.
    pub stats: DownloadStats,
    /// Per-file failures and other non-fatal observations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Hard errors; present only when the aggregate failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Aggregate success per the propagation policy.
    pub success: bool,
}

impl DownloadResult {
    /// Applies the aggregate success policy: at least one file written, or
    /// zero planned files with no hard errors.
    #[must_use]
    pub fn aggregate_success(files_written: usize, files_planned: usize, errors: &[String]) -> bool {
        files_written > 0 || (files_planned == 0 && errors.is_empty())
    }
}

/// Capability set every source adapter implements.
///
/// Adapters are registered as trait objects; `async_trait` keeps the
/// trait object-safe for dynamic dispatch through the registry.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stable source identifier (e.g. `geo`, `figshare`).
    fn source_type(&self) -> &'static str;

    /// Validates and canonicalizes an identifier. Pure; no I/O.
    fn validate(&self, id: &str) -> SourceValidation;

    /// Resolves dataset metadata. Performs network I/O but never writes
    /// to the target directory.
    async fn get_metadata(&self, id: &str) -> Result<Metadata, DownloadError>;

    /// Materializes the dataset described by `request` onto disk.
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult, DownloadError>;
}
