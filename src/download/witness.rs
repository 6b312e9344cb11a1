//! The witness manifest: on-disk provenance for a downloaded dataset.
//!
//! One `hapiq.json` sits at every dataset root, recording where the files
//! came from, how they were fetched, and their integrity digests. The
//! manifest is written only after every planned file has been fully
//! written and checksummed; an interrupted or cancelled download leaves no
//! witness. Encoding is pretty two-space JSON with the field order fixed
//! by the struct, so encode-decode-encode round-trips byte-identically.
//! Decoding is strict: unknown fields are rejected.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::error::DownloadError;
use super::{Collection, DownloadOptions, DownloadResult, DownloadStats, FileInfo, Metadata};

/// Manifest filename at the dataset root.
pub const WITNESS_FILENAME: &str = "hapiq.json";

/// Post-download verification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Verification {
    /// Verification method (e.g. `size`).
    pub method: String,
    /// Expected value, method-specific.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Observed value, method-specific.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    /// True when the check passed.
    pub verified: bool,
    /// Unix timestamp (seconds) of the check.
    pub verify_time: u64,
    /// Per-file discrepancies found.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// The on-disk provenance manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Witness {
    /// Tool version that produced the download.
    pub hapiq_version: String,
    /// Unix timestamp (seconds) when the download finished.
    pub download_time: u64,
    /// Source type (e.g. `geo`, `figshare`).
    pub source: String,
    /// Identifier as originally requested.
    pub original_id: String,
    /// URL the identifier resolved to, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
    /// Metadata snapshot at download time.
    pub metadata: Metadata,
    /// Provenance of every written file.
    pub files: Vec<FileInfo>,
    /// Collections included in the download.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<Collection>>,
    /// Aggregate transfer statistics.
    pub download_stats: DownloadStats,
    /// Post-download verification outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    /// Options the download ran with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<DownloadOptions>,
}

impl Witness {
    /// Builds a witness from a completed download result.
    #[must_use]
    pub fn from_result(result: &DownloadResult, options: &DownloadOptions) -> Self {
        Self {
            hapiq_version: env!("CARGO_PKG_VERSION").to_string(),
            download_time: unix_now(),
            source: result.source.clone(),
            original_id: result.id.clone(),
            resolved_url: result.resolved_url.clone(),
            metadata: result.metadata.clone().unwrap_or_default(),
            files: result.files.clone(),
            collections: (!result.collections.is_empty()).then(|| result.collections.clone()),
            download_stats: result.stats.clone(),
            verification: None,
            options: Some(options.clone()),
        }
    }

    /// Runs the size verification pass over the written files.
    ///
    /// Each file's on-disk size is compared to its recorded size; the
    /// outcome is attached as the witness's verification record.
    #[must_use]
    pub fn with_size_verification(mut self, root: &Path) -> Self {
        let mut errors = Vec::new();
        let mut expected_total: u64 = 0;
        let mut actual_total: u64 = 0;

        for file in &self.files {
            expected_total += file.size;
            match std::fs::metadata(root.join(&file.path)) {
                Ok(meta) => {
                    actual_total += meta.len();
                    if meta.len() != file.size {
                        errors.push(format!(
                            "{}: expected {} bytes, found {}",
                            file.path,
                            file.size,
                            meta.len()
                        ));
                    }
                }
                Err(e) => errors.push(format!("{}: {e}", file.path)),
            }
        }

        self.verification = Some(Verification {
            method: "size".to_string(),
            expected: Some(expected_total.to_string()),
            actual: Some(actual_total.to_string()),
            verified: errors.is_empty(),
            verify_time: unix_now(),
            errors,
        });
        self
    }

    /// Encodes the witness as pretty two-space JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error (not expected for this schema).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Decodes a witness, rejecting unknown fields.
    ///
    /// # Errors
    ///
    /// Returns the decoder error for malformed or unrecognized content.
    pub fn decode(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Writes the witness into `dir`.
    ///
    /// Callers must only invoke this after at least one file has been
    /// fully written; a download that produced nothing gets no witness.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Io`] on write failure.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn write(&self, dir: &Path) -> Result<(), DownloadError> {
        let path = dir.join(WITNESS_FILENAME);
        let json = self
            .encode()
            .map_err(|e| DownloadError::decode(path.display().to_string(), e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        debug!(files = self.files.len(), "witness written");
        Ok(())
    }

    /// Reads the witness from `dir`, when present.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Io`] when the file exists but cannot be read;
    /// [`DownloadError::Decode`] when its content is not a valid witness.
    pub async fn read(dir: &Path) -> Result<Option<Self>, DownloadError> {
        let path = dir.join(WITNESS_FILENAME);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DownloadError::io(&path, e)),
        };
        Self::decode(&json)
            .map(Some)
            .map_err(|e| DownloadError::decode(path.display().to_string(), e.to_string()))
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
