//! Generic direct-URL source adapter.
//!
//! The fallback for identifiers no specialized source claims: any
//! HTTP(S) URL with real host structure. Metadata comes from a HEAD
//! probe; the download fetches the single referenced file.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;
use url::Url;

use super::client::{RepoClient, sanitize_filename};
use super::directory::{ConflictPrompter, StdinPrompter};
use super::engine::{PlanExecution, PlannedFile, execute_plan};
use super::error::DownloadError;
use super::{DownloadRequest, DownloadResult, Downloader, Metadata, SourceValidation};

/// File extensions that look like data rather than a landing page.
const DATASET_EXTENSIONS: [&str; 14] = [
    ".csv", ".tsv", ".xlsx", ".xls", ".json", ".xml", ".zip", ".tar", ".gz", ".h5", ".hdf5",
    ".parquet", ".rds", ".fastq",
];

/// Generic source adapter (direct URLs).
pub struct GenericDownloader {
    client: RepoClient,
    prompter: Arc<dyn ConflictPrompter>,
}

impl GenericDownloader {
    /// Creates the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] when HTTP client construction fails.
    pub fn new() -> Result<Self, DownloadError> {
        Ok(Self {
            client: RepoClient::new("generic", 4.0)?,
            prompter: Arc::new(StdinPrompter),
        })
    }

    /// Replaces the conflict prompter.
    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn ConflictPrompter>) -> Self {
        self.prompter = prompter;
        self
    }

    fn parse_url(id: &str) -> Option<Url> {
        let url = Url::parse(id.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        url.host_str()?.contains('.').then_some(url)
    }

    /// Derives the output filename from the URL path.
    fn filename_for(url: &Url) -> String {
        let last = url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|s| !s.is_empty());
        match last {
            Some(name) => sanitize_filename(&name),
            None => format!(
                "{}.bin",
                sanitize_filename(url.host_str().unwrap_or("download"))
            ),
        }
    }
}

#[async_trait]
impl Downloader for GenericDownloader {
    fn source_type(&self) -> &'static str {
        "generic"
    }

    fn validate(&self, id: &str) -> SourceValidation {
        let Some(url) = Self::parse_url(id) else {
            return SourceValidation::invalid(id, "not an http(s) URL with a resolvable host");
        };
        let mut validation = SourceValidation::valid(url.as_str().trim_end_matches('/'));
        let path = url.path().to_ascii_lowercase();
        if !DATASET_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            validation = validation
                .with_warning("URL does not end in a known data extension".to_string());
        }
        validation
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, id: &str) -> Result<Metadata, DownloadError> {
        let url = Self::parse_url(id)
            .ok_or_else(|| DownloadError::invalid_id("generic", id, "not a fetchable URL"))?;

        let mut metadata = Metadata {
            source: "generic".to_string(),
            id: url.to_string(),
            title: Some(Self::filename_for(&url)),
            ..Metadata::default()
        };
        metadata.custom.insert(
            "reachable".to_string(),
            serde_json::Value::Bool(self.client.head_ok(url.as_str()).await),
        );
        Ok(metadata)
    }

    #[instrument(skip(self, request), fields(id = %request.id))]
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult, DownloadError> {
        let url = Self::parse_url(&request.id).ok_or_else(|| {
            DownloadError::invalid_id("generic", &request.id, "not a fetchable URL")
        })?;
        let filename = Self::filename_for(&url);

        let metadata = match &request.metadata {
            Some(metadata) => metadata.clone(),
            None => Metadata {
                source: "generic".to_string(),
                id: url.to_string(),
                title: Some(filename.clone()),
                ..Metadata::default()
            },
        };

        execute_plan(
            PlanExecution {
                source: "generic",
                id: request.id.clone(),
                resolved_url: Some(url.to_string()),
                metadata,
                collections: Vec::new(),
                planned: vec![PlannedFile::required(url.to_string(), filename)],
                warnings: Vec::new(),
                client: &self.client,
                prompter: self.prompter.as_ref(),
            },
            request,
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_data_url_clean() {
        let adapter = GenericDownloader::new().unwrap();
        let validation = adapter.validate("https://example.com/data/matrix.csv");
        assert!(validation.valid);
        assert!(validation.warnings.is_empty());
    }

    #[test]
    fn test_validate_landing_page_warns() {
        let adapter = GenericDownloader::new().unwrap();
        let validation = adapter.validate("https://example.com/about");
        assert!(validation.valid);
        assert_eq!(validation.warnings.len(), 1);
    }

    #[test]
    fn test_validate_rejects_bare_id_and_bad_scheme() {
        let adapter = GenericDownloader::new().unwrap();
        assert!(!adapter.validate("GSE123456").valid);
        assert!(!adapter.validate("file:///etc/passwd").valid);
        assert!(!adapter.validate("https://localhost/x").valid);
    }

    #[test]
    fn test_filename_from_path() {
        let url = Url::parse("https://example.com/a/b/data.csv").unwrap();
        assert_eq!(GenericDownloader::filename_for(&url), "data.csv");
    }

    #[test]
    fn test_filename_fallback_for_bare_host() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(GenericDownloader::filename_for(&url), "example.com.bin");
    }
}
