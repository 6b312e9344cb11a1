//! Figshare source adapter.
//!
//! Figshare exposes a clean JSON API for articles, collections, and
//! projects, but references in papers frequently point at shared links
//! (`figshare.com/s/<hash>`) whose article ID only appears inside the
//! landing page HTML. [`FigshareDownloader::resolve_from_html`] recovers
//! the ID by trying increasingly desperate signals, from API endpoint
//! references down to the largest plausible article number on the page.

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::client::{RepoClient, sanitize_filename};
use super::directory::{ConflictPrompter, StdinPrompter};
use super::engine::{PlanExecution, PlannedFile, execute_plan};
use super::error::DownloadError;
use super::{
    Collection, DownloadRequest, DownloadResult, Downloader, FileFilters, Metadata,
    SourceValidation,
};
use crate::extract::patterns::compile_static_regex;

const DEFAULT_API_BASE: &str = "https://api.figshare.com/v2";
const DEFAULT_WEB_BASE: &str = "https://figshare.com";

/// Article IDs live comfortably inside this numeric range.
const MIN_ARTICLE_ID: u64 = 1_000_000;
const MAX_ARTICLE_ID: u64 = 100_000_000;

/// What a figshare identifier resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetType {
    /// Single article (the common case).
    Article,
    /// Collection of articles.
    Collection,
    /// Project grouping.
    Project,
}

impl DatasetType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Collection => "collection",
            Self::Project => "project",
        }
    }
}

static NUMERIC_ID: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"^\d{6,8}$"));

static SHARE_LINK: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"figshare\.com/s/([A-Za-z0-9]+)"));

static URL_ARTICLE_ID: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?:articles|collections|projects)/(?:[^\s/]+/)*?(\d{6,8})"));

static FIGSHARE_DOI: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"10\.\d{4,9}/m9\.figshare\.(\d{6,8})"));

// Shared-link HTML signals, strongest first.
static HTML_API_ENDPOINT: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"api\.figshare\.com/v2/articles/(\d{6,8})"));
static HTML_NDOWNLOADER: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"ndownloader/(?:articles|files)/(\d{6,8})"));
static HTML_DOWNLOAD_ALL: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)href\s*=\s*["'][^"']*articles/(\d{6,8})/download[^"']*["']"#)
});
static HTML_ARTICLE_URL: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"figshare\.com/articles/[^\s"'<>]*?(\d{6,8})"#));
static HTML_PRIVATE_LINK: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#""private_link"\s*:\s*\{[^}]*"id"\s*:\s*(\d{6,8})"#));
static HTML_CITATION: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i)citation[^<]{0,200}?figshare[^<]{0,80}?(\d{6,8})"#));
static HTML_CLIENT_STATE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#""(?:article_id|articleId)"\s*:\s*(\d{6,8})"#));
static HTML_ANY_NUMBER: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\d{6,8}"));

/// Figshare source adapter.
pub struct FigshareDownloader {
    client: RepoClient,
    api_base: String,
    web_base: String,
    prompter: Arc<dyn ConflictPrompter>,
}

impl FigshareDownloader {
    /// Creates the adapter against the public figshare API.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] when HTTP client construction fails.
    pub fn new() -> Result<Self, DownloadError> {
        Ok(Self {
            client: RepoClient::new("figshare", 4.0)?,
            api_base: DEFAULT_API_BASE.to_string(),
            web_base: DEFAULT_WEB_BASE.to_string(),
            prompter: Arc::new(StdinPrompter),
        })
    }

    /// Overrides endpoint bases (wiremock test seam).
    #[must_use]
    pub fn with_base_urls(mut self, api: impl Into<String>, web: impl Into<String>) -> Self {
        self.api_base = api.into();
        self.web_base = web.into();
        self
    }

    /// Replaces the conflict prompter.
    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn ConflictPrompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Extracts a numeric article/collection/project ID without network
    /// access. Shared links cannot be cleaned offline and return `None`.
    #[must_use]
    pub fn clean_id(id: &str) -> Option<String> {
        let trimmed = id.trim();
        if NUMERIC_ID.is_match(trimmed) {
            return Some(trimmed.to_string());
        }
        if let Some(c) = FIGSHARE_DOI.captures(trimmed) {
            return Some(c[1].to_string());
        }
        if let Some(c) = URL_ARTICLE_ID.captures(trimmed) {
            return Some(c[1].to_string());
        }
        None
    }

    /// Returns the shared-link hash when the identifier is a shared link.
    #[must_use]
    pub fn share_hash(id: &str) -> Option<String> {
        SHARE_LINK.captures(id).map(|c| c[1].to_string())
    }

    /// Recovers an article ID from shared-link landing page HTML.
    ///
    /// Signals are tried strongest-first: API endpoint reference,
    /// downloader URL, explicit download-all link, embedded DOI, article
    /// URL, private-link JSON, citation text, client-state JSON, and
    /// finally the largest 6-8 digit number in the plausible ID range.
    #[must_use]
    pub fn resolve_from_html(html: &str) -> Option<String> {
        for signal in [
            &HTML_API_ENDPOINT,
            &HTML_NDOWNLOADER,
            &HTML_DOWNLOAD_ALL,
        ] {
            if let Some(c) = signal.captures(html) {
                return Some(c[1].to_string());
            }
        }
        if let Some(c) = FIGSHARE_DOI.captures(html) {
            return Some(c[1].to_string());
        }
        for signal in [
            &HTML_ARTICLE_URL,
            &HTML_PRIVATE_LINK,
            &HTML_CITATION,
            &HTML_CLIENT_STATE,
        ] {
            if let Some(c) = signal.captures(html) {
                return Some(c[1].to_string());
            }
        }

        // Last resort: the largest plausible article number on the page.
        HTML_ANY_NUMBER
            .find_iter(html)
            .filter_map(|m| m.as_str().parse::<u64>().ok())
            .filter(|n| (MIN_ARTICLE_ID..MAX_ARTICLE_ID).contains(n))
            .max()
            .map(|n| n.to_string())
    }

    /// Resolves any accepted identifier form to a numeric ID, fetching the
    /// shared-link landing page when needed.
    async fn resolve_id(&self, id: &str) -> Result<String, DownloadError> {
        if let Some(clean) = Self::clean_id(id) {
            return Ok(clean);
        }
        if let Some(hash) = Self::share_hash(id) {
            let url = format!("{}/s/{hash}", self.web_base);
            debug!(url, "resolving shared link");
            let html = self.client.get_text(&url).await?;
            return Self::resolve_from_html(&html)
                .ok_or_else(|| DownloadError::not_found("figshare", id));
        }
        Err(DownloadError::invalid_id(
            "figshare",
            id,
            "not a figshare ID, URL, DOI, or shared link",
        ))
    }

    /// Fetches metadata, trying articles, then collections, then projects.
    async fn fetch_typed_metadata(
        &self,
        id: &str,
    ) -> Result<(DatasetType, FigshareArticle), DownloadError> {
        let article_url = format!("{}/articles/{id}", self.api_base);
        match self.client.get_text(&article_url).await {
            Ok(json) => {
                let article: FigshareArticle = serde_json::from_str(&json)
                    .map_err(|e| DownloadError::decode(&article_url, e.to_string()))?;
                return Ok((DatasetType::Article, article));
            }
            Err(DownloadError::HttpStatus { status: 404, .. }) => {}
            Err(error) => return Err(error),
        }

        let collection_url = format!("{}/collections/{id}", self.api_base);
        match self.client.get_text(&collection_url).await {
            Ok(json) => {
                let collection: FigshareArticle = serde_json::from_str(&json)
                    .map_err(|e| DownloadError::decode(&collection_url, e.to_string()))?;
                return Ok((DatasetType::Collection, collection));
            }
            Err(DownloadError::HttpStatus { status: 404, .. }) => {}
            Err(error) => return Err(error),
        }

        let project_url = format!("{}/projects/{id}", self.api_base);
        match self.client.get_text(&project_url).await {
            Ok(json) => {
                let project: FigshareArticle = serde_json::from_str(&json)
                    .map_err(|e| DownloadError::decode(&project_url, e.to_string()))?;
                Ok((DatasetType::Project, project))
            }
            Err(DownloadError::HttpStatus { status: 404, .. }) => {
                Err(DownloadError::not_found("figshare", id))
            }
            Err(error) => Err(error),
        }
    }

    /// Enumerates the files of a collection's member articles.
    async fn collection_files(
        &self,
        id: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<(String, FigshareFile)>, DownloadError> {
        let url = format!("{}/collections/{id}/articles?page_size=100", self.api_base);
        let json = self.client.get_text(&url).await?;
        let members: Vec<FigshareArticleStub> = serde_json::from_str(&json)
            .map_err(|e| DownloadError::decode(&url, e.to_string()))?;

        let mut files = Vec::new();
        for member in members {
            let files_url = format!("{}/articles/{}/files", self.api_base, member.id);
            match self.client.get_text(&files_url).await {
                Ok(json) => {
                    let listed: Vec<FigshareFile> = serde_json::from_str(&json)
                        .map_err(|e| DownloadError::decode(&files_url, e.to_string()))?;
                    let subdir = sanitize_filename(&member.id.to_string());
                    files.extend(listed.into_iter().map(|f| (subdir.clone(), f)));
                }
                Err(error) => {
                    warnings.push(format!("article {} files unavailable: {error}", member.id));
                }
            }
        }
        Ok(files)
    }

    /// Applies supplementary/link-only/custom filtering and plans files.
    fn plan_files(
        files: Vec<(String, FigshareFile)>,
        exclude_supplementary: bool,
        filters: &FileFilters,
        warnings: &mut Vec<String>,
    ) -> Vec<PlannedFile> {
        let mut planned = Vec::new();
        for (subdir, file) in files {
            if file.is_link_only {
                debug!(name = %file.name, "skipping link-only file");
                continue;
            }
            if exclude_supplementary && file.name.to_ascii_lowercase().contains("suppl") {
                continue;
            }
            if !filters.matches(&file.name, Some(file.size), file.mimetype.as_deref()) {
                continue;
            }
            let Some(url) = file.download_url else {
                warnings.push(format!("{}: no download URL", file.name));
                continue;
            };
            let name = sanitize_filename(&file.name);
            let mut item = PlannedFile {
                url,
                relative_path: name.clone(),
                original_name: file.name,
                expected_size: Some(file.size),
                optional: false,
            };
            if !subdir.is_empty() {
                item = item.under(&subdir);
            }
            planned.push(item);
        }
        planned
    }
}

#[async_trait]
impl Downloader for FigshareDownloader {
    fn source_type(&self) -> &'static str {
        "figshare"
    }

    fn validate(&self, id: &str) -> SourceValidation {
        if let Some(clean) = Self::clean_id(id) {
            return SourceValidation::valid(clean);
        }
        if Self::share_hash(id).is_some() {
            // Shared links need the landing page; resolution happens at
            // metadata/download time.
            return SourceValidation::valid(id.trim())
                .with_warning("shared link; article ID resolved at download time".to_string());
        }
        SourceValidation::invalid(id, "not a figshare ID, URL, DOI, or shared link")
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, id: &str) -> Result<Metadata, DownloadError> {
        let resolved = self.resolve_id(id).await?;
        let (dataset_type, payload) = self.fetch_typed_metadata(&resolved).await?;
        Ok(payload.into_metadata(&resolved, dataset_type))
    }

    #[instrument(skip(self, request), fields(id = %request.id))]
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult, DownloadError> {
        let resolved = self.resolve_id(&request.id).await?;
        let (dataset_type, payload) = self.fetch_typed_metadata(&resolved).await?;

        let (filters, mut warnings) = FileFilters::parse(&request.options.custom_filters);
        let mut collections = Vec::new();

        let raw_files: Vec<(String, FigshareFile)> = match dataset_type {
            DatasetType::Article => payload
                .files
                .clone()
                .into_iter()
                .map(|f| (String::new(), f))
                .collect(),
            DatasetType::Collection => {
                let files = self.collection_files(&resolved, &mut warnings).await?;
                collections.push(Collection {
                    collection_type: "articles".to_string(),
                    id: resolved.clone(),
                    title: payload.title.clone().unwrap_or_else(|| resolved.clone()),
                    file_count: files.len(),
                    estimated_size: files.iter().map(|(_, f)| f.size).sum(),
                    confirmed: true,
                    sample_files: files.iter().take(5).map(|(_, f)| f.name.clone()).collect(),
                });
                files
            }
            DatasetType::Project => {
                warn!(id = %resolved, "project downloads enumerate no files");
                warnings.push(
                    "projects have no direct file listing; download member articles individually"
                        .to_string(),
                );
                Vec::new()
            }
        };

        let planned = Self::plan_files(
            raw_files,
            request.options.exclude_supplementary,
            &filters,
            &mut warnings,
        );

        let metadata = payload.into_metadata(&resolved, dataset_type);
        execute_plan(
            PlanExecution {
                source: "figshare",
                id: resolved.clone(),
                resolved_url: Some(format!(
                    "{}/articles/{resolved}",
                    self.web_base.trim_end_matches('/')
                )),
                metadata,
                collections,
                planned,
                warnings,
                client: &self.client,
                prompter: self.prompter.as_ref(),
            },
            request,
        )
        .await
    }
}

// ==================== API response types ====================

/// Article, collection, and project payloads share the fields this
/// adapter reads; absent fields simply decode to `None`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FigshareArticle {
    pub id: u64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub doi: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<FigshareCategory>,
    #[serde(default)]
    pub authors: Vec<FigshareAuthor>,
    pub license: Option<FigshareLicense>,
    pub version: Option<u64>,
    pub created_date: Option<String>,
    pub modified_date: Option<String>,
    #[serde(default)]
    pub files: Vec<FigshareFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FigshareAuthor {
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FigshareCategory {
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FigshareLicense {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FigshareFile {
    #[allow(dead_code)] // Deserialized for Debug output and completeness
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    pub download_url: Option<String>,
    #[serde(default)]
    pub is_link_only: bool,
    pub computed_md5: Option<String>,
    pub mimetype: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FigshareArticleStub {
    pub id: u64,
}

impl FigshareArticle {
    fn into_metadata(self, id: &str, dataset_type: DatasetType) -> Metadata {
        let mut metadata = Metadata {
            source: "figshare".to_string(),
            id: id.to_string(),
            title: self.title,
            description: self.description,
            doi: self.doi,
            license: self.license.and_then(|l| l.name),
            version: self.version.map(|v| v.to_string()),
            created: self.created_date,
            last_modified: self.modified_date,
            tags: self.tags,
            keywords: self
                .categories
                .into_iter()
                .filter_map(|c| c.title)
                .collect(),
            authors: self
                .authors
                .into_iter()
                .filter_map(|a| a.full_name)
                .collect(),
            file_count: (!self.files.is_empty()).then_some(self.files.len()),
            total_size: {
                let total: u64 = self.files.iter().map(|f| f.size).sum();
                (total > 0).then_some(total)
            },
            ..Metadata::default()
        };
        metadata.custom.insert(
            "dataset_type".to_string(),
            serde_json::Value::String(dataset_type.as_str().to_string()),
        );
        metadata.custom.insert(
            "article_id".to_string(),
            serde_json::Value::Number(self.id.into()),
        );
        if let Some(md5s) = self
            .files
            .iter()
            .map(|f| f.computed_md5.clone())
            .collect::<Option<Vec<_>>>()
        {
            if !md5s.is_empty() {
                metadata.custom.insert(
                    "file_md5s".to_string(),
                    serde_json::Value::Array(
                        md5s.into_iter().map(serde_json::Value::String).collect(),
                    ),
                );
            }
        }
        metadata
    }
}
