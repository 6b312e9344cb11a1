//! Gene Expression Omnibus (GEO) source adapter.
//!
//! Metadata comes from the NCBI e-utils pair: `esearch` maps an accession
//! to an internal UID, `esummary` returns the structured record for that
//! UID (both XML). Files come from the GEO bulk archive, which partitions
//! directories by accession digit groups (`GSE123456` lives under
//! `GSE123nnn/`). Series downloads combine fixed matrix/SOFT templates
//! with a scan of the series' supplementary directory listing; sample
//! downloads try the listing first and fall back to common filename
//! templates.
//!
//! With `NCBI_API_KEY` set, e-utils calls run at 8 req/s; anonymous
//! traffic stays at 2.5 req/s. The last-call timestamp is process-wide.

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::client::RepoClient;
use super::directory::{ConflictPrompter, StdinPrompter};
use super::engine::{PlanExecution, PlannedFile, execute_plan};
use super::error::DownloadError;
use super::{
    Collection, DownloadRequest, DownloadResult, Downloader, Metadata, SourceValidation,
};
use crate::extract::patterns::compile_static_regex;

/// Environment variable holding the optional NCBI API key.
pub const API_KEY_ENV: &str = "NCBI_API_KEY";

/// e-utils request rate with an API key.
const KEYED_RATE: f64 = 8.0;

/// Anonymous e-utils request rate.
const ANONYMOUS_RATE: f64 = 2.5;

/// Bulk-archive request rate.
const ARCHIVE_RATE: f64 = 4.0;

const DEFAULT_EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const DEFAULT_ARCHIVE_BASE: &str = "https://ftp.ncbi.nlm.nih.gov";

/// Accessions below this number draw a validation warning.
const LOW_ACCESSION_THRESHOLD: u64 = 100;

static ACCESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)\b(G(?:SE|SM|PL|DS))(\d+)\b"));

/// Common supplementary filename templates tried for samples when the
/// directory listing is unreachable.
const SAMPLE_TEMPLATES: [&str; 4] = ["{acc}.CEL.gz", "{acc}.cel.gz", "{acc}.txt.gz", "{acc}_table.txt.gz"];

/// GEO source adapter.
pub struct GeoDownloader {
    api: RepoClient,
    archive: RepoClient,
    api_key: Option<String>,
    eutils_base: String,
    archive_base: String,
    prompter: Arc<dyn ConflictPrompter>,
}

impl GeoDownloader {
    /// Creates the adapter, reading the API key from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] when HTTP client construction fails.
    pub fn from_env() -> Result<Self, DownloadError> {
        Self::new(std::env::var(API_KEY_ENV).ok())
    }

    /// Creates the adapter with an explicit (or absent) API key.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] when HTTP client construction fails.
    pub fn new(api_key: Option<String>) -> Result<Self, DownloadError> {
        let rate = if api_key.is_some() { KEYED_RATE } else { ANONYMOUS_RATE };
        Ok(Self {
            api: RepoClient::new("eutils", rate)?,
            archive: RepoClient::new("geo-archive", ARCHIVE_RATE)?,
            api_key,
            eutils_base: DEFAULT_EUTILS_BASE.to_string(),
            archive_base: DEFAULT_ARCHIVE_BASE.to_string(),
            prompter: Arc::new(StdinPrompter),
        })
    }

    /// Overrides endpoint bases (wiremock test seam).
    #[must_use]
    pub fn with_base_urls(mut self, eutils: impl Into<String>, archive: impl Into<String>) -> Self {
        self.eutils_base = eutils.into();
        self.archive_base = archive.into();
        self
    }

    /// Replaces the conflict prompter.
    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn ConflictPrompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Extracts the canonical accession from a bare ID or a GEO URL.
    #[must_use]
    pub fn clean_id(id: &str) -> Option<String> {
        ACCESSION_RE
            .captures(id)
            .map(|c| format!("{}{}", c[1].to_ascii_uppercase(), &c[2]))
    }

    fn api_url(&self, endpoint: &str, query: &str) -> String {
        let mut url = format!("{}/{endpoint}.fcgi?{query}", self.eutils_base);
        if let Some(key) = &self.api_key {
            url.push_str("&api_key=");
            url.push_str(key);
        }
        url
    }

    async fn lookup_uid(&self, accession: &str) -> Result<String, DownloadError> {
        let url = self.api_url(
            "esearch",
            &format!("db=gds&term={accession}%5BACCN%5D&retmode=xml"),
        );
        let xml = self.api.get_text(&url).await?;
        let parsed: ESearchResult = quick_xml::de::from_str(&xml)
            .map_err(|e| DownloadError::decode(&url, e.to_string()))?;
        parsed
            .id_list
            .and_then(|list| list.ids.into_iter().next())
            .ok_or_else(|| DownloadError::not_found("geo", accession))
    }

    async fn fetch_summary(&self, uid: &str, accession: &str) -> Result<Metadata, DownloadError> {
        let url = self.api_url("esummary", &format!("db=gds&id={uid}&retmode=xml"));
        let xml = self.api.get_text(&url).await?;
        let parsed: ESummaryResult = quick_xml::de::from_str(&xml)
            .map_err(|e| DownloadError::decode(&url, e.to_string()))?;
        let docsum = parsed
            .docsums
            .into_iter()
            .next()
            .ok_or_else(|| DownloadError::not_found("geo", accession))?;
        Ok(docsum.into_metadata(accession))
    }

    /// Builds the digit-group directory stub: `GSE123456` -> `GSE123nnn`.
    fn archive_stub(accession: &str) -> String {
        let split = accession.find(|c: char| c.is_ascii_digit()).unwrap_or(3);
        let (prefix, digits) = accession.split_at(split);
        if digits.len() <= 3 {
            format!("{prefix}nnn")
        } else {
            format!("{prefix}{}nnn", &digits[..digits.len() - 3])
        }
    }

    fn series_base(&self, accession: &str) -> String {
        format!(
            "{}/geo/series/{}/{accession}",
            self.archive_base,
            Self::archive_stub(accession)
        )
    }

    fn sample_base(&self, accession: &str) -> String {
        format!(
            "{}/geo/samples/{}/{accession}",
            self.archive_base,
            Self::archive_stub(accession)
        )
    }

    /// Plans a series download: matrix + SOFT templates, every file in the
    /// supplementary listing, and (optionally) reachable sample subtrees.
    async fn plan_series(
        &self,
        accession: &str,
        metadata: &Metadata,
        include_raw: bool,
        warnings: &mut Vec<String>,
    ) -> (Vec<PlannedFile>, Vec<Collection>) {
        let base = self.series_base(accession);
        let mut planned = vec![
            PlannedFile::required(
                format!("{base}/matrix/{accession}_series_matrix.txt.gz"),
                format!("{accession}_series_matrix.txt.gz"),
            ),
            PlannedFile::required(
                format!("{base}/soft/{accession}_family.soft.gz"),
                format!("{accession}_family.soft.gz"),
            ),
        ];
        let mut collections = Vec::new();

        match self.archive.get_text(&format!("{base}/suppl/")).await {
            Ok(listing) => {
                for name in super::client::parse_directory_listing(&listing) {
                    planned.push(
                        PlannedFile::required(format!("{base}/suppl/{name}"), name).under("suppl"),
                    );
                }
            }
            Err(error) => {
                debug!(accession, %error, "no supplementary listing");
                warnings.push(format!("supplementary listing unavailable: {error}"));
            }
        }

        if include_raw {
            let samples = metadata_samples(metadata);
            let mut sample_files = 0usize;
            for sample in &samples {
                let sample_suppl = format!("{}/suppl/", self.sample_base(sample));
                // Only descend into subdirectories that answer a HEAD probe.
                if !self.archive.head_ok(&sample_suppl).await {
                    continue;
                }
                if let Ok(listing) = self.archive.get_text(&sample_suppl).await {
                    for name in super::client::parse_directory_listing(&listing) {
                        planned.push(
                            PlannedFile::optional(format!("{sample_suppl}{name}"), name)
                                .under(&format!("samples/{sample}")),
                        );
                        sample_files += 1;
                    }
                }
            }
            if !samples.is_empty() {
                collections.push(Collection {
                    collection_type: "samples".to_string(),
                    id: accession.to_string(),
                    title: format!("{accession} sample supplementary files"),
                    file_count: sample_files,
                    estimated_size: 0,
                    confirmed: true,
                    sample_files: samples.iter().take(5).cloned().collect(),
                });
            }
        }

        (planned, collections)
    }

    /// Plans a sample download: listing scan first, filename templates as
    /// the fallback. Every entry is optional; absence is expected.
    async fn plan_sample(&self, accession: &str, metadata: &Metadata) -> Vec<PlannedFile> {
        let base = self.sample_base(accession);
        let suppl = format!("{base}/suppl/");
        let mut planned = Vec::new();

        if let Ok(listing) = self.archive.get_text(&suppl).await {
            for name in super::client::parse_directory_listing(&listing) {
                planned.push(PlannedFile::optional(format!("{suppl}{name}"), name));
            }
        }
        if planned.is_empty() {
            for template in SAMPLE_TEMPLATES {
                let name = template.replace("{acc}", accession);
                planned.push(PlannedFile::optional(format!("{suppl}{name}"), name));
            }
        }

        // Supplementary names listed in the record itself, when present.
        for name in metadata_supplementary_files(metadata) {
            if !planned.iter().any(|p| p.original_name == name) {
                planned.push(PlannedFile::optional(format!("{suppl}{name}"), name));
            }
        }

        planned
    }

    fn plan_platform(&self, accession: &str) -> Vec<PlannedFile> {
        let base = format!(
            "{}/geo/platforms/{}/{accession}",
            self.archive_base,
            Self::archive_stub(accession)
        );
        vec![
            PlannedFile::optional(
                format!("{base}/soft/{accession}_family.soft.gz"),
                format!("{accession}_family.soft.gz"),
            ),
            // Alternative format when no SOFT family file exists.
            PlannedFile::optional(
                format!("{base}/annot/{accession}.annot.gz"),
                format!("{accession}.annot.gz"),
            ),
        ]
    }

    fn plan_dataset(&self, accession: &str) -> Vec<PlannedFile> {
        let base = format!(
            "{}/geo/datasets/{}/{accession}",
            self.archive_base,
            Self::archive_stub(accession)
        );
        vec![
            PlannedFile::optional(
                format!("{base}/soft/{accession}.soft.gz"),
                format!("{accession}.soft.gz"),
            ),
            PlannedFile::optional(
                format!("{base}/soft/{accession}_full.soft.gz"),
                format!("{accession}_full.soft.gz"),
            ),
        ]
    }
}

#[async_trait]
impl Downloader for GeoDownloader {
    fn source_type(&self) -> &'static str {
        "geo"
    }

    fn validate(&self, id: &str) -> SourceValidation {
        let Some(accession) = Self::clean_id(id) else {
            return SourceValidation::invalid(
                id,
                "not a GEO accession (expected GSE/GSM/GPL/GDS followed by digits)",
            );
        };

        let digits = &accession[3..];
        let Ok(number) = digits.parse::<u64>() else {
            return SourceValidation::invalid(&accession, "accession number out of range");
        };
        if number == 0 {
            return SourceValidation::invalid(&accession, "accession number must be positive");
        }

        let mut validation = SourceValidation::valid(&accession);
        if number < LOW_ACCESSION_THRESHOLD {
            validation = validation.with_warning(format!(
                "accession number {number} is unusually low; verify the identifier"
            ));
        }
        if accession.starts_with("GPL") || accession.starts_with("GDS") {
            validation = validation.with_warning(
                "only archive-format files are retrieved for this accession type".to_string(),
            );
        }
        validation
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, id: &str) -> Result<Metadata, DownloadError> {
        let validation = self.validate(id);
        if !validation.valid {
            return Err(DownloadError::invalid_id(
                "geo",
                id,
                validation.errors.join("; "),
            ));
        }
        let accession = validation.id;
        let uid = self.lookup_uid(&accession).await?;
        debug!(accession, uid, "resolved e-utils UID");
        self.fetch_summary(&uid, &accession).await
    }

    #[instrument(skip(self, request), fields(id = %request.id))]
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult, DownloadError> {
        let validation = self.validate(&request.id);
        if !validation.valid {
            return Err(DownloadError::invalid_id(
                "geo",
                &request.id,
                validation.errors.join("; "),
            ));
        }
        let accession = validation.id.clone();
        let mut warnings = validation.warnings;

        let metadata = match &request.metadata {
            Some(metadata) => metadata.clone(),
            None => match self.get_metadata(&accession).await {
                Ok(metadata) => metadata,
                Err(DownloadError::NotFound { .. }) => {
                    return Err(DownloadError::not_found("geo", &accession));
                }
                Err(error) => {
                    // Archive files may still exist when e-utils is down.
                    warn!(%error, "metadata unavailable, proceeding with archive templates");
                    warnings.push(format!("metadata unavailable: {error}"));
                    Metadata {
                        source: "geo".to_string(),
                        id: accession.clone(),
                        ..Metadata::default()
                    }
                }
            },
        };

        let mut collections = Vec::new();
        let planned = match &accession[..3] {
            "GSE" => {
                let (planned, series_collections) = self
                    .plan_series(
                        &accession,
                        &metadata,
                        request.options.include_raw,
                        &mut warnings,
                    )
                    .await;
                collections = series_collections;
                planned
            }
            "GSM" => self.plan_sample(&accession, &metadata).await,
            "GPL" => self.plan_platform(&accession),
            "GDS" => self.plan_dataset(&accession),
            _ => return Err(DownloadError::Unsupported(accession)),
        };

        execute_plan(
            PlanExecution {
                source: "geo",
                id: accession.clone(),
                resolved_url: Some(format!(
                    "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?acc={accession}"
                )),
                metadata,
                collections,
                planned,
                warnings,
                client: &self.archive,
                prompter: self.prompter.as_ref(),
            },
            request,
        )
        .await
    }
}

fn metadata_samples(metadata: &Metadata) -> Vec<String> {
    metadata
        .custom
        .get("samples")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn metadata_supplementary_files(metadata: &Metadata) -> Vec<String> {
    metadata
        .custom
        .get("supplementary_files")
        .and_then(|v| v.as_str())
        .map(|s| {
            s.split(';')
                .map(str::trim)
                .filter(|name| !name.is_empty() && name.contains('.'))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ==================== e-utils response types ====================

#[derive(Debug, Deserialize)]
#[serde(rename = "eSearchResult")]
struct ESearchResult {
    #[serde(rename = "IdList")]
    id_list: Option<IdList>,
}

#[derive(Debug, Deserialize)]
struct IdList {
    #[serde(rename = "Id", default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "eSummaryResult")]
struct ESummaryResult {
    #[serde(rename = "DocSum", default)]
    docsums: Vec<DocSum>,
}

#[derive(Debug, Deserialize)]
struct DocSum {
    #[serde(rename = "Item", default)]
    items: Vec<SummaryItem>,
}

/// One `<Item>` of an esummary document. Items nest for list and
/// structure types; unknown names are simply ignored.
#[derive(Debug, Deserialize)]
struct SummaryItem {
    #[serde(rename = "@Name")]
    name: String,
    #[serde(rename = "$text", default)]
    text: Option<String>,
    #[serde(rename = "Item", default)]
    items: Vec<SummaryItem>,
}

impl DocSum {
    fn field(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.text.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn sample_accessions(&self) -> Vec<String> {
        self.items
            .iter()
            .find(|item| item.name == "Samples")
            .map(|samples| {
                samples
                    .items
                    .iter()
                    .filter_map(|sample| {
                        sample
                            .items
                            .iter()
                            .find(|field| field.name == "Accession")
                            .and_then(|field| field.text.clone())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn into_metadata(self, accession: &str) -> Metadata {
        let mut metadata = Metadata {
            source: "geo".to_string(),
            id: accession.to_string(),
            title: self.field("title").map(str::to_string),
            description: self.field("summary").map(str::to_string),
            created: self.field("PDAT").map(str::to_string),
            ..Metadata::default()
        };

        if let Some(taxon) = self.field("taxon") {
            metadata.tags = taxon.split(';').map(|t| t.trim().to_string()).collect();
        }
        if let Some(n) = self.field("n_samples").and_then(|v| v.parse::<usize>().ok()) {
            metadata.file_count = Some(n);
        }

        for (key, field) in [
            ("entry_type", "entryType"),
            ("gds_type", "gdsType"),
            ("platform", "GPL"),
            ("supplementary_files", "suppFile"),
            ("ftp_link", "FTPLink"),
        ] {
            if let Some(value) = self.field(field) {
                metadata
                    .custom
                    .insert(key.to_string(), serde_json::Value::String(value.to_string()));
            }
        }

        let samples = self.sample_accessions();
        if !samples.is_empty() {
            metadata.custom.insert(
                "samples".to_string(),
                serde_json::Value::Array(
                    samples.into_iter().map(serde_json::Value::String).collect(),
                ),
            );
        }

        metadata
    }
}
