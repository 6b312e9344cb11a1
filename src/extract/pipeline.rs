//! The extraction pipeline: text to validated, deduplicated links.
//!
//! Stage order per input file: text source -> cleaner -> candidate
//! extraction -> source-adapter recognition (with pattern classification
//! as the fallback and figshare URL reconstruction where applicable) ->
//! corruption adjustment -> deduplication -> confidence/domain filters ->
//! per-page truncation -> optional HTTP validation -> deterministic sort.
//!
//! A single bad candidate never fails the run; it is dropped with a
//! warning. The result is produced once and never mutated afterwards.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::candidates::{Candidate, extract_candidates};
use super::cleaner::clean_text;
use super::dedup::{dedup_links, sort_links};
use super::normalize::{adjust_for_corruption, reconstruct_figshare_url};
use super::{DatasetRef, ExtractError, ExtractedLink, ExtractionOptions, ExtractionResult, LinkKind};
use crate::download::registry::DownloaderRegistry;
use crate::pool::CancelToken;
use crate::source::{DocumentText, PlainTextSource, TextSource};
use crate::validate::{DEFAULT_CONCURRENCY, LinkValidator, rewrite_confidence};

/// Validation deadline per page of links.
const PAGE_VALIDATION_DEADLINE: Duration = Duration::from_secs(30);

/// Width of the context window handed to URL reconstruction.
const RECONSTRUCTION_WINDOW: usize = 150;

/// Section headers recognized for link locators.
const SECTION_HEADERS: [&str; 8] = [
    "data availability",
    "materials and methods",
    "methods",
    "results",
    "references",
    "supplementary",
    "discussion",
    "abstract",
];

/// Orchestrates the extraction stages for input files.
pub struct Extractor {
    options: ExtractionOptions,
    source: Box<dyn TextSource>,
    registry: Option<Arc<DownloaderRegistry>>,
    cancel: CancelToken,
}

impl Extractor {
    /// Creates an extractor reading pre-converted text files.
    #[must_use]
    pub fn new(options: ExtractionOptions) -> Self {
        Self {
            options,
            source: Box::new(PlainTextSource),
            registry: None,
            cancel: CancelToken::new(),
        }
    }

    /// Replaces the text source.
    #[must_use]
    pub fn with_source(mut self, source: Box<dyn TextSource>) -> Self {
        self.source = source;
        self
    }

    /// Enables source-adapter recognition during extraction.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<DownloaderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Wires an external cancellation token through validation.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Extracts links from the document at `path`.
    ///
    /// # Errors
    ///
    /// Only text-source failures abort the run; everything downstream
    /// degrades to warnings inside the result.
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub async fn extract_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ExtractionResult, ExtractError> {
        let path = path.as_ref();
        let document = self.source.extract(path)?;
        let filename = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string());
        Ok(self.extract_document(&filename, &document).await)
    }

    /// Extracts links from already-loaded document text.
    #[instrument(skip(self, document), fields(pages = document.page_count()))]
    pub async fn extract_document(
        &self,
        filename: &str,
        document: &DocumentText,
    ) -> ExtractionResult {
        let started = Instant::now();
        let mut warnings = Vec::new();
        let errors = Vec::new();

        // Clean and extract per page so locators survive the cleanup.
        let mut links = Vec::new();
        let mut text_length = 0usize;
        for (index, page_text) in document.pages.iter().enumerate() {
            let page = index + 1;
            let cleaned = clean_text(page_text);
            text_length += cleaned.chars().count();

            for candidate in extract_candidates(&cleaned, self.options.use_accession_recognition) {
                links.push(self.build_link(candidate, &cleaned, page).await);
            }
        }
        debug!(raw = links.len(), "links before deduplication");

        let mut links = dedup_links(links);

        // Confidence and domain filters.
        let before_filters = links.len();
        links.retain(|link| link.confidence >= self.options.min_confidence);
        if !self.options.filter_domains.is_empty() {
            links.retain(|link| {
                let url = link.url.to_ascii_lowercase();
                self.options
                    .filter_domains
                    .iter()
                    .any(|domain| url.contains(&domain.to_ascii_lowercase()))
            });
        }
        if links.len() < before_filters {
            debug!(
                removed = before_filters - links.len(),
                "links removed by confidence/domain filters"
            );
        }

        // Per-page cap, applied after filtering.
        if self.options.max_links_per_page > 0 {
            #[allow(clippy::cast_sign_loss)]
            let cap = self.options.max_links_per_page as usize;
            let mut per_page: BTreeMap<usize, usize> = BTreeMap::new();
            let before_cap = links.len();
            links.retain(|link| {
                let count = per_page.entry(link.page).or_insert(0);
                *count += 1;
                *count <= cap
            });
            if links.len() < before_cap {
                warnings.push(format!(
                    "per-page limit {cap} truncated {} link(s)",
                    before_cap - links.len()
                ));
            }
        }

        // Summary counters reflect what was found, before any
        // validation-based removal.
        let mut counts_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut counts_by_page: BTreeMap<usize, usize> = BTreeMap::new();
        for link in &links {
            *counts_by_kind.entry(link.kind.to_string()).or_insert(0) += 1;
            *counts_by_page.entry(link.page).or_insert(0) += 1;
        }

        if self.options.validate_links {
            self.validate_links(&mut links, &mut warnings).await;
            if !self.options.keep_404s {
                links.retain(|link| {
                    link.validation
                        .as_ref()
                        .is_none_or(|validation| validation.accessible)
                });
            }
        }

        sort_links(&mut links);

        info!(
            filename,
            links = links.len(),
            duration_ms = started.elapsed().as_millis(),
            "extraction finished"
        );

        ExtractionResult {
            filename: filename.to_string(),
            page_count: document.page_count(),
            text_length,
            links,
            counts_by_kind,
            counts_by_page,
            duration: started.elapsed(),
            warnings,
            errors,
        }
    }

    /// Builds one link from a candidate: adapter recognition, figshare
    /// reconstruction, context capture, corruption adjustment.
    async fn build_link(&self, candidate: Candidate, page_text: &str, page: usize) -> ExtractedLink {
        let mut url = candidate.url;
        let mut dataset = None;

        // A registered source recognizing the raw text is a stronger
        // signal than pattern classification alone. The generic fallback
        // accepts any URL, so its claim carries no information.
        if let Some(registry) = &self.registry {
            if let Some(detection) = registry.detect(&candidate.text).await {
                if detection.source != "generic" {
                    dataset = Some(DatasetRef {
                        source: detection.source,
                        id: detection.validation.id,
                        warnings: detection.validation.warnings,
                    });
                }
            }
        }

        if candidate.kind == LinkKind::Figshare {
            let window = context_window(page_text, candidate.position, RECONSTRUCTION_WINDOW);
            url = reconstruct_figshare_url(&url, window);
        }

        let context = self.options.include_context.then(|| {
            context_window(page_text, candidate.position, self.options.context_length).to_string()
        });

        let confidence = adjust_for_corruption(&url, candidate.kind, candidate.confidence);

        ExtractedLink {
            url,
            kind: candidate.kind,
            context,
            page,
            section: find_section(page_text, candidate.position),
            confidence,
            validation: None,
            dataset,
        }
    }

    /// Validates links page by page, each batch under its own deadline.
    async fn validate_links(&self, links: &mut [ExtractedLink], warnings: &mut Vec<String>) {
        let validator = match LinkValidator::new() {
            Ok(validator) => validator,
            Err(error) => {
                warnings.push(format!("validator unavailable: {error}"));
                return;
            }
        };

        let mut pages: Vec<usize> = links.iter().map(|l| l.page).collect();
        pages.sort_unstable();
        pages.dedup();

        for page in pages {
            let urls: Vec<String> = links
                .iter()
                .filter(|l| l.page == page && l.url.starts_with("http"))
                .map(|l| l.url.clone())
                .collect();
            if urls.is_empty() {
                continue;
            }

            let batch = validator.validate_batch(urls, DEFAULT_CONCURRENCY, self.cancel.clone());
            let results = match tokio::time::timeout(PAGE_VALIDATION_DEADLINE, batch).await {
                Ok(results) => results,
                Err(_) => {
                    warn!(page, "validation deadline exceeded");
                    warnings.push(format!("page {page}: validation deadline exceeded"));
                    continue;
                }
            };

            for link in links.iter_mut().filter(|l| l.page == page) {
                if let Some(result) = results.get(&link.url) {
                    link.confidence = rewrite_confidence(result, link.confidence);
                    link.validation = Some(result.clone());
                }
            }
        }
    }
}

/// Returns a window of `radius` characters on each side of `position`,
/// aligned to char boundaries.
fn context_window(text: &str, position: usize, radius: usize) -> &str {
    let mut start = position.saturating_sub(radius);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (position + radius).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start..end]
}

/// Finds the nearest recognized section header preceding `position`.
fn find_section(text: &str, position: usize) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let prefix = &lower[..position.min(lower.len())];

    SECTION_HEADERS
        .iter()
        .filter_map(|header| prefix.rfind(header).map(|at| (at, *header)))
        .max_by_key(|(at, _)| *at)
        .map(|(_, header)| header.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn doc(text: &str) -> DocumentText {
        DocumentText::from_blob(text)
    }

    // ==================== Stage Flow Tests ====================

    #[tokio::test]
    async fn test_extract_document_finds_doi_and_accession() {
        let extractor = Extractor::new(ExtractionOptions::default());
        let result = extractor
            .extract_document(
                "paper.txt",
                &doc("Data at https://doi.org/10.1038/s41467-021-23778-6 and GSE123456."),
            )
            .await;

        assert_eq!(result.page_count, 1);
        let kinds: Vec<LinkKind> = result.links.iter().map(|l| l.kind).collect();
        assert!(kinds.contains(&LinkKind::Doi));
        assert!(kinds.contains(&LinkKind::Geo));
        assert_eq!(*result.counts_by_page.get(&1).unwrap(), result.links.len());
    }

    #[tokio::test]
    async fn test_corruption_variants_collapse_to_one_link() {
        let text = "\
            https://doi.org/10.1038/s41467-021-23778-6 \
            https://doi.org/10.1038/s41467-021-23778-6|www.nature.com/ \
            https://doi.org/10.1038/s41467-021-23778-62 \
            https://doi.org/10.1038/s41467-021-23778-6ARTICLE \
            https://doi.org/10.1038/s41467-021-23778-64";
        let extractor = Extractor::new(ExtractionOptions::default());
        let result = extractor.extract_document("paper.txt", &doc(text)).await;

        assert_eq!(
            result.links.len(),
            1,
            "variants must collapse: {:#?}",
            result.links
        );
        assert_eq!(result.links[0].kind, LinkKind::Doi);
        assert_eq!(result.links[0].url, "https://doi.org/10.1038/s41467-021-23778-6");
        assert!(result.links[0].confidence >= 0.9);
    }

    #[tokio::test]
    async fn test_deterministic_across_runs() {
        let text = "GSE123456 https://zenodo.org/record/55555 10.1234/abcd \
                    https://example.com/data.csv PRJNA654321";
        let extractor = Extractor::new(ExtractionOptions::default());

        let first = extractor.extract_document("p.txt", &doc(text)).await;
        let second = extractor.extract_document("p.txt", &doc(text)).await;

        let urls = |r: &ExtractionResult| -> Vec<String> {
            r.links.iter().map(|l| l.url.clone()).collect()
        };
        assert_eq!(urls(&first), urls(&second));
    }

    #[tokio::test]
    async fn test_min_confidence_filter() {
        let text = "https://doi.org/10.1234/clean and https://example.com/page";
        let options = ExtractionOptions {
            min_confidence: 0.9,
            ..ExtractionOptions::default()
        };
        let result = Extractor::new(options)
            .extract_document("p.txt", &doc(text))
            .await;

        assert!(result.links.iter().all(|l| l.confidence >= 0.9));
        assert!(result.links.iter().any(|l| l.kind == LinkKind::Doi));
    }

    #[tokio::test]
    async fn test_domain_filter() {
        let text = "https://zenodo.org/record/1 https://example.com/data.csv";
        let options = ExtractionOptions {
            filter_domains: vec!["zenodo.org".to_string()],
            ..ExtractionOptions::default()
        };
        let result = Extractor::new(options)
            .extract_document("p.txt", &doc(text))
            .await;

        assert!(!result.links.is_empty());
        assert!(result.links.iter().all(|l| l.url.contains("zenodo.org")));
    }

    #[tokio::test]
    async fn test_per_page_cap_truncates_with_warning() {
        let text = "10.1111/aaa 10.2222/bbb 10.3333/ccc 10.4444/ddd";
        let options = ExtractionOptions {
            max_links_per_page: 2,
            ..ExtractionOptions::default()
        };
        let result = Extractor::new(options)
            .extract_document("p.txt", &doc(text))
            .await;

        assert_eq!(result.links.len(), 2);
        assert!(result.warnings.iter().any(|w| w.contains("per-page limit")));
    }

    #[tokio::test]
    async fn test_pages_attributed_from_form_feeds() {
        let text = "page one GSE111111\u{c}page two GSE222222";
        let extractor = Extractor::new(ExtractionOptions::default());
        let result = extractor.extract_document("p.txt", &doc(text)).await;

        assert_eq!(result.page_count, 2);
        let pages: Vec<usize> = result
            .links
            .iter()
            .filter(|l| l.kind == LinkKind::Geo)
            .map(|l| l.page)
            .collect();
        assert_eq!(pages.len(), 2);
        assert!(pages.contains(&1) && pages.contains(&2));
    }

    // ==================== Context & Section Tests ====================

    #[tokio::test]
    async fn test_context_captured_when_enabled() {
        let options = ExtractionOptions {
            include_context: true,
            context_length: 20,
            ..ExtractionOptions::default()
        };
        let result = Extractor::new(options)
            .extract_document("p.txt", &doc("deposited under accession GSE123456 in GEO"))
            .await;

        let geo = result.links.iter().find(|l| l.kind == LinkKind::Geo).unwrap();
        let context = geo.context.as_deref().unwrap();
        assert!(context.contains("GSE123456"));
        assert!(context.contains("accession"));
    }

    #[test]
    fn test_find_section_nearest_preceding() {
        let text = "Methods blah blah. Data availability: deposited under GSE1.";
        let position = text.find("GSE1").unwrap();
        assert_eq!(
            find_section(text, position).as_deref(),
            Some("data availability")
        );
    }

    #[test]
    fn test_find_section_none_before_any_header() {
        assert!(find_section("GSE1 appears before any header", 0).is_none());
    }

    #[test]
    fn test_context_window_char_boundary_safe() {
        let text = "ünïcödé GSE123456 ünïcödé";
        let position = text.find("GSE").unwrap();
        let window = context_window(text, position, 5);
        assert!(window.contains("GSE"));
    }

    // ==================== Warning Tests ====================

    #[tokio::test]
    async fn test_no_links_in_plain_prose() {
        let extractor = Extractor::new(ExtractionOptions::default());
        let result = extractor
            .extract_document("p.txt", &doc("No identifiers in this sentence at all."))
            .await;
        assert!(result.links.is_empty());
        assert!(result.errors.is_empty());
    }
}
