//! Identifier extraction from PDF-derived text.
//!
//! This module turns noisy text extracted from scientific PDFs into a
//! validated, deduplicated set of dataset references (DOIs, repository
//! URLs, biological accessions).
//!
//! # Architecture
//!
//! - [`patterns`] - Ordered recognizer catalog with confidence priors
//! - [`cleaner`] - PDF-extraction artifact cleanup
//! - [`candidates`] - Raw candidate production and well-formedness filters
//! - [`normalize`] - Canonical keys, corruption adjustment, quality scoring
//! - [`dedup`] - Canonical-key deduplication with deterministic ordering
//! - [`pipeline`] - The [`Extractor`](pipeline::Extractor) orchestrating all stages
//!
//! # Example
//!
//! ```no_run
//! use hapiq::extract::{ExtractionOptions, pipeline::Extractor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let extractor = Extractor::new(ExtractionOptions::default());
//! let result = extractor.extract_file("paper.txt").await?;
//! println!("{} links found", result.links.len());
//! # Ok(())
//! # }
//! ```

pub mod candidates;
pub mod cleaner;
pub mod dedup;
mod error;
pub mod normalize;
pub mod patterns;
pub mod pipeline;

pub use error::ExtractError;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validate::ValidationResult;

/// Kind of identifier a link was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Digital Object Identifier (bare, prefixed, or doi.org URL).
    Doi,
    /// Gene Expression Omnibus accession (GSE/GSM/GPL/GDS).
    Geo,
    /// Zenodo record URL or Zenodo DOI.
    Zenodo,
    /// Figshare article, collection, project, or shared-link URL.
    Figshare,
    /// Other recognized HTTP/FTP URL.
    Url,
    /// Bare identifier with no recognized namespace.
    Generic,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Doi => write!(f, "doi"),
            Self::Geo => write!(f, "geo"),
            Self::Zenodo => write!(f, "zenodo"),
            Self::Figshare => write!(f, "figshare"),
            Self::Url => write!(f, "url"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// A single dataset reference extracted from a document.
///
/// Links are owned by exactly one [`ExtractionResult`] and are not mutated
/// after the result is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLink {
    /// Printable reference, resolved to a fetchable form when possible.
    pub url: String,
    /// Identifier kind.
    pub kind: LinkKind,
    /// Surrounding text window, when context capture is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// 1-based page the link was found on.
    pub page: usize,
    /// Document section label, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Confidence in [0, 1]; non-increasing through corruption adjustment.
    pub confidence: f64,
    /// Probe outcome; absent until validated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    /// Source-adapter record when an adapter claimed the identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetRef>,
}

/// Adapter-specific record attached to a link when a registered source
/// recognized the identifier during extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRef {
    /// Source type that claimed the identifier (e.g. `geo`, `figshare`).
    pub source: String,
    /// Canonicalized identifier as returned by the adapter.
    pub id: String,
    /// Validation warnings emitted by the adapter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// The immutable result of extracting one input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Input filename as given.
    pub filename: String,
    /// Page count reported by the text source (1 when unknown).
    pub page_count: usize,
    /// Total length of the cleaned text in characters.
    pub text_length: usize,
    /// Deduplicated links in deterministic order.
    pub links: Vec<ExtractedLink>,
    /// Link counts per kind, taken before any `keep_404s` pruning.
    pub counts_by_kind: BTreeMap<String, usize>,
    /// Link counts per page, taken before any `keep_404s` pruning.
    pub counts_by_page: BTreeMap<usize, usize>,
    /// Wall-clock processing duration.
    pub duration: Duration,
    /// Per-stage warnings (bad candidates, truncation, probe failures).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Per-stage errors that did not abort the extraction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Configuration for an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOptions {
    /// Probe extracted links over HTTP after deduplication.
    pub validate_links: bool,
    /// Capture a text window around each link.
    pub include_context: bool,
    /// Context window width in characters (each side).
    pub context_length: usize,
    /// Host substrings to keep; empty means no filter.
    pub filter_domains: Vec<String>,
    /// Drop links below this confidence, in [0, 1].
    pub min_confidence: f64,
    /// Per-page link cap after filtering; <= 0 means unlimited.
    pub max_links_per_page: i64,
    /// Recognize biological accession identifiers.
    pub use_accession_recognition: bool,
    /// Retain links whose probe reported them inaccessible.
    pub keep_404s: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            validate_links: false,
            include_context: false,
            context_length: 100,
            filter_domains: Vec::new(),
            min_confidence: 0.0,
            max_links_per_page: 0,
            use_accession_recognition: true,
            keep_404s: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_link_kind_display_lowercase() {
        assert_eq!(LinkKind::Doi.to_string(), "doi");
        assert_eq!(LinkKind::Figshare.to_string(), "figshare");
        assert_eq!(LinkKind::Generic.to_string(), "generic");
    }

    #[test]
    fn test_extraction_options_default_no_filters() {
        let opts = ExtractionOptions::default();
        assert!(!opts.validate_links);
        assert!(opts.filter_domains.is_empty());
        assert_eq!(opts.min_confidence, 0.0);
        assert_eq!(opts.max_links_per_page, 0);
        assert!(opts.use_accession_recognition);
        assert!(!opts.keep_404s);
    }

    #[test]
    fn test_extracted_link_serializes_without_empty_optionals() {
        let link = ExtractedLink {
            url: "https://doi.org/10.1234/x".to_string(),
            kind: LinkKind::Doi,
            context: None,
            page: 1,
            section: None,
            confidence: 0.95,
            validation: None,
            dataset: None,
        };
        let json = serde_json::to_string(&link).unwrap();
        assert!(!json.contains("context"));
        assert!(!json.contains("validation"));
        assert!(json.contains("\"kind\":\"doi\""));
    }
}
