//! Raw identifier candidate production from cleaned text.
//!
//! Runs every catalog pattern over the input, collecting non-overlapping
//! matches per pattern, then applies the structural filters that keep the
//! false-positive rate down: generic URLs must have real scheme/host
//! structure, short bare alphanumerics are rejected, and every candidate
//! URL must survive cleaning and parse as well-formed.

use tracing::{debug, trace};
use url::Url;

use super::LinkKind;
use super::cleaner::clean_url;
use super::patterns::{Pattern, catalog};

/// Minimum length for a bare alphanumeric identifier with no dot or slash.
const MIN_BARE_IDENTIFIER_LEN: usize = 10;

/// A raw identifier candidate, prior to normalization and deduplication.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Exact matched text.
    pub text: String,
    /// Canonical fetchable form after the pattern's normalizer and URL cleanup.
    pub url: String,
    /// Assigned kind.
    pub kind: LinkKind,
    /// Byte offset of the match in the cleaned text.
    pub position: usize,
    /// Prior confidence from the matching pattern.
    pub confidence: f64,
    /// Name of the pattern that produced this candidate.
    pub pattern: &'static str,
}

/// Extracts all identifier candidates from cleaned text.
///
/// Matches within a single pattern never overlap (`find_iter` semantics);
/// overlapping matches from *different* patterns are all emitted and left
/// for deduplication to collapse.
#[must_use]
#[tracing::instrument(skip(text), fields(text_len = text.len()))]
pub fn extract_candidates(text: &str, use_accession_recognition: bool) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for pattern in catalog() {
        if pattern.accession && !use_accession_recognition {
            continue;
        }
        for m in pattern.regex.find_iter(text) {
            // Bare DOIs preceded by a letter, digit, or dot are version
            // numbers or IP-like fragments, not DOIs.
            if pattern.name == "doi_bare" && m.start() > 0 {
                let prev = text.as_bytes()[m.start() - 1];
                if prev.is_ascii_alphanumeric() || prev == b'.' {
                    continue;
                }
            }
            trace!(pattern = pattern.name, text = m.as_str(), "pattern match");
            if let Some(candidate) = build_candidate(pattern, m.as_str(), m.start()) {
                candidates.push(candidate);
            }
        }
    }

    debug!(count = candidates.len(), "candidates extracted");
    candidates
}

/// Builds a candidate from a raw match, or rejects it.
fn build_candidate(pattern: &Pattern, raw: &str, position: usize) -> Option<Candidate> {
    if !passes_structure_filters(pattern, raw) {
        trace!(pattern = pattern.name, raw, "candidate rejected by structure filter");
        return None;
    }

    let normalized = (pattern.normalize)(raw);
    let url = clean_url(&normalized);
    if !is_well_formed(&url) {
        trace!(pattern = pattern.name, url, "candidate rejected as malformed");
        return None;
    }

    Some(Candidate {
        text: raw.to_string(),
        url,
        kind: pattern.kind,
        position,
        confidence: pattern.confidence,
        pattern: pattern.name,
    })
}

fn passes_structure_filters(pattern: &Pattern, raw: &str) -> bool {
    // Generic URL catch-all: demand scheme and a dotted host, otherwise
    // stray "https://x" fragments from broken line wraps slip through.
    if pattern.name == "generic_https_url" {
        let Ok(parsed) = Url::parse(raw) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        if !host.contains('.') {
            return false;
        }
    }

    // Bare alphanumeric identifiers without a namespaced kind and with no
    // URL structure at all must be long enough to be meaningful.
    if pattern.kind == LinkKind::Generic
        && !raw.contains('.')
        && !raw.contains('/')
        && raw.len() < MIN_BARE_IDENTIFIER_LEN
    {
        return false;
    }

    true
}

/// A candidate URL is retained only when it parses and has a host
/// (or is an FTP URL, which `url` also parses).
fn is_well_formed(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| u.host_str().is_some())
}
