//! Canonical keys, corruption-aware confidence adjustment, quality
//! scoring, and figshare URL reconstruction.
//!
//! PDF text extraction corrupts identifiers in recognizable ways: page
//! furniture glued onto DOI tails, pipe characters from table borders,
//! version suffixes split off figshare URLs. This module reconstructs the
//! underlying identifier semantically: [`canonical_key`] maps every
//! corruption variant of the same identifier to one key so deduplication
//! can collapse them, [`adjust_for_corruption`] caps the confidence of
//! matches showing corruption markers, and [`quality_score`] ranks the
//! variants inside a duplicate group so the cleanest one wins.

use std::sync::LazyLock;

use regex::Regex;

use super::LinkKind;
use super::cleaner::clean_url;
use super::patterns::compile_static_regex;

/// Corruption markers that terminate a DOI suffix when text from the
/// surrounding page got glued onto it.
const DOI_CORRUPTION_MARKERS: [&str; 4] = ["|", "article", "nature", "supplementary"];

/// Two-digit tails produced when a trailing page digit is appended to a
/// DOI check digit. Only stripped when preceded by a non-numeric character.
const DOI_CORRUPTION_DIGITS: [&str; 4] = ["62", "64", "66", "68"];

static GEO_ACCESSION: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"G(?:SE|SM|PL|DS)\d+"));

static ZENODO_RECORD: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"zenodo\.org/records?/(\d+)"));

static FIGSHARE_SHARE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"figshare\.com/s/([A-Za-z0-9]+)"));

static VALID_DOI: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^10\.\d{4,9}(?:\.\d+)*/\S+$"));

static TRAILING_DIGIT_CLUSTER: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"\d{4,}$"));

static VERSION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"\.v\d+$|\.\d+\.\d+[A-Z][A-Za-z]*$"));

// ==================== Canonical keys ====================

/// Produces the canonical grouping key for a link.
///
/// The key is idempotent: applying this function to an already canonical
/// form returns the same key. Keys are namespaced by kind (`doi:`, `geo:`,
/// `zenodo:`, `figshare:`, `url:`) so unrelated identifiers never collide.
#[must_use]
pub fn canonical_key(url: &str, kind: LinkKind) -> String {
    match kind {
        LinkKind::Doi => canonical_doi_key(url),
        LinkKind::Geo => canonical_geo_key(url),
        LinkKind::Zenodo => canonical_zenodo_key(url),
        LinkKind::Figshare => canonical_figshare_key(url),
        LinkKind::Url | LinkKind::Generic => canonical_url_key(url),
    }
}

fn canonical_doi_key(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    let mut doi = lower.as_str();

    for prefix in &[
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ] {
        if let Some(stripped) = doi.strip_prefix(prefix) {
            doi = stripped.trim_start();
            break;
        }
    }

    // Percent-encoded suffixes appear in DOI URLs copied out of HTML.
    let decoded = match urlencoding::decode(doi) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => doi.to_string(),
    };
    let mut doi = decoded.as_str();

    // Anchor at the registrant prefix; anything before it is noise.
    if let Some(anchor) = doi.find("10.") {
        doi = &doi[anchor..];
    }

    let truncated = truncate_at_corruption_markers(doi);
    let cleaned = clean_url(&truncated);
    let stripped = strip_corruption_digits(&cleaned);

    // Zenodo DOIs are the same identifier as the record URL; share the
    // key so the two classifications deduplicate together.
    if let Some(record) = stripped.strip_prefix("10.5281/zenodo.") {
        if !record.is_empty() && record.chars().all(|c| c.is_ascii_digit()) {
            return format!("zenodo:zenodo.org/record/{record}");
        }
    }

    format!("doi:{stripped}")
}

/// Truncates the DOI at a corruption marker found inside its suffix.
///
/// The marker search starts one character into the suffix so genuine DOIs
/// whose suffix begins with a marker word (`10.1038/nature12373`) are
/// left intact.
fn truncate_at_corruption_markers(doi: &str) -> String {
    let Some(slash) = doi.find('/') else {
        return doi.to_string();
    };
    let suffix_start = slash + 1;
    if suffix_start >= doi.len() {
        return doi.to_string();
    }

    let mut cut = doi.len();
    for marker in DOI_CORRUPTION_MARKERS {
        // `|` is corruption wherever it appears; word markers only count
        // past the first suffix character.
        let search_from = if marker == "|" { 0 } else { suffix_start + 1 };
        if search_from >= doi.len() {
            continue;
        }
        if let Some(pos) = doi[search_from..].find(marker) {
            cut = cut.min(search_from + pos);
        }
    }
    doi[..cut].to_string()
}

/// Strips a trailing appended page digit from known two-digit corruption
/// tails, but only when the character before the tail is non-numeric
/// (a genuine `...362` ending stays untouched).
fn strip_corruption_digits(doi: &str) -> String {
    for tail in DOI_CORRUPTION_DIGITS {
        if let Some(head) = doi.strip_suffix(tail) {
            let preceded_by_digit = head
                .chars()
                .last()
                .is_some_and(|c| c.is_ascii_digit());
            if !preceded_by_digit {
                // The first digit of the tail is the genuine check digit;
                // the second was appended by the corruption.
                return format!("{head}{}", &tail[..1]);
            }
        }
    }
    doi.to_string()
}

fn canonical_geo_key(url: &str) -> String {
    let upper = url.to_ascii_uppercase();
    let accession = GEO_ACCESSION
        .find(&upper)
        .map_or_else(|| upper.clone(), |m| m.as_str().to_string());
    format!("geo:{accession}")
}

fn canonical_zenodo_key(url: &str) -> String {
    let stripped = strip_scheme_and_www(url);
    ZENODO_RECORD.captures(&stripped).map_or_else(
        || format!("zenodo:{stripped}"),
        |c| format!("zenodo:zenodo.org/record/{}", &c[1]),
    )
}

fn canonical_figshare_key(url: &str) -> String {
    let stripped = strip_scheme_and_www(url);

    if let Some(c) = FIGSHARE_SHARE.captures(&stripped) {
        // Shared links keep only the hash; version suffixes are cut.
        let hash = &c[1];
        return format!("figshare:figshare.com/s/{hash}");
    }

    if let Some(pos) = stripped.find("articles/") {
        // Keep articles/<type>/<title>/<id> and drop anything deeper.
        let segments: Vec<&str> = stripped[pos..]
            .trim_end_matches('/')
            .split('/')
            .take(4)
            .collect();
        return format!("figshare:figshare.com/{}", segments.join("/"));
    }

    format!("figshare:{stripped}")
}

fn canonical_url_key(url: &str) -> String {
    let stripped = strip_scheme_and_www(url);

    // The catch-all URL pattern also matches identifiers with richer
    // canonical forms; delegate so both classifications share one key.
    if stripped.starts_with("doi.org/") || stripped.starts_with("dx.doi.org/") {
        return canonical_doi_key(url);
    }
    if stripped.contains("zenodo.org/record") {
        return canonical_zenodo_key(url);
    }
    if stripped.starts_with("figshare.com/") {
        return canonical_figshare_key(url);
    }

    let without_query = stripped
        .split_once('?')
        .map_or(stripped.as_str(), |(head, _)| head);
    let without_fragment = without_query
        .split_once('#')
        .map_or(without_query, |(head, _)| head);
    format!("url:{}", without_fragment.trim_end_matches('/'))
}

fn strip_scheme_and_www(url: &str) -> String {
    let mut s = url.trim();
    for prefix in &["https://", "http://", "ftp://"] {
        if let Some(stripped) = s.strip_prefix(prefix) {
            s = stripped;
            break;
        }
    }
    s = s.strip_prefix("www.").unwrap_or(s);
    s.to_string()
}

// ==================== Corruption adjustment ====================

/// Applies corruption-marker confidence caps to a link.
///
/// The returned confidence is never greater than the input; each triggered
/// marker caps the value at its ceiling.
#[must_use]
pub fn adjust_for_corruption(url: &str, kind: LinkKind, confidence: f64) -> f64 {
    let lower = url.to_ascii_lowercase();
    let mut adjusted = confidence;

    if lower.contains('|') {
        adjusted = adjusted.min(0.10);
    }
    if kind == LinkKind::Doi && lower.contains("article") {
        adjusted = adjusted.min(0.15);
    }
    if contains_nature_outside_domain(&lower) {
        adjusted = adjusted.min(0.15);
    }
    if lower.contains("supplementary") {
        adjusted = adjusted.min(0.20);
    }
    if kind == LinkKind::Doi && has_corruption_digit_tail(&lower) {
        adjusted = adjusted.min(0.10);
    }

    adjusted
}

/// True when `nature` appears anywhere except as part of `nature.com`.
fn contains_nature_outside_domain(lower: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = lower[from..].find("nature") {
        let at = from + pos;
        if !lower[at..].starts_with("nature.com") {
            return true;
        }
        from = at + "nature".len();
    }
    false
}

/// True when the DOI ends in `-` followed by one of the known appended
/// page-digit tails.
fn has_corruption_digit_tail(lower: &str) -> bool {
    DOI_CORRUPTION_DIGITS
        .iter()
        .any(|tail| lower.ends_with(&format!("-{tail}")))
}

// ==================== Quality score ====================

/// Computes the deduplication tie-break score for a link variant.
///
/// This score is internal to deduplication and distinct from the
/// user-visible confidence: it rewards clean structure and penalizes the
/// fingerprints of glued page text.
#[must_use]
pub fn quality_score(url: &str, kind: LinkKind, confidence: f64) -> f64 {
    let mut score = confidence;

    if url.len() > 300 {
        score -= (url.len() - 300) as f64 / 1000.0;
    }
    if url.starts_with("https://") {
        score += 0.1;
    }
    if url.contains('|') {
        score -= 0.3;
    }

    if kind == LinkKind::Doi {
        let doi_part = canonical_doi_key(url);
        let bare = doi_part.trim_start_matches("doi:");
        if VALID_DOI.is_match(bare) {
            score += 0.2;
        }
        if TRAILING_DIGIT_CLUSTER.is_match(url) {
            score -= 0.15;
        }
    }
    if url.contains("arxiv.org/abs/") {
        score += 0.2;
    }

    score
}

// ==================== Figshare URL reconstruction ====================

/// Repairs figshare URLs fragmented by PDF line wrapping.
///
/// Figshare article IDs frequently end up separated from their URL by the
/// PDF converter. Given the partial URL and a widened text window around
/// its occurrence, this attempts, in order:
///
/// 1. Re-attach a 6-8 digit ID found after the URL across whitespace.
/// 2. Re-attach such an ID found after a punctuation separator.
/// 3. Strip version suffixes (`.v<n>`, `.<n>.<m><CapitalSuffix>`).
/// 4. Return the URL unchanged when its structural skeleton is complete.
#[must_use]
pub fn reconstruct_figshare_url(url: &str, context: &str) -> String {
    if !url.contains("figshare.com") {
        return url.to_string();
    }

    // Already carries an ID segment: only version cleanup applies.
    if ends_with_numeric_id(url) {
        return strip_version_suffix(url);
    }

    if let Some(id) = id_after_url(url, context, &ID_AFTER_WHITESPACE) {
        return attach_id(url, &id);
    }
    if let Some(id) = id_after_url(url, context, &ID_AFTER_PUNCTUATION) {
        return attach_id(url, &id);
    }

    strip_version_suffix(url)
}

static ID_AFTER_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^\s+(\d{6,8})\b"));

static ID_AFTER_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^\s*[[:punct:]]\s*(\d{6,8})\b"));

fn ends_with_numeric_id(url: &str) -> bool {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .is_some_and(|seg| seg.len() >= 6 && seg.chars().all(|c| c.is_ascii_digit()))
}

/// Finds an article ID right after the URL's occurrence in the context
/// window, using `separator` anchored at the position past the URL.
fn id_after_url(url: &str, context: &str, separator: &Regex) -> Option<String> {
    let pos = context.find(url)?;
    let after = &context[pos + url.len()..];
    separator.captures(after).map(|c| c[1].to_string())
}

fn attach_id(url: &str, id: &str) -> String {
    format!("{}/{id}", url.trim_end_matches('/'))
}

fn strip_version_suffix(url: &str) -> String {
    VERSION_SUFFIX.replace(url, "").to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== DOI Canonical Key Tests ====================

    #[test]
    fn test_doi_key_clean() {
        assert_eq!(
            canonical_key("https://doi.org/10.1038/s41467-021-23778-6", LinkKind::Doi),
            "doi:10.1038/s41467-021-23778-6"
        );
    }

    #[test]
    fn test_doi_key_pipe_corruption_collapses() {
        assert_eq!(
            canonical_key(
                "https://doi.org/10.1038/s41467-021-23778-6|www.nature.com/",
                LinkKind::Doi
            ),
            "doi:10.1038/s41467-021-23778-6"
        );
    }

    #[test]
    fn test_doi_key_article_corruption_collapses() {
        assert_eq!(
            canonical_key(
                "https://doi.org/10.1038/s41467-021-23778-6ARTICLE",
                LinkKind::Doi
            ),
            "doi:10.1038/s41467-021-23778-6"
        );
    }

    #[test]
    fn test_doi_key_appended_digit_collapses() {
        assert_eq!(
            canonical_key("https://doi.org/10.1038/s41467-021-23778-62", LinkKind::Doi),
            "doi:10.1038/s41467-021-23778-6"
        );
        assert_eq!(
            canonical_key("https://doi.org/10.1038/s41467-021-23778-64", LinkKind::Doi),
            "doi:10.1038/s41467-021-23778-6"
        );
    }

    #[test]
    fn test_doi_key_numeric_ending_preserved() {
        // A genuine ...362 ending is preceded by a digit and stays intact.
        assert_eq!(
            canonical_key("10.1234/abc12362", LinkKind::Doi),
            "doi:10.1234/abc12362"
        );
    }

    #[test]
    fn test_doi_key_nature_registrant_suffix_preserved() {
        // Marker words at the start of the suffix are genuine.
        assert_eq!(
            canonical_key("10.1038/nature12373", LinkKind::Doi),
            "doi:10.1038/nature12373"
        );
    }

    #[test]
    fn test_doi_key_doi_prefix_and_case() {
        assert_eq!(
            canonical_key("DOI:10.1234/ABC", LinkKind::Doi),
            "doi:10.1234/abc"
        );
    }

    #[test]
    fn test_zenodo_doi_and_record_url_share_a_key() {
        assert_eq!(
            canonical_key("10.5281/zenodo.1234567", LinkKind::Doi),
            canonical_key("https://zenodo.org/record/1234567", LinkKind::Zenodo),
        );
    }

    #[test]
    fn test_doi_key_percent_decoded() {
        assert_eq!(
            canonical_key("https://doi.org/10.1002%2F(sici)1097-4636", LinkKind::Doi),
            "doi:10.1002/(sici)1097-4636"
        );
    }

    #[test]
    fn test_doi_key_idempotent() {
        let once = canonical_key("https://doi.org/10.1038/s41467-021-23778-62", LinkKind::Doi);
        let twice = canonical_key(&once, LinkKind::Doi);
        assert_eq!(once, twice);
    }

    // ==================== Other Kind Key Tests ====================

    #[test]
    fn test_geo_key_from_accession_url() {
        assert_eq!(
            canonical_key(
                "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?acc=GSE123456",
                LinkKind::Geo
            ),
            "geo:GSE123456"
        );
    }

    #[test]
    fn test_geo_key_stops_at_first_non_digit() {
        assert_eq!(canonical_key("gse123456suppl", LinkKind::Geo), "geo:GSE123456");
    }

    #[test]
    fn test_zenodo_key_record_url() {
        assert_eq!(
            canonical_key("https://www.zenodo.org/records/1234567", LinkKind::Zenodo),
            "zenodo:zenodo.org/record/1234567"
        );
    }

    #[test]
    fn test_figshare_key_share_link_version_cut() {
        assert_eq!(
            canonical_key("https://figshare.com/s/865e694ad06d", LinkKind::Figshare),
            "figshare:figshare.com/s/865e694ad06d"
        );
    }

    #[test]
    fn test_figshare_key_article_first_four_segments() {
        assert_eq!(
            canonical_key(
                "https://www.figshare.com/articles/dataset/my_title/5435866/2",
                LinkKind::Figshare
            ),
            "figshare:figshare.com/articles/dataset/my_title/5435866"
        );
    }

    #[test]
    fn test_url_key_delegates_known_hosts() {
        // A doi.org URL caught by the catch-all pattern groups with its
        // DOI-classified twin, corruption and all.
        assert_eq!(
            canonical_key("https://doi.org/10.1038/s41467-021-23778-62", LinkKind::Url),
            canonical_key("https://doi.org/10.1038/s41467-021-23778-6", LinkKind::Doi),
        );
        assert_eq!(
            canonical_key("https://www.zenodo.org/record/77", LinkKind::Url),
            canonical_key("https://zenodo.org/record/77", LinkKind::Zenodo),
        );
    }

    #[test]
    fn test_url_key_strips_query_and_fragment() {
        assert_eq!(
            canonical_key("https://www.example.com/data?x=1#frag", LinkKind::Url),
            "url:example.com/data"
        );
    }

    #[test]
    fn test_url_key_idempotent() {
        let once = canonical_key("https://www.example.com/data?x=1", LinkKind::Url);
        let stripped = once.trim_start_matches("url:");
        assert_eq!(canonical_key(stripped, LinkKind::Url), once);
    }

    // ==================== Corruption Adjustment Tests ====================

    #[test]
    fn test_adjust_pipe_caps_at_010() {
        let c = adjust_for_corruption("https://doi.org/10.1/x|y", LinkKind::Doi, 0.95);
        assert!((c - 0.10).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adjust_article_caps_at_015() {
        let c = adjust_for_corruption(
            "https://doi.org/10.1038/s41467-021-23778-6ARTICLE",
            LinkKind::Doi,
            0.95,
        );
        assert!((c - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adjust_nature_com_not_capped() {
        let c = adjust_for_corruption("https://www.nature.com/articles/x", LinkKind::Url, 0.7);
        assert!((c - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adjust_nature_outside_domain_capped() {
        let c = adjust_for_corruption(
            "https://doi.org/10.1038/s41467-6nature",
            LinkKind::Doi,
            0.95,
        );
        assert!((c - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adjust_supplementary_caps_at_020() {
        let c = adjust_for_corruption(
            "https://example.com/supplementary/data",
            LinkKind::Url,
            0.8,
        );
        assert!((c - 0.20).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adjust_digit_tail_caps_at_010() {
        let c = adjust_for_corruption(
            "https://doi.org/10.1038/s41467-021-23778-62",
            LinkKind::Doi,
            0.95,
        );
        assert!((c - 0.10).abs() < f64::EPSILON);
    }

    #[test]
    fn test_adjust_never_increases() {
        let urls = [
            "https://doi.org/10.1/x|y",
            "https://example.com/clean",
            "https://doi.org/10.1038/s41467-021-23778-62",
        ];
        for url in urls {
            for conf in [0.05, 0.5, 0.95] {
                let adjusted = adjust_for_corruption(url, LinkKind::Doi, conf);
                assert!(adjusted <= conf, "{url} raised {conf} to {adjusted}");
            }
        }
    }

    // ==================== Quality Score Tests ====================

    #[test]
    fn test_quality_clean_doi_beats_corrupted() {
        let clean = quality_score(
            "https://doi.org/10.1038/s41467-021-23778-6",
            LinkKind::Doi,
            0.95,
        );
        let piped = quality_score(
            "https://doi.org/10.1038/s41467-021-23778-6|www.nature.com/",
            LinkKind::Doi,
            0.10,
        );
        assert!(clean > piped);
    }

    #[test]
    fn test_quality_https_bonus() {
        let https = quality_score("https://example.com/d", LinkKind::Url, 0.5);
        let http = quality_score("http://example.com/d", LinkKind::Url, 0.5);
        assert!(https > http);
    }

    #[test]
    fn test_quality_long_url_penalized() {
        let long_url = format!("https://example.com/{}", "a".repeat(400));
        let short = quality_score("https://example.com/a", LinkKind::Url, 0.5);
        let long = quality_score(&long_url, LinkKind::Url, 0.5);
        assert!(short > long);
    }

    #[test]
    fn test_quality_arxiv_abs_bonus() {
        let abs = quality_score("https://arxiv.org/abs/2101.00001", LinkKind::Url, 0.7);
        let pdf = quality_score("https://arxiv.org/pdf/2101.00001", LinkKind::Url, 0.7);
        assert!(abs > pdf);
    }

    // ==================== Reconstruction Tests ====================

    #[test]
    fn test_reconstruct_attaches_id_across_whitespace() {
        let url = "https://figshare.com/articles/dataset/my_title";
        let context = "available https://figshare.com/articles/dataset/my_title 5435866 (2021)";
        assert_eq!(
            reconstruct_figshare_url(url, context),
            "https://figshare.com/articles/dataset/my_title/5435866"
        );
    }

    #[test]
    fn test_reconstruct_attaches_id_after_punctuation() {
        let url = "https://figshare.com/articles/dataset/my_title";
        let context = "https://figshare.com/articles/dataset/my_title, 5435866 in text";
        assert_eq!(
            reconstruct_figshare_url(url, context),
            "https://figshare.com/articles/dataset/my_title/5435866"
        );
    }

    #[test]
    fn test_reconstruct_strips_version_suffix() {
        let url = "https://figshare.com/articles/dataset/my_title.v2";
        assert_eq!(
            reconstruct_figshare_url(url, url),
            "https://figshare.com/articles/dataset/my_title"
        );
    }

    #[test]
    fn test_reconstruct_complete_url_unchanged() {
        let url = "https://figshare.com/articles/dataset/my_title/5435866";
        assert_eq!(reconstruct_figshare_url(url, url), url.to_string());
    }

    #[test]
    fn test_reconstruct_non_figshare_unchanged() {
        let url = "https://example.com/page";
        assert_eq!(reconstruct_figshare_url(url, "ctx"), url.to_string());
    }
}
