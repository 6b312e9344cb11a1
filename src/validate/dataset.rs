//! Dataset-likelihood heuristic for probed URLs.
//!
//! Classifies a probe response by how likely the target is an actual
//! dataset rather than a landing page, using additive signals from the
//! content type, the URL shape, the hosting domain, the disposition
//! header, and the payload size. The score is clamped to [0, 1].

const MIB: u64 = 1024 * 1024;

/// Hosts recognized as data repositories.
const DATA_REPOSITORY_DOMAINS: [&str; 10] = [
    "zenodo.org",
    "figshare.com",
    "datadryad.org",
    "osf.io",
    "dataverse.org",
    "ncbi.nlm.nih.gov",
    "ebi.ac.uk",
    "pangaea.de",
    "kaggle.com",
    "data.mendeley.com",
];

/// URL path fragments that signal a download endpoint or data file.
const DOWNLOAD_PATH_HINTS: [&str; 8] = [
    "/download",
    "/files/",
    "/ndownloader/",
    ".csv",
    ".tsv",
    ".zip",
    ".tar",
    ".xlsx",
];

/// Signals gathered from a probe response.
#[derive(Debug, Default)]
pub struct DatasetSignals<'a> {
    /// Final URL after redirects.
    pub url: &'a str,
    /// Content-Type header value, when present.
    pub content_type: Option<&'a str>,
    /// Content-Length in bytes, when present.
    pub content_length: Option<u64>,
    /// Content-Disposition header value, when present.
    pub content_disposition: Option<&'a str>,
}

/// Computes the dataset-likelihood score in [0, 1].
#[must_use]
pub fn dataset_score(signals: &DatasetSignals<'_>) -> f64 {
    let mut score = 0.0;

    if let Some(content_type) = signals.content_type {
        score += content_type_score(content_type);
    }

    let url_lower = signals.url.to_ascii_lowercase();
    for hint in DOWNLOAD_PATH_HINTS {
        if url_lower.contains(hint) {
            score += 0.2;
        }
    }

    if DATA_REPOSITORY_DOMAINS
        .iter()
        .any(|domain| url_lower.contains(domain))
    {
        score += 0.4;
    }

    if signals
        .content_disposition
        .is_some_and(|d| d.to_ascii_lowercase().contains("attachment"))
    {
        score += 0.3;
    }

    if let Some(length) = signals.content_length {
        if length > 100 * MIB {
            score += 0.3;
        } else if length > 10 * MIB {
            score += 0.2;
        } else if length > MIB {
            score += 0.1;
        }
    }

    score.clamp(0.0, 1.0)
}

/// Returns true when the score crosses the dataset threshold.
#[must_use]
pub fn is_dataset(score: f64) -> bool {
    score >= 0.5
}

fn content_type_score(content_type: &str) -> f64 {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("csv") {
        0.9
    } else if ct.contains("spreadsheet") || ct.contains("ms-excel") {
        0.8
    } else if ct.contains("zip") || ct.contains("tar") {
        0.8
    } else if ct.contains("gzip") || ct.contains("x-gtar") {
        0.7
    } else if ct.contains("json") {
        0.7
    } else if ct.contains("xml") {
        0.6
    } else if ct.contains("octet-stream") {
        0.5
    } else if ct.contains("html") {
        0.3
    } else {
        0.0
    }
}
