//! Recognizer catalog for dataset identifiers.
//!
//! Each [`Pattern`] carries a regular expression, the [`LinkKind`] it
//! produces, a prior confidence, and a normalizer that rewrites a raw match
//! into a canonical fetchable form. The catalog is ordered from most to
//! least specific; priors follow a fixed scale:
//!
//! - 0.95-1.00 specific canonical URLs (Zenodo DOIs, doi.org URLs)
//! - 0.85-0.94 database-specific patterns (accessions, figshare)
//! - 0.70-0.84 likely relevant, needs validation (dataset files, preprints)
//! - 0.50-0.69 generic (FTP)
//! - 0.30-0.49 catch-all (bare HTTPS URLs)
//!
//! Matching never mutates input. Overlapping matches from different
//! patterns are all emitted; deduplication happens downstream.

use std::sync::LazyLock;

use regex::Regex;

use super::LinkKind;

/// Compiles a regex at static init; panics on invalid pattern.
#[allow(clippy::expect_used)]
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// A single recognizer in the catalog.
pub struct Pattern {
    /// Stable pattern name used in logs and warnings.
    pub name: &'static str,
    /// Compiled recognizer grammar.
    pub regex: Regex,
    /// Kind assigned to matches of this pattern.
    pub kind: LinkKind,
    /// Prior confidence before corruption adjustment and validation.
    pub confidence: f64,
    /// Human-readable description.
    pub description: &'static str,
    /// Example strings this pattern matches.
    pub examples: &'static [&'static str],
    /// Rewrites a raw match into a canonical fetchable form.
    pub normalize: fn(&str) -> String,
    /// True for biological accession recognizers, which can be toggled off.
    pub accession: bool,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("confidence", &self.confidence)
            .finish_non_exhaustive()
    }
}

/// The ordered recognizer catalog.
///
/// Ordering is most-specific first; the final entry is the lowest-prior
/// HTTPS catch-all.
pub static CATALOG: LazyLock<Vec<Pattern>> = LazyLock::new(build_catalog);

/// Returns the ordered recognizer catalog.
#[must_use]
pub fn catalog() -> &'static [Pattern] {
    &CATALOG
}

fn passthrough(raw: &str) -> String {
    raw.to_string()
}

fn ensure_https(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") || raw.starts_with("ftp://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

fn normalize_doi_match(raw: &str) -> String {
    let mut doi = raw.trim();
    for prefix in &[
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
    ] {
        if let Some(stripped) = doi.strip_prefix(prefix) {
            doi = stripped;
            break;
        }
    }
    if doi.len() >= 4 && doi[..4].eq_ignore_ascii_case("doi:") {
        doi = doi[4..].trim_start();
    }
    format!("https://doi.org/{doi}")
}

fn normalize_zenodo_doi(raw: &str) -> String {
    // 10.5281/zenodo.NNN resolves canonically to the record URL.
    static RECORD_ID: LazyLock<Regex> =
        LazyLock::new(|| compile_static_regex(r"zenodo\.(\d+)"));
    RECORD_ID
        .captures(raw)
        .map_or_else(|| normalize_doi_match(raw), |c| {
            format!("https://zenodo.org/record/{}", &c[1])
        })
}

fn normalize_zenodo_url(raw: &str) -> String {
    static RECORD_ID: LazyLock<Regex> =
        LazyLock::new(|| compile_static_regex(r"records?/(\d+)"));
    RECORD_ID
        .captures(raw)
        .map_or_else(|| ensure_https(raw), |c| {
            format!("https://zenodo.org/record/{}", &c[1])
        })
}

fn normalize_geo(raw: &str) -> String {
    format!(
        "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?acc={}",
        raw.trim().to_ascii_uppercase()
    )
}

fn normalize_sra(raw: &str) -> String {
    format!(
        "https://www.ncbi.nlm.nih.gov/sra/{}",
        raw.trim().to_ascii_uppercase()
    )
}

fn normalize_bioproject(raw: &str) -> String {
    format!(
        "https://www.ncbi.nlm.nih.gov/bioproject/{}",
        raw.trim().to_ascii_uppercase()
    )
}

fn normalize_biosample(raw: &str) -> String {
    format!(
        "https://www.ncbi.nlm.nih.gov/biosample/{}",
        raw.trim().to_ascii_uppercase()
    )
}

#[allow(clippy::too_many_lines)]
fn build_catalog() -> Vec<Pattern> {
    vec![
        Pattern {
            name: "zenodo_doi",
            regex: compile_static_regex(
                r"(?:https?://(?:dx\.)?doi\.org/)?10\.5281/zenodo\.\d+",
            ),
            kind: LinkKind::Zenodo,
            confidence: 0.97,
            description: "Zenodo DOI resolving to a record URL",
            examples: &["10.5281/zenodo.1234567", "https://doi.org/10.5281/zenodo.55555"],
            normalize: normalize_zenodo_doi,
            accession: false,
        },
        Pattern {
            name: "zenodo_url",
            regex: compile_static_regex(
                r"(?:https?://)?(?:www\.)?zenodo\.org/records?/\d+[^\s<>)\]]*",
            ),
            kind: LinkKind::Zenodo,
            confidence: 0.95,
            description: "Zenodo record URL",
            examples: &["https://zenodo.org/record/1234567"],
            normalize: normalize_zenodo_url,
            accession: false,
        },
        Pattern {
            name: "doi_url",
            regex: compile_static_regex(
                r#"https?://(?:dx\.)?doi\.org/10\.\d{4,9}(?:\.\d+)*/[^\s<>"'\]]+"#,
            ),
            kind: LinkKind::Doi,
            confidence: 0.95,
            description: "DOI resolver URL",
            examples: &["https://doi.org/10.1038/s41467-021-23778-6"],
            normalize: normalize_doi_match,
            accession: false,
        },
        Pattern {
            name: "doi_prefixed",
            regex: compile_static_regex(r#"(?i)doi:\s*10\.\d{4,9}(?:\.\d+)*/[^\s<>"'\]]+"#),
            kind: LinkKind::Doi,
            confidence: 0.93,
            description: "DOI with an explicit doi: prefix",
            examples: &["doi:10.1016/j.cell.2024.01.001"],
            normalize: normalize_doi_match,
            accession: false,
        },
        Pattern {
            name: "doi_bare",
            regex: compile_static_regex(r#"10\.\d{4,9}(?:\.\d+)*/[^\s<>"'\]]+"#),
            kind: LinkKind::Doi,
            confidence: 0.85,
            description: "Bare DOI without prefix or resolver URL",
            examples: &["10.1038/s41467-021-23778-6", "10.1000.10/example"],
            normalize: normalize_doi_match,
            accession: false,
        },
        Pattern {
            name: "figshare_share_link",
            regex: compile_static_regex(
                r"(?:https?://)?(?:www\.)?figshare\.com/s/[A-Za-z0-9]+[^\s<>)\]]*",
            ),
            kind: LinkKind::Figshare,
            confidence: 0.92,
            description: "Figshare shared link requiring resolution",
            examples: &["https://figshare.com/s/865e694ad06d5857db4b"],
            normalize: ensure_https,
            accession: false,
        },
        Pattern {
            name: "figshare_article",
            regex: compile_static_regex(
                r"(?:https?://)?(?:www\.)?figshare\.com/articles/[^\s<>)\]]+",
            ),
            kind: LinkKind::Figshare,
            confidence: 0.90,
            description: "Figshare article URL",
            examples: &["https://figshare.com/articles/dataset/title/5435866"],
            normalize: ensure_https,
            accession: false,
        },
        Pattern {
            name: "figshare_collection",
            regex: compile_static_regex(
                r"(?:https?://)?(?:www\.)?figshare\.com/(?:collections|projects)/[^\s<>)\]]+",
            ),
            kind: LinkKind::Figshare,
            confidence: 0.89,
            description: "Figshare collection or project URL",
            examples: &["https://figshare.com/collections/name/123456"],
            normalize: ensure_https,
            accession: false,
        },
        Pattern {
            name: "geo_accession",
            regex: compile_static_regex(r"\bG(?:SE|SM|PL|DS)\d{3,}\b"),
            kind: LinkKind::Geo,
            confidence: 0.90,
            description: "Gene Expression Omnibus accession",
            examples: &["GSE123456", "GSM1234567", "GPL570", "GDS5027"],
            normalize: normalize_geo,
            accession: true,
        },
        Pattern {
            name: "sra_run",
            regex: compile_static_regex(r"\b(?:SRR|ERR|DRR)\d{5,}\b"),
            kind: LinkKind::Generic,
            confidence: 0.90,
            description: "Sequence archive run accession",
            examples: &["SRR1234567", "ERR987654"],
            normalize: normalize_sra,
            accession: true,
        },
        Pattern {
            name: "sra_experiment",
            regex: compile_static_regex(r"\b(?:SRX|ERX|DRX|SRS|ERS|DRS|SRP|ERP|DRP)\d{5,}\b"),
            kind: LinkKind::Generic,
            confidence: 0.88,
            description: "Sequence archive experiment, sample, or study accession",
            examples: &["SRX123456", "SRP098765"],
            normalize: normalize_sra,
            accession: true,
        },
        Pattern {
            name: "bioproject",
            regex: compile_static_regex(r"\bPRJ(?:NA|EB|DB)\d+\b"),
            kind: LinkKind::Generic,
            confidence: 0.90,
            description: "BioProject accession",
            examples: &["PRJNA654321", "PRJEB12345"],
            normalize: normalize_bioproject,
            accession: true,
        },
        Pattern {
            name: "biosample",
            regex: compile_static_regex(r"\bSAM(?:N|EA|E|D)\d+\b"),
            kind: LinkKind::Generic,
            confidence: 0.88,
            description: "BioSample accession",
            examples: &["SAMN12345678", "SAMEA7654321"],
            normalize: normalize_biosample,
            accession: true,
        },
        Pattern {
            name: "dataset_file_url",
            regex: compile_static_regex(
                r#"https?://[^\s<>"'\]]+\.(?:csv|tsv|xlsx?|json|xml|zip|tar\.gz|tgz|gz|h5|hdf5|rds|rdata|parquet|fastq|fasta|bam|vcf)\b"#,
            ),
            kind: LinkKind::Url,
            confidence: 0.78,
            description: "Direct URL to a dataset-like file",
            examples: &["https://example.org/data/matrix.csv"],
            normalize: passthrough,
            accession: false,
        },
        Pattern {
            name: "preprint_url",
            regex: compile_static_regex(
                r#"https?://(?:www\.)?(?:biorxiv\.org|medrxiv\.org|arxiv\.org)/[^\s<>"'\]]+"#,
            ),
            kind: LinkKind::Url,
            confidence: 0.72,
            description: "Preprint server URL",
            examples: &["https://arxiv.org/abs/2101.00001"],
            normalize: passthrough,
            accession: false,
        },
        Pattern {
            name: "ftp_url",
            regex: compile_static_regex(r#"ftp://[^\s<>"'\]]+"#),
            kind: LinkKind::Url,
            confidence: 0.60,
            description: "FTP URL",
            examples: &["ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE1nnn/GSE1000/"],
            normalize: passthrough,
            accession: false,
        },
        Pattern {
            name: "generic_https_url",
            regex: compile_static_regex(r#"https?://[^\s<>"'\]]+"#),
            kind: LinkKind::Url,
            confidence: 0.40,
            description: "Last-resort HTTP(S) URL catch-all",
            examples: &["https://example.com/some/page"],
            normalize: passthrough,
            accession: false,
        },
    ]
}
