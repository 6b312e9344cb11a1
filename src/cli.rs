//! CLI argument definitions using clap derive macros.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hapiq::download::DEFAULT_MAX_CONCURRENT;
use hapiq::{DownloadOptions, ExtractionOptions};

/// Extract, validate, and download dataset references from papers.
///
/// hapiq turns PDF-extracted text into a deduplicated set of dataset
/// references and can materialize the referenced datasets with full
/// provenance manifests.
#[derive(Parser, Debug)]
#[command(name = "hapiq")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract dataset references from text files
    Extract(ExtractArgs),
    /// Download a dataset by identifier
    Download(DownloadArgs),
    /// Validate an identifier against the registered sources
    Validate(IdArgs),
    /// Detect which source handles an identifier
    Detect(IdArgs),
}

#[derive(clap::Args, Debug)]
pub struct ExtractArgs {
    /// Input text files (PDF text conversions)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Probe extracted links over HTTP
    #[arg(long)]
    pub validate: bool,

    /// Capture a context window around each link
    #[arg(long)]
    pub context: bool,

    /// Context window width in characters
    #[arg(long, default_value_t = 100)]
    pub context_length: usize,

    /// Keep only links whose URL contains one of these host substrings
    #[arg(long = "filter-domain")]
    pub filter_domains: Vec<String>,

    /// Drop links below this confidence (0.0 - 1.0)
    #[arg(long, default_value_t = 0.0)]
    pub min_confidence: f64,

    /// Per-page link cap after filtering (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_links_per_page: i64,

    /// Disable biological accession recognition
    #[arg(long)]
    pub no_accessions: bool,

    /// Keep links whose probe reported them inaccessible
    #[arg(long)]
    pub keep_404s: bool,

    /// Write the JSON results to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ExtractArgs {
    /// Maps the CLI flags onto extraction options.
    #[must_use]
    pub fn to_options(&self) -> ExtractionOptions {
        ExtractionOptions {
            validate_links: self.validate,
            include_context: self.context,
            context_length: self.context_length,
            filter_domains: self.filter_domains.clone(),
            min_confidence: self.min_confidence.clamp(0.0, 1.0),
            max_links_per_page: self.max_links_per_page,
            use_accession_recognition: !self.no_accessions,
            keep_404s: self.keep_404s,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Dataset identifier (accession, article ID, DOI, or URL)
    pub id: String,

    /// Target directory for the dataset
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Source type (skips auto-detection)
    #[arg(short, long)]
    pub source: Option<String>,

    /// Concurrent file transfers (1-16)
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT as u8, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub max_concurrent: u8,

    /// Never prompt; apply non-interactive conflict defaults
    #[arg(long)]
    pub non_interactive: bool,

    /// Skip files that already exist
    #[arg(long)]
    pub skip_existing: bool,

    /// Resume partially transferred files
    #[arg(long)]
    pub resume: bool,

    /// Skip files the source marks as supplementary
    #[arg(long)]
    pub exclude_supplementary: bool,

    /// Include raw-format files (per-sample archives for series)
    #[arg(long)]
    pub include_raw: bool,

    /// File filter as kind=parameter (extension, contains, excludes,
    /// mimetype, max_size, min_size); repeatable
    #[arg(long = "filter", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,
}

impl DownloadArgs {
    /// Maps the CLI flags onto download options.
    #[must_use]
    pub fn to_options(&self) -> DownloadOptions {
        DownloadOptions {
            include_raw: self.include_raw,
            exclude_supplementary: self.exclude_supplementary,
            max_concurrent: usize::from(self.max_concurrent),
            resume: self.resume,
            skip_existing: self.skip_existing,
            non_interactive: self.non_interactive,
            custom_filters: self
                .filters
                .iter()
                .cloned()
                .collect::<BTreeMap<String, String>>(),
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct IdArgs {
    /// Identifier to check
    pub id: String,

    /// Check against one source only
    #[arg(short, long)]
    pub source: Option<String>,

    /// Emit machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_filter(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(kind, parameter)| (kind.trim().to_string(), parameter.trim().to_string()))
        .ok_or_else(|| format!("expected kind=parameter, got '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_extract_defaults() {
        let args = Args::try_parse_from(["hapiq", "extract", "paper.txt"]).unwrap();
        let Command::Extract(extract) = args.command else {
            panic!("expected extract subcommand");
        };
        let options = extract.to_options();
        assert!(!options.validate_links);
        assert!(options.use_accession_recognition);
        assert_eq!(options.max_links_per_page, 0);
    }

    #[test]
    fn test_cli_extract_requires_input() {
        assert!(Args::try_parse_from(["hapiq", "extract"]).is_err());
    }

    #[test]
    fn test_cli_download_options_mapped() {
        let args = Args::try_parse_from([
            "hapiq",
            "download",
            "GSE123456",
            "--output",
            "/tmp/out",
            "--non-interactive",
            "--max-concurrent",
            "5",
            "--filter",
            "extension=csv",
        ])
        .unwrap();
        let Command::Download(download) = args.command else {
            panic!("expected download subcommand");
        };
        let options = download.to_options();
        assert!(options.non_interactive);
        assert_eq!(options.max_concurrent, 5);
        assert_eq!(
            options.custom_filters.get("extension").map(String::as_str),
            Some("csv")
        );
    }

    #[test]
    fn test_cli_bad_filter_rejected() {
        let result = Args::try_parse_from(["hapiq", "download", "X", "--filter", "noequals"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_min_confidence_clamped() {
        let args =
            Args::try_parse_from(["hapiq", "extract", "p.txt", "--min-confidence", "7.5"]).unwrap();
        let Command::Extract(extract) = args.command else {
            panic!("expected extract subcommand");
        };
        assert!((extract.to_options().min_confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cli_verbose_and_quiet_flags() {
        let args = Args::try_parse_from(["hapiq", "-vv", "detect", "GSE1"]).unwrap();
        assert_eq!(args.verbose, 2);
        let args = Args::try_parse_from(["hapiq", "-q", "detect", "GSE1"]).unwrap();
        assert!(args.quiet);
    }
}
