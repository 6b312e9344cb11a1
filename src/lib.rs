//! hapiq - dataset reference extraction and retrieval for scientific PDFs.
//!
//! The library turns PDF-extracted text into a validated, deduplicated set
//! of dataset references (DOIs, repository URLs, biological accessions)
//! and materializes referenced datasets onto disk with full provenance.
//!
//! # Architecture
//!
//! - [`extract`] - pattern-driven identifier extraction and deduplication
//! - [`validate`] - browser-impersonating concurrent HTTP probing
//! - [`download`] - per-source adapters, registry, witness manifests
//! - [`pool`] - bounded-concurrency worker pool
//! - [`source`] - text-source seam (the PDF converter is external)

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod download;
pub mod extract;
pub mod pool;
pub mod source;
pub mod validate;

// Re-export commonly used types
pub use download::{
    DownloadError, DownloadOptions, DownloadRequest, DownloadResult, Downloader, Metadata,
    SourceValidation, registry::DownloaderRegistry, registry::build_default_registry,
    witness::Witness,
};
pub use extract::{
    ExtractError, ExtractedLink, ExtractionOptions, ExtractionResult, LinkKind,
    pipeline::Extractor,
};
pub use pool::{CancelToken, WorkerPool};
pub use validate::{LinkValidator, ValidationResult};
