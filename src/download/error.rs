//! Error types for dataset downloads.
//!
//! The taxonomy separates what the caller can act on: bad identifiers and
//! absent datasets are terminal for the request, network errors are
//! retried before surfacing, and per-file failures inside a multi-file
//! download become warnings rather than errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving or downloading a dataset.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The identifier failed adapter format validation.
    #[error("invalid identifier '{id}' for source {source_name}: {reason}")]
    InvalidId {
        /// Source adapter that rejected the identifier.
        source_name: String,
        /// The rejected identifier.
        id: String,
        /// Why validation failed.
        reason: String,
    },

    /// The adapter confirmed the dataset does not exist.
    #[error("{source_name} has no record for '{id}'")]
    NotFound {
        /// Source adapter that looked up the identifier.
        source_name: String,
        /// The identifier that resolved to nothing.
        id: String,
    },

    /// The remote refused access (401/403).
    #[error("access denied by {source_name} for '{id}' (HTTP {status})")]
    AccessDenied {
        /// Source adapter.
        source_name: String,
        /// The identifier.
        id: String,
        /// The HTTP status returned.
        status: u16,
    },

    /// Transient network failure that survived all retry attempts.
    #[error("network error calling {url}: {reason}")]
    Network {
        /// The URL that failed.
        url: String,
        /// Final failure description.
        reason: String,
    },

    /// Unexpected HTTP status from a repository endpoint.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The status code.
        status: u16,
    },

    /// The target volume lacks space for the download.
    #[error("insufficient space in {dir}: need {needed} bytes, {available} available")]
    InsufficientSpace {
        /// Download target directory.
        dir: PathBuf,
        /// Estimated bytes required.
        needed: u64,
        /// Bytes reported free.
        available: u64,
    },

    /// No adapter handles the requested source or dataset sub-type.
    #[error("unsupported source or dataset type: {0}")]
    Unsupported(String),

    /// The response payload could not be decoded.
    #[error("failed to decode response from {url}: {reason}")]
    Decode {
        /// The URL whose payload failed to decode.
        url: String,
        /// Decoder failure description.
        reason: String,
    },

    /// File system failure while writing downloaded content.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path where the failure occurred.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Registry misconfiguration (duplicate source names or aliases).
    #[error("registry error: {0}")]
    Registry(String),

    /// The download was cancelled. Not a failure; no witness is written.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates an invalid-identifier error.
    #[must_use]
    pub fn invalid_id(
        source: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidId {
            source_name: source.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            source_name: source.into(),
            id: id.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_id_message() {
        let err = DownloadError::invalid_id("geo", "GSEX", "not an accession");
        let msg = err.to_string();
        assert!(msg.contains("GSEX"));
        assert!(msg.contains("geo"));
        assert!(msg.contains("not an accession"));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(matches!(DownloadError::Cancelled, DownloadError::Cancelled));
        assert_eq!(DownloadError::Cancelled.to_string(), "download cancelled");
    }
}
