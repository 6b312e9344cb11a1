//! Error types for extraction operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while extracting links from a document.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The input file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that failed to open or read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The text source produced no usable text.
    #[error("no text extracted from {path}")]
    EmptyText {
        /// Path of the empty document.
        path: PathBuf,
    },

    /// The result could not be serialized for output.
    #[error("failed to encode extraction result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ExtractError {
    /// Creates a read error for the given path.
    #[must_use]
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Creates an empty-text error for the given path.
    #[must_use]
    pub fn empty_text(path: impl Into<PathBuf>) -> Self {
        Self::EmptyText { path: path.into() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_message_contains_path() {
        let err = ExtractError::read(
            "paper.pdf",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("paper.pdf"));
    }

    #[test]
    fn test_empty_text_message() {
        let err = ExtractError::empty_text("blank.pdf");
        assert!(err.to_string().contains("no text extracted"));
    }
}
