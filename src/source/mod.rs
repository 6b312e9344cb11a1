//! Text source seam for the extraction pipeline.
//!
//! PDF-to-text conversion is an external collaborator; the pipeline only
//! depends on this trait. The bundled implementation reads pre-converted
//! UTF-8 text files, treating form feeds as page separators (the
//! convention common to PDF text converters).

use std::path::Path;

use crate::extract::ExtractError;

/// A document's text, split into pages.
#[derive(Debug, Clone)]
pub struct DocumentText {
    /// Raw text per page; at least one page.
    pub pages: Vec<String>,
}

impl DocumentText {
    /// Wraps a text blob, splitting on form feeds.
    #[must_use]
    pub fn from_blob(text: &str) -> Self {
        let pages: Vec<String> = text.split('\u{c}').map(str::to_string).collect();
        if pages.is_empty() {
            Self {
                pages: vec![String::new()],
            }
        } else {
            Self { pages }
        }
    }

    /// Number of pages (at least 1).
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len().max(1)
    }
}

/// Supplies document text for extraction.
pub trait TextSource: Send + Sync {
    /// Reads the document at `path` into page-separated text.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Read`] when the file cannot be read,
    /// [`ExtractError::EmptyText`] when it produced no text.
    fn extract(&self, path: &Path) -> Result<DocumentText, ExtractError>;
}

/// Reads pre-converted plain-text files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSource;

impl TextSource for PlainTextSource {
    fn extract(&self, path: &Path) -> Result<DocumentText, ExtractError> {
        let text = std::fs::read_to_string(path).map_err(|e| ExtractError::read(path, e))?;
        if text.trim().is_empty() {
            return Err(ExtractError::empty_text(path));
        }
        Ok(DocumentText::from_blob(&text))
    }
}
