//! Content extraction: turning a file into a single ordered text stream.
//!
//! Format-specific readers (PDF, office documents, email) live outside this
//! crate and plug in through [`ContentExtractor`].

use std::path::Path;

use tracing::debug;

use crate::error::{RagError, Result};

/// Converts a file into plain text.
pub trait ContentExtractor: Send + Sync {
    /// Whether this extractor handles files with the given lower-case extension.
    fn supports(&self, extension: &str) -> bool;

    /// Read `path` and return its text.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnsupportedFormat`] for extensions this extractor
    /// does not handle and [`RagError::ExtractionError`] when reading fails.
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Reads UTF-8 text files (`txt`, `md`, `markdown`, `text`, `csv`, `log`).
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

const PLAIN_TEXT_EXTENSIONS: [&str; 6] = ["txt", "md", "markdown", "text", "csv", "log"];

impl ContentExtractor for PlainTextExtractor {
    fn supports(&self, extension: &str) -> bool {
        PLAIN_TEXT_EXTENSIONS.contains(&extension)
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let extension = extension_of(path);
        if !self.supports(&extension) {
            return Err(RagError::UnsupportedFormat(format!(
                "{} (extension '{extension}')",
                path.display()
            )));
        }

        let bytes = std::fs::read(path).map_err(|e| RagError::ExtractionError {
            source_id: path.display().to_string(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "extracted plain text");

        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

/// Lower-case extension of `path`, or an empty string.
pub(crate) fn extension_of(path: &Path) -> String {
    path.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase).unwrap_or_default()
}
