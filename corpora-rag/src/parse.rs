//! The boundary to format-aware document parsers.
//!
//! Format parsing (PDF, DOCX, ...) is an external collaborator; the core
//! consumes plain text plus structural metadata through this trait. The
//! built-in [`PlainTextParser`] handles text-like uploads and is what
//! the tests run against.

use async_trait::async_trait;
use corpora_core::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Byte range of one page in the extracted text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    /// One-based page number
    pub number: u32,
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

/// Parser output: plain text plus structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    /// Extracted text
    pub text: String,
    /// Page layout over `text`; a single span for unpaged formats
    pub pages: Vec<PageSpan>,
    /// Document title, when the format carries one
    pub title: Option<String>,
    /// Authors, when the format carries them
    pub authors: Vec<String>,
}

/// Format-aware text extraction
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Whether this parser accepts the MIME type
    fn supports(&self, mime_type: &str) -> bool;

    /// Extract text and structure from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedFormat` for a MIME type this parser
    /// does not handle and `Error::CorruptInput` for undecodable bytes.
    /// Both are terminal for the document.
    async fn parse(&self, bytes: &[u8], mime_type: &str) -> Result<ParsedDocument>;
}

/// Parser for plain-text formats. Pages split on form feed (`\f`),
/// matching what text exports of paged formats produce.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextParser;

impl PlainTextParser {
    /// Create the parser
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    const SUPPORTED: [&'static str; 3] = ["text/plain", "text/markdown", "text/csv"];
}

#[async_trait]
impl DocumentParser for PlainTextParser {
    fn supports(&self, mime_type: &str) -> bool {
        Self::SUPPORTED.contains(&mime_type)
    }

    async fn parse(&self, bytes: &[u8], mime_type: &str) -> Result<ParsedDocument> {
        if !self.supports(mime_type) {
            return Err(Error::UnsupportedFormat {
                message: format!("plain-text parser cannot handle {mime_type}"),
            });
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::CorruptInput {
                message: format!("upload is not valid UTF-8: {e}"),
            })?
            .to_string();

        let mut pages = Vec::new();
        let mut start = 0usize;
        let mut number = 1u32;
        for (i, b) in text.bytes().enumerate() {
            if b == 0x0C {
                pages.push(PageSpan {
                    number,
                    start,
                    end: i + 1,
                });
                start = i + 1;
                number += 1;
            }
        }
        if start < text.len() || pages.is_empty() {
            pages.push(PageSpan {
                number,
                start,
                end: text.len(),
            });
        }

        // first non-empty line doubles as the title for text uploads
        let title = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string);

        Ok(ParsedDocument {
            text,
            pages,
            title,
            authors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_page_for_unpaged_text() {
        let parser = PlainTextParser::new();
        let doc = parser.parse(b"hello world", "text/plain").await.unwrap();
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].number, 1);
        assert_eq!(doc.pages[0].end, doc.text.len());
    }

    #[tokio::test]
    async fn form_feeds_delimit_pages() {
        let parser = PlainTextParser::new();
        let doc = parser
            .parse(b"page one\x0cpage two\x0cpage three", "text/plain")
            .await
            .unwrap();
        assert_eq!(doc.pages.len(), 3);
        assert_eq!(doc.pages[2].number, 3);
        assert_eq!(&doc.text[doc.pages[1].start..doc.pages[1].end], "page two\u{c}");
    }

    #[tokio::test]
    async fn unsupported_mime_is_terminal() {
        let parser = PlainTextParser::new();
        let err = parser.parse(b"%PDF-1.7", "application/pdf").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn invalid_utf8_is_corrupt_input() {
        let parser = PlainTextParser::new();
        let err = parser.parse(&[0xFF, 0xFE, 0x00], "text/plain").await.unwrap_err();
        assert!(matches!(err, Error::CorruptInput { .. }));
    }

    #[tokio::test]
    async fn first_line_becomes_title() {
        let parser = PlainTextParser::new();
        let doc = parser
            .parse(b"\nAnnual Report 2024\nBody text", "text/plain")
            .await
            .unwrap();
        assert_eq!(doc.title.as_deref(), Some("Annual Report 2024"));
    }
}
