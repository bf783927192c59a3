//! Core data models used throughout docqa.
//!
//! These types represent the documents, passages, and answers that flow
//! through the upload, indexing, and query pipeline.

use serde::Serialize;
use std::path::Path;

/// The kind of a stored document, inferred from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Pdf,
    Zip,
}

impl DocumentKind {
    /// Infer the kind from a file name or storage key.
    ///
    /// Returns `None` for extensions outside `{txt, pdf, zip}`.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(DocumentKind::Text),
            "pdf" => Some(DocumentKind::Pdf),
            "zip" => Some(DocumentKind::Zip),
            _ => None,
        }
    }

    /// Infer the kind for a key that was already accepted for storage.
    ///
    /// Anything that is not a PDF or ZIP archive is treated as plain text.
    pub fn for_key(key: &str) -> Self {
        match Self::from_name(key) {
            Some(kind) => kind,
            None => DocumentKind::Text,
        }
    }
}

/// A searchable slice of an indexed document's text.
#[derive(Debug, Clone)]
pub struct Passage {
    /// Passage UUID.
    pub id: String,
    /// Name of the document the passage came from (file name, or
    /// `archive.zip/entry.txt` for archive members).
    pub document: String,
    pub text: String,
}

/// A single extracted answer span with provenance.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Answer {
    /// The literal answer span.
    pub answer: String,
    /// Reader confidence in `[0.0, 1.0]`.
    pub score: f64,
    /// The passage the span was extracted from.
    pub context: String,
    /// Name of the source document.
    pub document: String,
    /// Id of the passage the span came from.
    pub passage_id: String,
    /// Byte offsets of `answer` inside `context`.
    pub offsets_in_context: Offsets,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Offsets {
    pub start: usize,
    pub end: usize,
}

/// The result of one question against the corpus.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub query: String,
    /// Answers ranked by score, best first.
    pub answers: Vec<Answer>,
    /// Number of candidate passages handed to the reader.
    pub passages_considered: usize,
}
