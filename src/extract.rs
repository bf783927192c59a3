//! Text extraction for uploaded documents (PDF, ZIP, plain text).
//!
//! Storage and indexing hand this module raw bytes plus a [`DocumentKind`];
//! it returns plain UTF-8 text. PDFs are flattened page by page, ZIP
//! archives are unpacked into one text blob per entry.

use std::io::Read;

use thiserror::Error;

use crate::models::DocumentKind;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("ZIP extraction failed: {0}")]
    Zip(String),
    #[error("ZIP file is empty")]
    EmptyArchive,
    #[error("'{name}' is not valid UTF-8 text")]
    NotUtf8 { name: String },
}

impl ExtractError {
    /// Whether the failure was caused by the caller's input rather than by
    /// a broken dependency. Only the empty archive is reported as such.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ExtractError::EmptyArchive)
    }
}

/// Extracts the text of every page, concatenated in page order.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    Ok(extract_pdf_pages(bytes)?.concat())
}

/// Extracts text per page, in page order.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Unpacks a ZIP archive into one decoded text per file entry.
///
/// Entries keep the archive's listing order; directory entries are skipped.
/// Fails if the archive holds no entries or any entry is not UTF-8.
pub fn extract_zip_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    Ok(extract_zip_entries(bytes)?
        .into_iter()
        .map(|(_, text)| text)
        .collect())
}

/// Like [`extract_zip_pages`], but keeps each entry's name alongside its text.
pub fn extract_zip_entries(bytes: &[u8]) -> Result<Vec<(String, String)>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Zip(e.to_string()))?;
    if archive.is_empty() {
        return Err(ExtractError::EmptyArchive);
    }

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::Zip(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut out = Vec::new();
        entry
            .take(MAX_ZIP_ENTRY_BYTES)
            .read_to_end(&mut out)
            .map_err(|e| ExtractError::Zip(e.to_string()))?;
        if out.len() as u64 >= MAX_ZIP_ENTRY_BYTES {
            return Err(ExtractError::Zip(format!(
                "ZIP entry {} exceeds size limit ({} bytes)",
                name, MAX_ZIP_ENTRY_BYTES
            )));
        }
        let text = String::from_utf8(out).map_err(|_| ExtractError::NotUtf8 { name: name.clone() })?;
        entries.push((name, text));
    }

    if entries.is_empty() {
        return Err(ExtractError::EmptyArchive);
    }
    Ok(entries)
}

/// Decodes a text document; no lossy replacement.
pub fn decode_text(name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::NotUtf8 {
        name: name.to_string(),
    })
}

/// Turns a stored document into the page list served by `/file-content`.
///
/// PDFs come back as a single page holding the whole text; ZIP archives as
/// one page per entry; anything else as one decoded page.
pub fn extract_pages(name: &str, kind: DocumentKind, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    match kind {
        DocumentKind::Pdf => Ok(vec![extract_pdf_text(bytes)?]),
        DocumentKind::Zip => extract_zip_pages(bytes),
        DocumentKind::Text => Ok(vec![decode_text(name, bytes)?]),
    }
}

/// Produces the single preview string shown after an upload.
pub fn extract_preview(name: &str, kind: DocumentKind, bytes: &[u8]) -> Result<String, ExtractError> {
    Ok(extract_pages(name, kind, bytes)?.join("\n\n"))
}
