//! Multi-format document loading and text normalization.
//!
//! Dispatches on file extension (pdf, txt, md, docx), extracts plain text,
//! and normalizes it so identical semantic content hashes identically
//! regardless of source formatting quirks. Loading is stateless and has no
//! side effects beyond reading the file; failures are per-document and are
//! reported to the caller rather than aborting a batch.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{DocumentFormat, LoadedDocument};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Load a document: detect format, read bytes, extract and normalize text.
pub fn load(path: &Path) -> Result<LoadedDocument> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let format = DocumentFormat::from_extension(ext)
        .ok_or_else(|| Error::UnsupportedFormat(format!("{} ({})", ext, path.display())))?;

    let bytes = std::fs::read(path).map_err(|e| Error::FileUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let content_hash = {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    };

    let raw_text = match format {
        DocumentFormat::Pdf => extract_pdf(path, &bytes)?,
        DocumentFormat::Docx => extract_docx(path, &bytes)?,
        DocumentFormat::Txt | DocumentFormat::Markdown => {
            String::from_utf8_lossy(&bytes).into_owned()
        }
    };

    Ok(LoadedDocument {
        content_hash,
        source_path: path.to_path_buf(),
        format,
        text: normalize_text(&raw_text),
    })
}

fn extract_pdf(path: &Path, bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| Error::ExtractionFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Pull the `w:t` text runs out of `word/document.xml`.
fn extract_docx(path: &Path, bytes: &[u8]) -> Result<String> {
    let fail = |reason: String| Error::ExtractionFailed {
        path: path.to_path_buf(),
        reason,
    };

    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| fail(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| fail("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| fail(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(fail("word/document.xml exceeds size limit".to_string()));
        }
    }

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                } else if name.as_ref() == b"p" && !out.is_empty() {
                    // Paragraph boundary
                    out.push_str("\n\n");
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(fail(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Canonical whitespace form: CRLF to LF, tabs to spaces, runs of spaces
/// collapsed, runs of blank lines collapsed to one, edges trimmed.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut pending_newlines = 0usize;
    let mut pending_space = false;
    let mut line_has_content = false;

    for ch in unified.chars() {
        match ch {
            '\n' => {
                pending_newlines += 1;
                pending_space = false;
                line_has_content = false;
            }
            ' ' | '\t' => {
                if line_has_content {
                    pending_space = true;
                }
            }
            _ => {
                if pending_newlines > 0 && !out.is_empty() {
                    out.push_str(if pending_newlines > 1 { "\n\n" } else { "\n" });
                }
                pending_newlines = 0;
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(ch);
                line_has_content = true;
            }
        }
    }

    out
}
