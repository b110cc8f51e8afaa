//! Content normalization: raw PDF bytes to canonical markdown plus a
//! content fingerprint.
//!
//! Pure computation, no I/O. Identical bytes always produce an identical
//! fingerprint; the text side is deterministic modulo the PDF parser.

use anyhow::{Context, Result};
use lopdf::{Document as PdfDocument, Object};
use url::Url;

use crate::types::ContentHash;

/// Result of normalizing one fetched document.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub markdown: String,
    pub content_hash: ContentHash,
}

/// Convert raw PDF bytes into markdown and fingerprint the bytes.
///
/// The hash covers the raw bytes, not the extracted text, so byte-identical
/// PDFs reachable via different URLs collide even if text extraction drifts
/// across parser versions.
pub fn normalize_pdf(raw: &[u8]) -> Result<NormalizedDocument> {
    let content_hash = ContentHash::from_bytes(raw);

    let pdf = PdfDocument::load_mem(raw).context("Failed to parse PDF")?;

    let page_numbers: Vec<u32> = pdf.get_pages().keys().copied().collect();
    let text = pdf
        .extract_text(&page_numbers)
        .context("Failed to extract PDF text")?;

    let body = squeeze_blank_lines(&text.replace("\r\n", "\n"));
    let body = body.trim();

    let title = info_string(&pdf, b"Title").unwrap_or_else(|| "Document".to_string());
    let mut markdown = format!("# {title}\n\n");
    if let Some(author) = info_string(&pdf, b"Author") {
        markdown.push_str(&format!("**Author:** {author}\n\n"));
    }
    markdown.push_str(body);

    Ok(NormalizedDocument {
        markdown,
        content_hash,
    })
}

/// Best-effort title derived from the URL path when the caller supplies none.
pub fn title_from_url(url: &Url) -> String {
    let name = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");
    if name.is_empty() {
        return "Untitled Document".to_string();
    }
    let name = name
        .strip_suffix(".pdf")
        .or_else(|| name.strip_suffix(".PDF"))
        .unwrap_or(name);
    let title = name.replace(['_', '-'], " ").trim().to_string();
    if title.is_empty() {
        "Untitled Document".to_string()
    } else {
        title
    }
}

/// Collapse runs of three or more newlines down to a single blank line.
fn squeeze_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push(ch);
            }
        } else {
            newline_run = 0;
            out.push(ch);
        }
    }
    out
}

/// Read a string entry from the PDF Info dictionary, if present.
fn info_string(pdf: &PdfDocument, key: &[u8]) -> Option<String> {
    let info = pdf.trailer.get(b"Info").ok()?;
    let dict = match info {
        Object::Reference(id) => pdf.get_object(*id).ok()?.as_dict().ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    match dict.get(key).ok()? {
        Object::String(bytes, _) => decode_pdf_string(bytes),
        _ => None,
    }
}

/// PDF text strings are either UTF-16BE with a BOM or (roughly) Latin-1.
fn decode_pdf_string(bytes: &[u8]) -> Option<String> {
    let decoded = if bytes.starts_with(&[0xFE, 0xFF]) {
        let code_units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&code_units).ok()?
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pdf_fixture;

    #[test]
    fn normalize_extracts_text_and_metadata_header() {
        let raw = pdf_fixture("Quarterly Review", "Capital buffers remain adequate");
        let normalized = normalize_pdf(&raw).unwrap();

        assert!(normalized.markdown.starts_with("# Quarterly Review"));
        assert!(normalized.markdown.contains("**Author:** Research Desk"));
        assert!(normalized.markdown.contains("Capital buffers remain adequate"));
    }

    #[test]
    fn fingerprint_covers_raw_bytes() {
        let raw = pdf_fixture("Quarterly Review", "Same text");
        let first = normalize_pdf(&raw).unwrap();
        let second = normalize_pdf(&raw).unwrap();
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.content_hash, ContentHash::from_bytes(&raw));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(normalize_pdf(b"not a pdf at all").is_err());
    }

    #[test]
    fn squeezes_runs_of_blank_lines() {
        assert_eq!(squeeze_blank_lines("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(squeeze_blank_lines("a\nb"), "a\nb");
    }

    #[test]
    fn title_from_url_strips_extension_and_separators() {
        let url = Url::parse("https://bis.org/reports/annual_economic-report.pdf").unwrap();
        assert_eq!(title_from_url(&url), "annual economic report");

        let bare = Url::parse("https://example.org/").unwrap();
        assert_eq!(title_from_url(&bare), "Untitled Document");
    }
}
