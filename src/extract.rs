//! File-type detection and plain-text extraction for uploads.
//!
//! Uploads arrive as bytes plus a filename. The extension decides the
//! [`SourceType`]; anything outside the supported set is rejected with
//! [`Error::UnsupportedFileType`] before chunking is attempted.
//!
//! | Extension | Source type | Extraction |
//! |-----------|-------------|------------|
//! | `.txt` | `text` | UTF-8 decode, whitespace collapsed |
//! | `.md`, `.markdown` | `markdown` | same as text |
//! | `.html`, `.htm` | `html` | scripts/styles/tags removed, entities decoded |
//! | `.pdf` | `pdf` | `pdf-extract` |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// Kind of source a document was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Text,
    Markdown,
    Html,
    Pdf,
}

impl SourceType {
    /// Detect the source type from a filename's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "txt" => Ok(SourceType::Text),
            "md" | "markdown" => Ok(SourceType::Markdown),
            "html" | "htm" => Ok(SourceType::Html),
            "pdf" => Ok(SourceType::Pdf),
            _ => Err(Error::UnsupportedFileType {
                filename: filename.to_string(),
                extension: if ext.is_empty() {
                    "(none)".to_string()
                } else {
                    format!(".{}", ext)
                },
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Text => "text",
            SourceType::Markdown => "markdown",
            SourceType::Html => "html",
            SourceType::Pdf => "pdf",
        }
    }

    /// Parse the stored string form back into a source type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(SourceType::Text),
            "markdown" => Some(SourceType::Markdown),
            "html" => Some(SourceType::Html),
            "pdf" => Some(SourceType::Pdf),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract plain text from uploaded bytes.
///
/// Text-like inputs must be valid UTF-8. Undecodable bytes and unparseable
/// PDFs fail with [`Error::Extraction`].
pub fn extract_text(filename: &str, bytes: &[u8], source_type: SourceType) -> Result<String> {
    match source_type {
        SourceType::Text | SourceType::Markdown => Ok(collapse_whitespace(&decode_utf8(
            filename, bytes,
        )?)),
        SourceType::Html => Ok(html_to_text(&decode_utf8(filename, bytes)?)),
        SourceType::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map(|t| collapse_whitespace(&t))
            .map_err(|e| Error::Extraction {
                filename: filename.to_string(),
                reason: format!("unreadable PDF: {}", e),
            }),
    }
}

fn decode_utf8(filename: &str, bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::Extraction {
        filename: filename.to_string(),
        reason: format!("not valid UTF-8 ({})", e.utf8_error()),
    })
}

/// Replace every run of whitespace with a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip markup from an HTML page, keeping only visible text.
///
/// `<script>` and `<style>` bodies are dropped entirely. Tags become word
/// separators so adjacent block elements don't run together.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let lower = html.to_ascii_lowercase();
    let mut i = 0;

    while i < html.len() {
        let rest = &html[i..];
        if rest.starts_with('<') {
            if let Some(skip_to) = skip_raw_block(&lower[i..], "script")
                .or_else(|| skip_raw_block(&lower[i..], "style"))
            {
                i += skip_to;
                out.push(' ');
                continue;
            }
            if rest.starts_with("<!--") {
                i += rest.find("-->").map(|p| p + 3).unwrap_or(rest.len());
                continue;
            }
            match rest.find('>') {
                Some(p) => {
                    i += p + 1;
                    out.push(' ');
                }
                None => {
                    // Unterminated tag: keep the rest as text.
                    out.push_str(rest);
                    break;
                }
            }
        } else {
            let next = rest.find('<').unwrap_or(rest.len());
            out.push_str(&decode_entities(&rest[..next]));
            i += next;
        }
    }

    collapse_whitespace(&out)
}

/// If `lower` starts with an opening `tag`, return the byte length up to and
/// including its closing tag (or the whole input when unclosed).
fn skip_raw_block(lower: &str, tag: &str) -> Option<usize> {
    let open = format!("<{}", tag);
    if !lower.starts_with(&open) {
        return None;
    }
    // Require a delimiter so `<scripts>` or `<styled>` don't match.
    match lower[open.len()..].chars().next() {
        Some(c) if c == '>' || c == '/' || c.is_whitespace() => {}
        _ => return None,
    }
    let close = format!("</{}", tag);
    let end = match lower.find(&close) {
        Some(p) => lower[p..].find('>').map(|q| p + q + 1).unwrap_or(lower.len()),
        None => lower.len(),
    };
    Some(end)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_supported_types() {
        assert_eq!(SourceType::from_filename("a.txt").unwrap(), SourceType::Text);
        assert_eq!(
            SourceType::from_filename("notes/README.MD").unwrap(),
            SourceType::Markdown
        );
        assert_eq!(SourceType::from_filename("page.htm").unwrap(), SourceType::Html);
        assert_eq!(SourceType::from_filename("paper.pdf").unwrap(), SourceType::Pdf);
    }

    #[test]
    fn test_reject_unsupported() {
        let err = SourceType::from_filename("binary.exe").unwrap_err();
        match err {
            Error::UnsupportedFileType {
                filename,
                extension,
            } => {
                assert_eq!(filename, "binary.exe");
                assert_eq!(extension, ".exe");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(SourceType::from_filename("Makefile").is_err());
    }

    #[test]
    fn test_source_type_string_roundtrip() {
        for t in [
            SourceType::Text,
            SourceType::Markdown,
            SourceType::Html,
            SourceType::Pdf,
        ] {
            assert_eq!(SourceType::parse(t.as_str()), Some(t));
        }
        assert_eq!(SourceType::parse("docx"), None);
    }

    #[test]
    fn test_text_whitespace_collapsed() {
        let text = extract_text("a.txt", b"  Hello\n\n\tworld  ", SourceType::Text).unwrap();
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let err = extract_text("a.txt", &[0xff, 0xfe, 0x00], SourceType::Text).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
        assert_eq!(err.code(), "bad_request");
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_corrupt_pdf_is_extraction_failure() {
        let err = extract_text("scan.pdf", b"%PDF-1.4 garbage", SourceType::Pdf).unwrap_err();
        match err {
            Error::Extraction { filename, reason } => {
                assert_eq!(filename, "scan.pdf");
                assert!(reason.starts_with("unreadable PDF"));
            }
            other => panic!("expected extraction error, got {:?}", other),
        }
    }

    #[test]
    fn test_html_strips_scripts_and_tags() {
        let html = r#"<html><head><style>body { color: red; }</style>
            <script type="text/javascript">var x = "<p>";</script></head>
            <body><h1>Title</h1><p>Fish &amp; chips</p><!-- hidden --></body></html>"#;
        assert_eq!(html_to_text(html), "Title Fish & chips");
    }

    #[test]
    fn test_html_block_elements_separated() {
        assert_eq!(html_to_text("<p>one</p><p>two</p>"), "one two");
    }

    #[test]
    fn test_html_similar_tag_names_kept() {
        assert_eq!(html_to_text("<styled>kept</styled>"), "kept");
    }

    #[test]
    fn test_html_unterminated_tag() {
        assert_eq!(html_to_text("text <b"), "text <b");
    }
}
