//! Text extraction for registered sources (PDF, DOCX, HTML, plain text).
//!
//! The ingestor supplies raw bytes plus a [`ContentKind`] detected from
//! the source location and, for URLs, the `Content-Type` header. This
//! module returns plain UTF-8 text.

use std::io::Read;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_HTML: &str = "text/html";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Document format, decided before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Docx,
    Html,
    Text,
}

impl ContentKind {
    /// Detect from an optional MIME type, falling back to the location's extension.
    ///
    /// A specific MIME type wins; generic ones (`application/octet-stream`,
    /// `text/plain`, missing) defer to the extension.
    pub fn detect(location: &str, content_type: Option<&str>) -> Self {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());
        match mime.as_deref() {
            Some(MIME_PDF) => return ContentKind::Pdf,
            Some(MIME_DOCX) => return ContentKind::Docx,
            Some(MIME_HTML) | Some("application/xhtml+xml") => return ContentKind::Html,
            _ => {}
        }

        let path = location
            .split(['?', '#'])
            .next()
            .unwrap_or(location)
            .to_ascii_lowercase();
        if path.ends_with(".pdf") {
            ContentKind::Pdf
        } else if path.ends_with(".docx") {
            ContentKind::Docx
        } else if path.ends_with(".html") || path.ends_with(".htm") {
            ContentKind::Html
        } else {
            ContentKind::Text
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Ooxml(String),
    #[error("HTML extraction failed: {0}")]
    Html(String),
    #[error("content is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
}

/// Extract plain text from `bytes`.
///
/// PDF extraction is CPU-bound; async callers should run this on the
/// blocking pool.
pub fn extract_text(bytes: &[u8], kind: ContentKind) -> Result<String, ExtractError> {
    match kind {
        ContentKind::Pdf => extract_pdf(bytes),
        ContentKind::Docx => extract_docx(bytes),
        ContentKind::Html => extract_html(std::str::from_utf8(bytes)?),
        ContentKind::Text => {
            let text = std::str::from_utf8(bytes)?;
            Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_html(html: &str) -> Result<String, ExtractError> {
    let soup = scrape_core::Soup::parse(html);
    let bodies = soup
        .find_all("body")
        .map_err(|e| ExtractError::Html(e.to_string()))?;

    let mut parts = Vec::new();
    for tag in bodies {
        let text = tag.text();
        if !text.trim().is_empty() {
            parts.push(text.trim().to_owned());
        }
    }
    if parts.is_empty() {
        return Ok(html_fallback(html));
    }
    Ok(collapse_whitespace(&parts.join("\n")))
}

/// Strip tags by hand when the document has no `<body>`.
fn html_fallback(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
        let mut body = String::new();
        for p in paragraphs {
            body.push_str(&format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p));
        }
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn detect_by_mime_then_extension() {
        assert_eq!(ContentKind::detect("x", Some("application/pdf")), ContentKind::Pdf);
        assert_eq!(
            ContentKind::detect("https://e.org/a", Some("text/html; charset=utf-8")),
            ContentKind::Html
        );
        assert_eq!(
            ContentKind::detect("https://e.org/paper.PDF?dl=1", Some("application/octet-stream")),
            ContentKind::Pdf
        );
        assert_eq!(ContentKind::detect("/p/a.docx", None), ContentKind::Docx);
        assert_eq!(ContentKind::detect("/p/a.htm", None), ContentKind::Html);
        assert_eq!(ContentKind::detect("/p/notes.txt", None), ContentKind::Text);
        assert_eq!(ContentKind::detect("/p/README", None), ContentKind::Text);
    }

    #[test]
    fn plain_text_passthrough() {
        let text = extract_text("\u{feff}hello world".as_bytes(), ContentKind::Text).unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn invalid_utf8_returns_error() {
        let err = extract_text(&[0xff, 0xfe, 0x00], ContentKind::Text).unwrap_err();
        assert!(matches!(err, ExtractError::Encoding(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", ContentKind::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", ContentKind::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraphs_extracted() {
        let bytes = docx_bytes(&["Motherese is slower.", "Pitch range &amp; contour."]);
        let text = extract_text(&bytes, ContentKind::Docx).unwrap();
        assert_eq!(text, "Motherese is slower.\nPitch range & contour.");
    }

    #[test]
    fn html_body_text() {
        let html = "<html><head><title>T</title></head><body><h1>Results</h1>\n<p>Infants   prefer IDS.</p></body></html>";
        let text = extract_text(html.as_bytes(), ContentKind::Html).unwrap();
        assert!(text.contains("Results"));
        assert!(text.contains("Infants prefer IDS."));
    }

    #[test]
    fn html_without_body_falls_back() {
        assert_eq!(html_fallback("<p>a</p><p>b  c</p>"), "a b c");
    }
}
