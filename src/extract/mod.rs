use std::io::{Cursor, Read};

use quick_xml::{Reader as XmlReader, events::Event};
use tracing::warn;
use zip::ZipArchive;

use crate::error::ExtractError;

const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Extracts the text of an uploaded document.
///
/// Dispatches on the declared content type or, failing that, the filename
/// extension. Empty payloads are rejected before any format handling, and
/// parser errors are folded into a uniform `ExtractionFailed` so callers
/// never see a library error type.
pub fn extract_text(
    bytes: &[u8],
    filename: &str,
    content_type: &str,
) -> Result<String, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::EmptyFile(filename.to_string()));
    }

    let declared = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    let lower_name = filename.to_ascii_lowercase();

    if declared == mime::TEXT_PLAIN.essence_str() || lower_name.ends_with(".txt") {
        Ok(decode_plain_text(bytes))
    } else if declared == mime::APPLICATION_PDF.essence_str() || lower_name.ends_with(".pdf") {
        extract_pdf(bytes, filename)
    } else if declared == DOCX_CONTENT_TYPE || lower_name.ends_with(".docx") {
        extract_docx(bytes, filename)
    } else {
        Err(ExtractError::UnsupportedFormat {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
        })
    }
}

/// UTF-8 first, then a Latin-1 byte decoding which cannot fail. Genuinely
/// non-Latin-1 input comes out as mojibake rather than an error.
fn decode_plain_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            warn!("UTF-8 decoding failed, falling back to Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

fn extract_pdf(bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
    // Image-only pages contribute nothing to the output; an empty string is
    // a valid result here and the caller decides whether that is fatal.
    pdf_extract::extract_text_from_mem(bytes).map_err(|err| ExtractError::ExtractionFailed {
        filename: filename.to_string(),
        reason: err.to_string(),
    })
}

fn extract_docx(bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
    docx_to_text(bytes).map_err(|reason| ExtractError::ExtractionFailed {
        filename: filename.to_string(),
        reason,
    })
}

fn docx_to_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|err| format!("not a DOCX archive: {err}"))?;

    let mut document = archive
        .by_name("word/document.xml")
        .map_err(|_| "missing word/document.xml".to_string())?;

    let mut xml = String::new();
    document
        .read_to_string(&mut xml)
        .map_err(|err| format!("failed to read document XML: {err}"))?;

    let mut reader = XmlReader::from_str(&xml);
    let mut buf = Vec::new();
    let mut output = String::new();
    let mut in_text_node = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"w:t" => in_text_node = true,
                b"w:tab" => output.push('\t'),
                b"w:br" => output.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_node {
                    let value = e.unescape().map_err(|err| err.to_string())?.into_owned();
                    output.push_str(&value);
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"w:t" => in_text_node = false,
                // Paragraph boundaries become newlines so downstream
                // segmentation sees the document's line structure.
                b"w:p" => output.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"w:tab" => output.push('\t'),
                b"w:br" => output.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(format!("failed to parse document XML: {err}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(output.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn build_docx(paragraphs: &[&str]) -> Vec<u8> {
        let mut body = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#,
        );
        for text in paragraphs {
            body.push_str(&format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>"));
        }
        body.push_str("</w:body></w:document>");

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file("word/document.xml", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn empty_file_is_rejected_before_dispatch() {
        let err = extract_text(&[], "essay.txt", "text/plain").unwrap_err();
        assert!(matches!(err, ExtractError::EmptyFile(_)));
    }

    #[test]
    fn utf8_text_round_trips() {
        let text = extract_text("Student Name: Jane Doe".as_bytes(), "essay.txt", "text/plain")
            .unwrap();
        assert_eq!(text, "Student Name: Jane Doe");
    }

    #[test]
    fn latin1_fallback_never_fails() {
        // 0xE9 is 'é' in Latin-1 and invalid on its own in UTF-8.
        let bytes = [b'c', b'a', b'f', 0xE9];
        let text = extract_text(&bytes, "essay.txt", "text/plain").unwrap();
        assert_eq!(text, "café");
    }

    #[test]
    fn extension_wins_when_content_type_is_generic() {
        let text = extract_text(b"plain words", "notes.txt", "application/octet-stream").unwrap();
        assert_eq!(text, "plain words");
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let err = extract_text(b"GIF89a", "image.gif", "image/gif").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat { .. }));
    }

    #[test]
    fn docx_paragraphs_join_with_newlines() {
        let bytes = build_docx(&["Student Name: Jane Doe", "An opening paragraph."]);
        let text = extract_text(&bytes, "essays.docx", DOCX_CONTENT_TYPE).unwrap();
        assert_eq!(text, "Student Name: Jane Doe\nAn opening paragraph.");
    }

    #[test]
    fn corrupt_docx_reports_extraction_failure() {
        let err = extract_text(b"not a zip at all", "essays.docx", DOCX_CONTENT_TYPE).unwrap_err();
        assert!(matches!(err, ExtractError::ExtractionFailed { .. }));
    }
}
