use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::NormalizeError;
use crate::normalizer::{AttachmentFormat, ExtractedContent, TextExtractor};

const CONTENT_HEADER: &str = "Word Document Content:";

/// Paragraph text from `word/document.xml` of a `.docx` package.
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedContent, NormalizeError> {
        let _span = tracing::info_span!("normalize.docx").entered();

        let file = std::fs::File::open(path).map_err(|source| NormalizeError::ReadAttachment {
            path: path.to_path_buf(),
            source,
        })?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| NormalizeError::WordProcessing(format!("Failed to open DOCX: {}", e)))?;

        let text = extract_docx_text(&mut archive)?;
        Ok(ExtractedContent::Text(format!(
            "{}\n{}",
            CONTENT_HEADER,
            text.trim_end()
        )))
    }

    fn supports(&self, format: AttachmentFormat) -> bool {
        matches!(format, AttachmentFormat::Word)
    }
}

fn extract_docx_text<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<String, NormalizeError> {
    let mut document_xml = archive.by_name("word/document.xml").map_err(|e| {
        NormalizeError::WordProcessing(format!("Failed to find document.xml: {}", e))
    })?;

    let mut xml = String::new();
    document_xml.read_to_string(&mut xml).map_err(|e| {
        NormalizeError::WordProcessing(format!("Failed to read document.xml: {}", e))
    })?;

    parse_document_xml(&xml)
}

/// Concatenates `<w:t>` runs, one line per `<w:p>`; `<w:tab/>` becomes a tab so
/// table-like layouts stay readable.
fn parse_document_xml(xml: &str) -> Result<String, NormalizeError> {
    let mut reader = Reader::from_str(xml);

    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"tab" => text.push('\t'),
            Ok(Event::Text(e)) if in_text_run => {
                let decoded = e.decode().unwrap_or_default();
                text.push_str(&decoded);
            }
            Ok(Event::GeneralRef(e)) if in_text_run => {
                if let Ok(Some(ch)) = e.resolve_char_ref() {
                    text.push(ch);
                } else if let Some(resolved) =
                    quick_xml::escape::resolve_predefined_entity(&String::from_utf8_lossy(&e))
                {
                    text.push_str(resolved);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(NormalizeError::WordProcessing(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(text)
}
