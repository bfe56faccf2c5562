use std::path::Path;
use std::process::Command;

use serde_json::json;
use tracing::warn;

use crate::error::NormalizeError;
use crate::normalizer::ocr::OcrEngine;
use crate::normalizer::{read_file, AttachmentFormat, ExtractedContent, TextExtractor};

/// Embedded text per page via lopdf; pages without usable text are rendered with
/// `pdftoppm` and OCR'd when an engine is configured.
///
/// Output shape:
///
/// ```json
/// { "pageCount": 2,
///   "pages": [{ "pageNumber": 1, "textContent": "..." }],
///   "ocrContent": "..." }
/// ```
pub struct PdfExtractor {
    ocr: Option<OcrEngine>,
}

impl PdfExtractor {
    pub fn new(ocr: Option<OcrEngine>) -> Self {
        Self { ocr }
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedContent, NormalizeError> {
        let _span = tracing::info_span!("normalize.pdf").entered();
        let pdf_bytes = read_file(path)?;

        let pages = match lopdf::Document::load_mem(&pdf_bytes) {
            Ok(doc) => doc
                .get_pages()
                .keys()
                .map(|&number| {
                    let text = doc.extract_text(&[number]).unwrap_or_default();
                    (number, text)
                })
                .collect::<Vec<_>>(),
            Err(e) => {
                let Some(ocr) = &self.ocr else {
                    return Err(NormalizeError::PdfProcessing(format!(
                        "Failed to load PDF: {}. OCR fallback unavailable.",
                        e
                    )));
                };
                warn!(error = %e, "lopdf could not parse PDF, falling back to OCR");
                let page_count = count_pdf_pages(&pdf_bytes)?;
                let ocr_text = ocr_pages(&pdf_bytes, 1..=page_count, ocr);
                return Ok(ExtractedContent::Document(json!({
                    "pageCount": page_count,
                    "pages": [],
                    "ocrContent": ocr_text,
                })));
            }
        };

        let ocr_content = match &self.ocr {
            Some(ocr) => {
                let needs_ocr: Vec<u32> = pages
                    .iter()
                    .filter(|(_, text)| should_use_ocr(text))
                    .map(|(number, _)| *number)
                    .collect();
                if needs_ocr.is_empty() {
                    None
                } else {
                    let _ocr_span =
                        tracing::info_span!("normalize.ocr_fallback", pages = needs_ocr.len())
                            .entered();
                    Some(ocr_pages(&pdf_bytes, needs_ocr, ocr))
                }
            }
            None => None,
        };

        let page_entries: Vec<_> = pages
            .iter()
            .map(|(number, text)| {
                json!({
                    "pageNumber": number,
                    "textContent": text.trim(),
                })
            })
            .collect();

        Ok(ExtractedContent::Document(json!({
            "pageCount": pages.len(),
            "pages": page_entries,
            "ocrContent": ocr_content,
        })))
    }

    fn supports(&self, format: AttachmentFormat) -> bool {
        matches!(format, AttachmentFormat::Pdf)
    }
}

/// Renders and OCRs the given pages; unreadable pages are skipped.
fn ocr_pages(pdf_bytes: &[u8], pages: impl IntoIterator<Item = u32>, ocr: &OcrEngine) -> String {
    let mut all_text = String::new();
    for page in pages {
        let recognized = render_pdf_page_to_image(pdf_bytes, page, ocr.dpi())
            .and_then(|image| ocr.recognize(&image));
        match recognized {
            Ok(text) => {
                all_text.push_str(&text);
                all_text.push('\n');
            }
            Err(e) => warn!(page, error = %e, "OCR of PDF page failed"),
        }
    }
    all_text
}

/// Marker lopdf emits for CID fonts it cannot decode.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Below this length the alphanumeric ratio check is skipped.
const MIN_TOTAL_CHARS: usize = 50;

const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// True when extracted page text is empty, only undecodable-font markers, or garbled.
fn should_use_ocr(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }

    let cleaned = trimmed
        .replace(IDENTITY_H_PATTERN, "")
        .replace(['\n', ' '], "");
    if cleaned.is_empty() {
        return true;
    }

    let total_chars = trimmed.chars().count();
    let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();
    total_chars > MIN_TOTAL_CHARS
        && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT
}

fn temp_pdf(pdf_bytes: &[u8], purpose: &str) -> Result<std::path::PathBuf, NormalizeError> {
    let path = std::env::temp_dir().join(format!(
        "offerflow_{}_{}.pdf",
        purpose,
        uuid::Uuid::new_v4()
    ));
    std::fs::write(&path, pdf_bytes)
        .map_err(|e| NormalizeError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;
    Ok(path)
}

/// Page count from `pdfinfo` (poppler-utils), for PDFs lopdf cannot parse.
fn count_pdf_pages(pdf_bytes: &[u8]) -> Result<u32, NormalizeError> {
    let pdf_path = temp_pdf(pdf_bytes, "pagecount")?;
    let output = Command::new("pdfinfo").arg(&pdf_path).output();
    let _ = std::fs::remove_file(&pdf_path);

    let output = output.map_err(|e| {
        NormalizeError::PdfProcessing(format!(
            "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
            e
        ))
    })?;
    if !output.status.success() {
        return Err(NormalizeError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse().ok())
        .unwrap_or(1))
}

fn render_pdf_page_to_image(
    pdf_bytes: &[u8],
    page: u32,
    dpi: u32,
) -> Result<Vec<u8>, NormalizeError> {
    let pdf_path = temp_pdf(pdf_bytes, "render")?;
    let output_prefix =
        std::env::temp_dir().join(format!("offerflow_page_{}", uuid::Uuid::new_v4()));

    let output = Command::new("pdftoppm")
        .args(["-png", "-r", &dpi.to_string()])
        .args(["-f", &page.to_string(), "-l", &page.to_string()])
        .arg(&pdf_path)
        .arg(&output_prefix)
        .output();
    let _ = std::fs::remove_file(&pdf_path);

    let output = output.map_err(|e| {
        NormalizeError::PdfProcessing(format!(
            "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
            e
        ))
    })?;
    if !output.status.success() {
        return Err(NormalizeError::PdfProcessing(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // pdftoppm zero-pads the page suffix depending on the document's page count.
    let prefix = output_prefix.display();
    let image_path = [
        format!("{}-{}.png", prefix, page),
        format!("{}-{:02}.png", prefix, page),
        format!("{}-{:03}.png", prefix, page),
    ]
    .into_iter()
    .find(|p| Path::new(p).exists())
    .ok_or_else(|| NormalizeError::PdfProcessing("Failed to find rendered page image".into()))?;

    let image_data = std::fs::read(&image_path).map_err(|e| {
        NormalizeError::PdfProcessing(format!("Failed to read rendered image: {}", e))
    })?;
    let _ = std::fs::remove_file(&image_path);

    Ok(image_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Document, Object, Stream};
    use tempfile::NamedTempFile;

    fn single_page_pdf(text: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET", text);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_supports_only_pdf() {
        let extractor = PdfExtractor::new(None);
        assert!(extractor.supports(AttachmentFormat::Pdf));
        assert!(!extractor.supports(AttachmentFormat::Image));
        assert!(!extractor.supports(AttachmentFormat::Word));
    }

    #[test]
    fn test_extracts_pages_with_embedded_text() {
        let mut file = NamedTempFile::with_suffix(".pdf").unwrap();
        std::io::Write::write_all(&mut file, &single_page_pdf("Steel coil DX51D offer")).unwrap();

        let content = PdfExtractor::new(None).extract(file.path()).unwrap();
        let ExtractedContent::Document(doc) = content else {
            panic!("expected a document");
        };
        assert_eq!(doc["pageCount"], 1);
        assert_eq!(doc["pages"][0]["pageNumber"], 1);
        assert!(doc["pages"][0]["textContent"].is_string());
        assert!(doc["ocrContent"].is_null());
    }

    #[test]
    fn test_corrupted_pdf_without_ocr() {
        let file = NamedTempFile::with_suffix(".pdf").unwrap();
        std::fs::write(file.path(), b"not a valid pdf").unwrap();

        match PdfExtractor::new(None).extract(file.path()) {
            Err(NormalizeError::PdfProcessing(msg)) => {
                assert!(msg.contains("Failed to load PDF"), "unexpected message: {}", msg)
            }
            other => panic!("expected PdfProcessing, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            PdfExtractor::new(None).extract(Path::new("/nonexistent/offer.pdf")),
            Err(NormalizeError::ReadAttachment { .. })
        ));
    }

    #[test]
    fn test_should_use_ocr() {
        assert!(should_use_ocr(""));
        assert!(should_use_ocr("   \n  "));
        assert!(should_use_ocr("?Identity-H Unimplemented?\n?Identity-H Unimplemented?"));
        assert!(!should_use_ocr("Oferta handlowa nr 12/2024"));
        assert!(should_use_ocr(&"#$%^&*()".repeat(10)));
        assert!(!should_use_ocr("ąęśćżźółń gatunek S235JR grubość 2mm"));
    }
}
