use std::path::Path;

use image::GenericImageView;
use serde_json::json;

use crate::error::NormalizeError;
use crate::normalizer::ocr::OcrEngine;
use crate::normalizer::{read_file, AttachmentFormat, ExtractedContent, TextExtractor};

/// Image dimensions plus OCR text (`null` when OCR is disabled).
pub struct ImageExtractor {
    ocr: Option<OcrEngine>,
}

impl ImageExtractor {
    pub fn new(ocr: Option<OcrEngine>) -> Self {
        Self { ocr }
    }
}

impl TextExtractor for ImageExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedContent, NormalizeError> {
        let _span = tracing::info_span!("normalize.image").entered();

        let data = read_file(path)?;
        let img = image::load_from_memory(&data)
            .map_err(|e| NormalizeError::ImageProcessing(format!("Failed to load image: {}", e)))?;
        let (width, height) = img.dimensions();

        let ocr_text = match &self.ocr {
            Some(ocr) => Some(ocr.recognize(&data)?.trim().to_string()),
            None => None,
        };

        Ok(ExtractedContent::Document(json!({
            "width": width,
            "height": height,
            "colorType": format!("{:?}", img.color()),
            "ocrText": ocr_text,
        })))
    }

    fn supports(&self, format: AttachmentFormat) -> bool {
        matches!(format, AttachmentFormat::Image)
    }
}
