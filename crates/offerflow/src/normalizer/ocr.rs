use std::io::Cursor;
use std::sync::Arc;

use crate::error::NormalizeError;

/// Tesseract OCR, shared by the PDF and image extractors.
#[derive(Clone)]
pub struct OcrEngine {
    inner: Arc<OcrSettings>,
}

struct OcrSettings {
    /// Tesseract language string, e.g. `pol+eng`.
    languages: String,
    dpi: u32,
}

impl OcrEngine {
    pub fn new(languages: &[String], dpi: u32) -> Self {
        let languages = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };

        Self {
            inner: Arc::new(OcrSettings { languages, dpi }),
        }
    }

    pub fn dpi(&self) -> u32 {
        self.inner.dpi
    }

    pub fn languages(&self) -> &str {
        &self.inner.languages
    }

    /// Recognizes text in an encoded image (any format the `image` crate can decode).
    pub fn recognize(&self, image_data: &[u8]) -> Result<String, NormalizeError> {
        let _span = tracing::info_span!("normalize.ocr").entered();

        let img = image::load_from_memory(image_data)
            .map_err(|e| NormalizeError::OcrFailed(format!("Failed to load image: {}", e)))?;

        // leptess only takes encoded bytes, so JPEGs are re-encoded as PNG first.
        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| NormalizeError::OcrFailed(format!("Failed to convert image: {}", e)))?;

        let mut tesseract = leptess::LepTess::new(None, &self.inner.languages).map_err(|e| {
            NormalizeError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;
        tesseract.set_image_from_mem(&png_data).map_err(|e| {
            NormalizeError::OcrFailed(format!("Failed to set image for OCR: {}", e))
        })?;

        tesseract
            .get_utf8_text()
            .map_err(|e| NormalizeError::OcrFailed(format!("OCR failed: {}", e)))
    }
}
