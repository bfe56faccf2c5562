//! Attachment normalization: one saved attachment in, one `<stem>_processed.json` out.
//!
//! Dispatch is a closed [`AttachmentFormat`] enum; every format is served by one
//! [`TextExtractor`]. The normalizer itself only dispatches, wraps errors uniformly and
//! writes the processed sibling file.

pub mod csv;
pub mod docx;
pub mod image;
pub mod ocr;
pub mod pdf;
pub mod spreadsheet;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info_span};

use crate::config::OcrConfig;
use crate::error::NormalizeError;
use crate::sanitize::{redact_path, split_extension};

pub const PROCESSED_SUFFIX: &str = "_processed.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentFormat {
    Pdf,
    /// Office Open XML (`.docx`).
    Word,
    /// Binary Word 97-2003 (`.doc`).
    LegacyWord,
    /// `.xls` and `.xlsx` workbooks.
    Spreadsheet,
    Csv,
    Image,
    Unsupported,
}

impl AttachmentFormat {
    /// Case-insensitive; accepts the extension with or without a leading dot.
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Word,
            "doc" => Self::LegacyWord,
            "xls" | "xlsx" => Self::Spreadsheet,
            "csv" => Self::Csv,
            "png" | "jpg" | "jpeg" => Self::Image,
            _ => Self::Unsupported,
        }
    }
}

/// What an extractor produced for one file.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedContent {
    Text(String),
    /// Tabular data, one JSON object per row keyed by the header row.
    Rows(Vec<Map<String, Value>>),
    /// Format-specific structured output (PDF pages, image metadata).
    Document(Value),
}

impl ExtractedContent {
    pub fn into_json(self) -> Value {
        match self {
            Self::Text(text) => Value::String(text),
            Self::Rows(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
            Self::Document(value) => value,
        }
    }
}

/// Contents of a `<stem>_processed.json` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedAttachment {
    pub filename: String,
    pub format: AttachmentFormat,
    pub content: Value,
}

#[derive(Debug, Clone)]
pub struct NormalizedAttachment {
    pub processed_path: PathBuf,
    pub processed: ProcessedAttachment,
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedContent, NormalizeError>;
    fn supports(&self, format: AttachmentFormat) -> bool;
}

pub struct AttachmentNormalizer {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl AttachmentNormalizer {
    pub fn new(ocr_config: &OcrConfig) -> Self {
        let ocr = ocr_config
            .enabled
            .then(|| ocr::OcrEngine::new(&ocr_config.languages, ocr_config.dpi));

        Self::with_extractors(vec![
            Box::new(pdf::PdfExtractor::new(ocr.clone())),
            Box::new(docx::DocxExtractor),
            Box::new(spreadsheet::SpreadsheetExtractor),
            Box::new(csv::CsvExtractor),
            Box::new(image::ImageExtractor::new(ocr)),
        ])
    }

    pub fn with_extractors(extractors: Vec<Box<dyn TextExtractor>>) -> Self {
        Self { extractors }
    }

    /// Extracts `path` and writes the processed sibling next to it.
    ///
    /// Blocking: callers on the async runtime go through `spawn_blocking`.
    pub fn normalize(
        &self,
        path: &Path,
        extension: &str,
    ) -> Result<NormalizedAttachment, NormalizeError> {
        let format = AttachmentFormat::from_extension(extension);
        let _span = info_span!("normalize", file = %redact_path(path), ?format).entered();

        if format == AttachmentFormat::Unsupported {
            return Err(NormalizeError::UnsupportedFormat(extension.to_string()));
        }

        let extractor = self
            .extractors
            .iter()
            .find(|e| e.supports(format))
            .ok_or_else(|| NormalizeError::UnsupportedFormat(extension.to_string()))?;

        let content = extractor.extract(path)?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let processed = ProcessedAttachment {
            filename: filename.clone(),
            format,
            content: content.into_json(),
        };

        let processed_path = path.with_file_name(processed_file_name(&filename));
        let bytes = serde_json::to_vec_pretty(&processed)
            .map_err(|e| NormalizeError::WriteOutput {
                path: processed_path.clone(),
                source: e.into(),
            })?;
        std::fs::write(&processed_path, bytes).map_err(|source| NormalizeError::WriteOutput {
            path: processed_path.clone(),
            source,
        })?;

        debug!(output = %redact_path(&processed_path), "attachment normalized");
        Ok(NormalizedAttachment {
            processed_path,
            processed,
        })
    }
}

/// `offer.pdf` → `offer_processed.json`.
pub fn processed_file_name(filename: &str) -> String {
    let (stem, _) = split_extension(filename);
    format!("{}{}", stem, PROCESSED_SUFFIX)
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, NormalizeError> {
    std::fs::read(path).map_err(|source| NormalizeError::ReadAttachment {
        path: path.to_path_buf(),
        source,
    })
}
