use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::normalizer::csv::header_keys;
use crate::normalizer::{read_file, AttachmentFormat, ExtractedContent, TextExtractor};

/// First worksheet of an `.xls`/`.xlsx` workbook as header-keyed rows.
pub struct SpreadsheetExtractor;

impl TextExtractor for SpreadsheetExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedContent, NormalizeError> {
        let _span = tracing::info_span!("normalize.spreadsheet").entered();

        // Detected from content, since the file name may carry no extension.
        let bytes = read_file(path)?;
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| {
            NormalizeError::SpreadsheetProcessing(format!("Failed to open workbook: {}", e))
        })?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| NormalizeError::SpreadsheetProcessing("Workbook has no sheets".into()))?
            .map_err(|e| {
                NormalizeError::SpreadsheetProcessing(format!("Failed to read first sheet: {}", e))
            })?;

        Ok(ExtractedContent::Rows(rows_from_cells(
            range.rows().map(|row| row.to_vec()),
        )))
    }

    fn supports(&self, format: AttachmentFormat) -> bool {
        matches!(format, AttachmentFormat::Spreadsheet)
    }
}

fn rows_from_cells(rows: impl Iterator<Item = Vec<Data>>) -> Vec<Map<String, Value>> {
    let mut rows = rows.filter(|row| row.iter().any(|cell| !matches!(cell, Data::Empty)));
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let header_text: Vec<String> = header.iter().map(cell_to_string).collect();
    let keys = header_keys(header_text.iter().map(|h| h.as_str()));

    rows.map(|row| {
        keys.iter()
            .zip(row.iter())
            .filter_map(|(key, cell)| cell_to_json(cell).map(|value| (key.clone(), value)))
            .collect()
    })
    .collect()
}

/// Empty and error cells are omitted from the row.
fn cell_to_json(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.trim().is_empty() => None,
        Data::String(s) => Some(Value::String(s.trim().to_string())),
        Data::Int(n) => Some(Value::from(*n)),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Some(Value::from(*f as i64))
            } else {
                serde_json::Number::from_f64(*f).map(Value::Number)
            }
        }
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::DateTime(dt) => Some(Value::String(dt.to_string())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(Value::String(s.clone())),
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell_to_json(cell) {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
