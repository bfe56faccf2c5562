use std::path::Path;

use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::normalizer::{read_file, AttachmentFormat, ExtractedContent, TextExtractor};

/// RFC 4180 CSV with `,` or `;` delimiters (the latter is common in Polish exports).
///
/// Rows come out keyed by the header row. Empty cells are omitted and numeric-looking
/// cells become JSON numbers, which matches the spreadsheet extractor.
pub struct CsvExtractor;

impl TextExtractor for CsvExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedContent, NormalizeError> {
        let _span = tracing::info_span!("normalize.csv").entered();

        let bytes = read_file(path)?;
        let text = decode(&bytes);
        let records = parse_records(&text, detect_delimiter(&text))?;
        Ok(ExtractedContent::Rows(rows_from_records(records)))
    }

    fn supports(&self, format: AttachmentFormat) -> bool {
        matches!(format, AttachmentFormat::Csv)
    }
}

/// UTF-8 with the BOM stripped; invalid sequences are replaced, not rejected.
fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Picks whichever of `;` and `,` occurs more often outside quotes in the first line.
fn detect_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or_default();
    let mut in_quotes = false;
    let (mut commas, mut semicolons) = (0usize, 0usize);
    for c in first_line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => commas += 1,
            ';' if !in_quotes => semicolons += 1,
            _ => {}
        }
    }
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Records of uneven length are kept; rows with only blank cells are dropped.
fn parse_records(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>, NormalizeError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| NormalizeError::SpreadsheetProcessing(format!("Invalid CSV: {}", e)))?;
        let fields: Vec<String> = record.iter().map(str::to_string).collect();
        if fields.iter().any(|f| !f.trim().is_empty()) {
            records.push(fields);
        }
    }
    Ok(records)
}

pub(crate) fn rows_from_records(records: Vec<Vec<String>>) -> Vec<Map<String, Value>> {
    let mut records = records.into_iter();
    let Some(header) = records.next() else {
        return Vec::new();
    };
    let header = header_keys(header.iter().map(|h| h.as_str()));

    records
        .map(|record| {
            header
                .iter()
                .zip(record)
                .filter(|(_, cell)| !cell.trim().is_empty())
                .map(|(key, cell)| (key.clone(), cell_value(cell.trim())))
                .collect()
        })
        .collect()
}

/// Header cells become row keys; blanks get positional names and repeats get a suffix.
pub(crate) fn header_keys<'a>(cells: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for (index, cell) in cells.enumerate() {
        let base = match cell.trim() {
            "" => format!("column_{}", index + 1),
            name => name.to_string(),
        };
        let mut key = base.clone();
        let mut n = 2;
        while keys.contains(&key) {
            key = format!("{}_{}", base, n);
            n += 1;
        }
        keys.push(key);
    }
    keys
}

/// `12`, `-3.5`, `1,25` (decimal comma) become numbers; everything else stays text.
fn cell_value(cell: &str) -> Value {
    let looks_numeric = cell
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '.' | ','))
        && cell.chars().any(|c| c.is_ascii_digit())
        && cell.matches([',', '.']).count() <= 1
        && !cell.starts_with('0')
        || cell == "0"
        || cell.starts_with("0.")
        || cell.starts_with("0,");

    if looks_numeric {
        if let Ok(int) = cell.parse::<i64>() {
            return Value::from(int);
        }
        if let Some(number) = cell
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            return Value::Number(number);
        }
    }
    Value::String(cell.to_string())
}
