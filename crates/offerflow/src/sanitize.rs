//! Helpers for sanitizing data before it reaches disk or tracing span attributes.
//!
//! Logs double as the only operator surface of the pipeline, so span fields carry
//! file names instead of full paths and masked mailbox addresses.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks the local part of an email address, keeping the first character and the domain.
///
/// - `jane.doe@example.com` → `j***@example.com`
/// - `not-an-address` → `***`
pub fn redact_address(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

/// Makes an attachment filename safe to use inside a working directory.
///
/// Path separators and control characters are replaced so a crafted name can never
/// escape the directory it is written to.
pub fn sanitize_filename(filename: &str) -> String {
    let filename = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();

    let filename = filename.trim_matches(|c| c == '.' || c == ' ');

    if filename.is_empty() {
        return "attachment".to_string();
    }

    if filename.chars().count() > 200 {
        let (stem, ext) = split_extension(filename);
        let stem: String = stem.chars().take(200 - ext.chars().count().min(20)).collect();
        return format!("{}{}", stem, ext);
    }

    filename.to_string()
}

/// Splits `name.ext` into (`name`, `.ext`); names without a dot get an empty extension.
pub fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    }
}
