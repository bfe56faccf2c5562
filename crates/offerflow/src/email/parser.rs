//! Message content extraction and the attachment allow-list.

use log::debug;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};

use super::error::{EmailError, Result};
use crate::sanitize::{sanitize_filename, split_extension};

const GENERIC_MIME_TYPE: &str = "application/octet-stream";

const ALLOWED_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".csv", ".png", ".jpg", ".jpeg",
];

/// Allowed MIME types, each with the extension whose extractor handles it.
const ALLOWED_MIME_TYPES: &[(&str, &str)] = &[
    ("application/pdf", ".pdf"),
    ("application/msword", ".doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".docx",
    ),
    ("application/vnd.ms-excel", ".xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".xlsx",
    ),
    ("text/csv", ".csv"),
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
];

/// The extension that stands in for `mime_type` when choosing an extractor.
fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    ALLOWED_MIME_TYPES
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(mime_type))
        .map(|(_, ext)| *ext)
}

/// Subject and body text of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    pub subject: String,
    pub body: String,
}

/// A part with `Content-Disposition: attachment`.
#[derive(Debug, Clone)]
pub struct AttachmentPart {
    /// Sanitized, safe to join onto a working directory.
    pub filename: String,
    /// Lower-cased `type/subtype`.
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl AttachmentPart {
    /// Lower-cased extension, including the dot, that selects the extractor.
    ///
    /// A filename extension off the allow-list defers to the MIME type, so `cennik`
    /// sent as `text/csv` is read as CSV.
    pub fn extension(&self) -> String {
        let from_name = split_extension(&self.filename).1.to_ascii_lowercase();
        if ALLOWED_EXTENSIONS.contains(&from_name.as_str()) {
            return from_name;
        }
        extension_for_mime(&self.mime_type)
            .map(str::to_string)
            .unwrap_or(from_name)
    }
}

#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub content: MessageContent,
    pub attachments: Vec<AttachmentPart>,
    pub from: Option<String>,
}

/// Decides which attachments enter the pipeline.
///
/// A part is allowed when its extension is on the list or its MIME type is. The
/// generic `application/octet-stream` never allows a part on its own.
#[derive(Debug, Clone)]
pub struct AttachmentPolicy {
    extensions: Vec<String>,
    mime_types: Vec<String>,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            extensions: ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            mime_types: ALLOWED_MIME_TYPES
                .iter()
                .map(|(mime, _)| mime.to_string())
                .collect(),
        }
    }
}

impl AttachmentPolicy {
    pub fn is_allowed(&self, filename: &str, mime_type: &str) -> bool {
        let extension = split_extension(filename).1.to_ascii_lowercase();
        if !extension.is_empty() && self.extensions.iter().any(|e| *e == extension) {
            return true;
        }

        let mime_type = mime_type.to_ascii_lowercase();
        mime_type != GENERIC_MIME_TYPE && self.mime_types.iter().any(|m| *m == mime_type)
    }
}

/// Pulls subject, body and attachment parts out of raw RFC 822 bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageContentExtractor;

impl MessageContentExtractor {
    pub fn extract(&self, raw: &[u8]) -> Result<ParsedMessage> {
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| EmailError::ParseError("Failed to parse email message".to_string()))?;
        if message.parts.first().map_or(true, |root| root.headers.is_empty()) {
            return Err(EmailError::ParseError("Message has no headers".to_string()));
        }

        let content = MessageContent {
            subject: message.subject().unwrap_or_default().trim().to_string(),
            // Falls back to the HTML part rendered as text when there is no plain part.
            body: message
                .body_text(0)
                .map(|b| b.trim().to_string())
                .unwrap_or_default(),
        };

        let attachments: Vec<AttachmentPart> = message
            .parts
            .iter()
            .filter(|part| is_attachment(part))
            .filter_map(attachment_part)
            .collect();

        debug!(
            "Parsed message subject={:?} attachments={}",
            content.subject,
            attachments.len()
        );

        Ok(ParsedMessage {
            content,
            attachments,
            from: sender(&message),
        })
    }
}

fn is_attachment(part: &MessagePart) -> bool {
    part.content_disposition()
        .map(|d| d.ctype().eq_ignore_ascii_case("attachment"))
        .unwrap_or(false)
}

fn attachment_part(part: &MessagePart) -> Option<AttachmentPart> {
    let content = match &part.body {
        PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
        PartType::Text(text) | PartType::Html(text) => text.as_bytes().to_vec(),
        PartType::Message(_) | PartType::Multipart(_) => return None,
    };

    let declared_type = part.content_type().map(|ct| match ct.subtype() {
        Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
        None => ct.ctype().to_string(),
    });

    let raw_name = part
        .attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .filter(|name| !name.trim().is_empty());

    let filename = match raw_name {
        Some(name) => sanitize_filename(name),
        None => {
            let extension = declared_type
                .as_deref()
                .and_then(extension_for_mime)
                .map(str::to_string)
                .or_else(|| {
                    declared_type
                        .as_deref()
                        .and_then(mime_guess::get_mime_extensions_str)
                        .and_then(|exts| exts.first())
                        .map(|ext| format!(".{}", ext))
                })
                .unwrap_or_default();
            format!("attachment{}", extension)
        }
    };

    let mime_type = declared_type
        .filter(|m| !m.eq_ignore_ascii_case(GENERIC_MIME_TYPE))
        .unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_raw()
                .unwrap_or(GENERIC_MIME_TYPE)
                .to_string()
        })
        .to_ascii_lowercase();

    Some(AttachmentPart {
        filename,
        mime_type,
        content,
    })
}

fn sender(message: &Message) -> Option<String> {
    message
        .from()
        .and_then(|addr| addr.first())
        .and_then(|addr| addr.address())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "From: Jan Kowalski <jan@stal.example>\r\n\
To: offers@example.com\r\n\
Subject: Oferta blach\r\n\
Message-ID: <abc@stal.example>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Dzień dobry, w załączeniu oferta.\r\n";

    fn multipart(parts: &[(&str, &str, &str)]) -> String {
        let mut raw = String::from(
            "From: sales@supplier.example\r\n\
Subject: Invoice #123\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
See attached\r\n",
        );
        for (disposition, content_type, body) in parts {
            raw.push_str("--XYZ\r\n");
            raw.push_str(&format!("Content-Type: {}\r\n", content_type));
            raw.push_str(&format!("Content-Disposition: {}\r\n\r\n", disposition));
            raw.push_str(body);
            raw.push_str("\r\n");
        }
        raw.push_str("--XYZ--\r\n");
        raw
    }

    #[test]
    fn test_plain_message_content() {
        let parsed = MessageContentExtractor.extract(PLAIN.as_bytes()).unwrap();
        assert_eq!(parsed.content.subject, "Oferta blach");
        assert_eq!(parsed.content.body, "Dzień dobry, w załączeniu oferta.");
        assert!(parsed.attachments.is_empty());
        assert_eq!(parsed.from.as_deref(), Some("jan@stal.example"));
    }

    #[test]
    fn test_headerless_input_is_rejected() {
        assert!(MessageContentExtractor.extract(b"").is_err());
        assert!(MessageContentExtractor.extract(b"\r\n\r\n").is_err());
    }

    #[test]
    fn test_missing_subject_is_empty() {
        let raw = "From: a@b.example\r\nContent-Type: text/plain\r\n\r\nbody only\r\n";
        let parsed = MessageContentExtractor.extract(raw.as_bytes()).unwrap();
        assert_eq!(parsed.content.subject, "");
        assert_eq!(parsed.content.body, "body only");
    }

    #[test]
    fn test_attachments_exclude_inline_parts() {
        let raw = multipart(&[
            ("attachment; filename=\"x.csv\"", "text/csv", "a,b\n1,2"),
            ("inline; filename=\"logo.png\"", "image/png", "not really png"),
        ]);
        let parsed = MessageContentExtractor.extract(raw.as_bytes()).unwrap();

        assert_eq!(parsed.content.subject, "Invoice #123");
        assert_eq!(parsed.content.body, "See attached");
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename, "x.csv");
        assert_eq!(parsed.attachments[0].mime_type, "text/csv");
        assert_eq!(parsed.attachments[0].extension(), ".csv");
        assert!(String::from_utf8_lossy(&parsed.attachments[0].content).contains("1,2"));
    }

    #[test]
    fn test_attachment_filename_is_sanitized() {
        let raw = multipart(&[(
            "attachment; filename=\"../../etc/passwd.pdf\"",
            "application/pdf",
            "%PDF-1.4",
        )]);
        let parsed = MessageContentExtractor.extract(raw.as_bytes()).unwrap();
        let filename = &parsed.attachments[0].filename;
        assert!(!filename.contains('/'));
        assert!(filename.ends_with("passwd.pdf"));
    }

    #[test]
    fn test_unnamed_attachment_gets_extension_from_mime() {
        let raw = multipart(&[("attachment", "application/pdf", "%PDF-1.4")]);
        let parsed = MessageContentExtractor.extract(raw.as_bytes()).unwrap();
        assert_eq!(parsed.attachments[0].filename, "attachment.pdf");
    }

    #[test]
    fn test_unnamed_attachment_uses_allow_list_extension() {
        let raw = multipart(&[
            ("attachment", "image/jpeg", "jpeg bytes"),
            ("attachment", "application/vnd.ms-excel", "xls bytes"),
        ]);
        let parsed = MessageContentExtractor.extract(raw.as_bytes()).unwrap();
        assert_eq!(parsed.attachments[0].filename, "attachment.jpg");
        assert_eq!(parsed.attachments[1].filename, "attachment.xls");
    }

    #[test]
    fn test_extension_falls_back_to_mime_type() {
        let part = |filename: &str, mime_type: &str| AttachmentPart {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            content: Vec::new(),
        };
        assert_eq!(part("cennik", "text/csv").extension(), ".csv");
        assert_eq!(part("oferta.dat", "application/pdf").extension(), ".pdf");
        assert_eq!(part("Skan.JPEG", "application/pdf").extension(), ".jpeg");
        assert_eq!(part("notes.txt", "text/plain").extension(), ".txt");
    }

    #[test]
    fn test_generic_mime_is_guessed_from_filename() {
        let raw = multipart(&[(
            "attachment; filename=\"cennik.xlsx\"",
            "application/octet-stream",
            "PK",
        )]);
        let parsed = MessageContentExtractor.extract(raw.as_bytes()).unwrap();
        assert_eq!(
            parsed.attachments[0].mime_type,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
    }

    #[test]
    fn test_policy_allows_known_extensions() {
        let policy = AttachmentPolicy::default();
        assert!(policy.is_allowed("offer.PDF", "application/octet-stream"));
        assert!(policy.is_allowed("prices.csv", "text/plain"));
        assert!(policy.is_allowed("scan.jpeg", "image/jpeg"));
    }

    #[test]
    fn test_policy_allows_known_mime_without_extension() {
        let policy = AttachmentPolicy::default();
        assert!(policy.is_allowed("offer", "application/pdf"));
        assert!(policy.is_allowed("offer", "Image/PNG"));
    }

    #[test]
    fn test_policy_rejects_everything_else() {
        let policy = AttachmentPolicy::default();
        assert!(!policy.is_allowed("setup.exe", "application/x-msdownload"));
        assert!(!policy.is_allowed("archive.zip", "application/zip"));
        assert!(!policy.is_allowed("blob", "application/octet-stream"));
        assert!(!policy.is_allowed("anim.gif", "image/gif"));
    }
}
