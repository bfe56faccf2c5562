//! Builders for test messages and offers.

#![allow(dead_code)]

use base64::Engine;
use serde_json::{json, Value};

use offerflow::email::RawMessage;
use offerflow::offer::OfferRecord;

const BOUNDARY: &str = "offerflow-test-boundary";

struct Part {
    filename: String,
    mime_type: String,
    content: Vec<u8>,
    inline: bool,
}

/// Builds a multipart RFC 822 message. Attachments are base64 encoded.
pub struct MessageBuilder {
    uid: u32,
    from: String,
    subject: Option<String>,
    body: String,
    parts: Vec<Part>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self {
            uid: 1,
            from: "Handlowiec <sales@stal.example>".to_string(),
            subject: Some("Oferta".to_string()),
            body: "W załączeniu oferta.".to_string(),
            parts: Vec::new(),
        }
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn without_subject(mut self) -> Self {
        self.subject = None;
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn attachment(mut self, filename: &str, mime_type: &str, content: &[u8]) -> Self {
        self.parts.push(Part {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            content: content.to_vec(),
            inline: false,
        });
        self
    }

    /// An attachment without any file name; only its MIME type identifies it.
    pub fn unnamed_attachment(self, mime_type: &str, content: &[u8]) -> Self {
        self.attachment("", mime_type, content)
    }

    /// An inline part, e.g. a logo in the signature. Never treated as an attachment.
    pub fn inline(mut self, filename: &str, mime_type: &str, content: &[u8]) -> Self {
        self.parts.push(Part {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            content: content.to_vec(),
            inline: true,
        });
        self
    }

    pub fn build_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("From: {}\r\n", self.from));
        out.push_str("To: offers@example.com\r\n");
        if let Some(subject) = &self.subject {
            out.push_str(&format!("Subject: {}\r\n", subject));
        }
        out.push_str("Message-ID: <test@offerflow>\r\n");
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
            BOUNDARY
        ));

        out.push_str(&format!("--{}\r\n", BOUNDARY));
        out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        out.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
        out.push_str(&self.body);
        out.push_str("\r\n");

        for part in &self.parts {
            let disposition = if part.inline { "inline" } else { "attachment" };
            out.push_str(&format!("--{}\r\n", BOUNDARY));
            if part.filename.is_empty() {
                out.push_str(&format!("Content-Type: {}\r\n", part.mime_type));
                out.push_str(&format!("Content-Disposition: {}\r\n", disposition));
            } else {
                out.push_str(&format!(
                    "Content-Type: {}; name=\"{}\"\r\n",
                    part.mime_type, part.filename
                ));
                out.push_str(&format!(
                    "Content-Disposition: {}; filename=\"{}\"\r\n",
                    disposition, part.filename
                ));
            }
            out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
            out.push_str(&base64::engine::general_purpose::STANDARD.encode(&part.content));
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{}--\r\n", BOUNDARY));
        out.into_bytes()
    }

    pub fn build(&self) -> RawMessage {
        RawMessage {
            uid: self.uid,
            bytes: self.build_bytes(),
        }
    }
}

/// An offer as the extraction service would describe it.
pub struct OfferBuilder {
    value: Value,
}

impl OfferBuilder {
    pub fn new() -> Self {
        Self {
            value: json!({
                "supplier": { "name": "Stalprofil S.A.", "location": "Dąbrowa Górnicza" },
                "customer": { "name": "Budmat" },
                "offerNumber": "OF/2024/117",
                "offerDate": "2024-05-06",
                "offerDetails": { "currency": "PLN", "paymentTerms": "14 dni" },
                "products": [{
                    "nameOfProduct": "Blacha ocynkowana",
                    "material": "DX51D",
                    "thickness": 0.5,
                    "width": [1000, 1250],
                    "price": { "net": 4200 },
                    "quantity": 12
                }]
            }),
        }
    }

    pub fn supplier(mut self, name: &str) -> Self {
        self.value["supplier"]["name"] = json!(name);
        self
    }

    pub fn offer_number(mut self, number: &str) -> Self {
        self.value["offerNumber"] = json!(number);
        self
    }

    pub fn json(&self) -> Value {
        self.value.clone()
    }

    pub fn build(&self) -> OfferRecord {
        serde_json::from_value(self.value.clone()).expect("builder produces a valid offer")
    }
}
