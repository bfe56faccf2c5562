//! Google Sheets v4 exporter over plain REST.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, info_span, Instrument};

use super::{ExportReceipt, OfferExporter};
use crate::config::ExportConfig;
use crate::email::{token_provider_from_config, TokenProvider};
use crate::error::ExportError;
use crate::offer::{Dimension, OfferRecord};

const MAX_SHEET_TITLE: usize = 100;
const MAX_ERROR_BODY_LENGTH: usize = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const UNKNOWN_SUPPLIER: &str = "Unknown supplier";

const HEADER_LABELS: &[&str] = &[
    "Supplier Name",
    "Supplier Location",
    "Supplier Contact",
    "Customer Name",
    "Customer Location",
    "Offer Number",
    "Offer Date",
    "Currency",
    "Delivery Terms",
    "Delivery Date",
    "Payment Terms",
    "Total Quantity",
];

const PRODUCT_LABELS: &[&str] = &[
    "Name of Product",
    "Material",
    "Thickness",
    "Width",
    "Length",
    "Grade",
    "Surface",
    "Metal Coating",
    "Paint Coating",
    "Manufacturer",
    "Quantity",
    "Net Price",
    "Gross Price",
];

#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

/// Copies the template sheet for every offer and fills it in.
pub struct SheetsExporter {
    client: Client,
    api_base: String,
    spreadsheet_id: String,
    template_sheet: String,
    tokens: Arc<dyn TokenProvider>,
}

impl SheetsExporter {
    pub fn new(config: &ExportConfig) -> Result<Self, ExportError> {
        let tokens = token_provider_from_config(&config.auth)
            .map_err(|e| ExportError::Credentials(e.to_string()))?;
        Self::with_token_provider(config, Arc::from(tokens))
    }

    pub fn with_token_provider(
        config: &ExportConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, ExportError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExportError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            spreadsheet_id: config.spreadsheet_id.clone(),
            template_sheet: config.template_sheet.clone(),
            tokens,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ExportError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ExportError::InvalidResponse(format!("bad api_base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ExportError::InvalidResponse("api_base cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn call(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value, ExportError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| ExportError::Credentials(e.to_string()))?;

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token.expose_secret());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_LENGTH).collect(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| ExportError::InvalidResponse(e.to_string()))
    }

    async fn sheets(&self) -> Result<Vec<SheetProperties>, ExportError> {
        let mut url = self.url(&["spreadsheets", &self.spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let body = self.call(Method::GET, url, None).await?;
        let parsed: SpreadsheetResponse = serde_json::from_value(body)
            .map_err(|e| ExportError::InvalidResponse(e.to_string()))?;
        Ok(parsed.sheets.into_iter().map(|s| s.properties).collect())
    }

    async fn duplicate_template(&self, template_id: i64, title: &str) -> Result<i64, ExportError> {
        let url = self.url(&[
            "spreadsheets",
            &format!("{}:batchUpdate", self.spreadsheet_id),
        ])?;
        let body = json!({
            "requests": [{
                "duplicateSheet": {
                    "sourceSheetId": template_id,
                    "insertSheetIndex": 1,
                    "newSheetName": title,
                }
            }]
        });
        let response = self.call(Method::POST, url, Some(body)).await?;
        response
            .pointer("/replies/0/duplicateSheet/properties/sheetId")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                ExportError::InvalidResponse("batchUpdate reply has no new sheetId".to_string())
            })
    }

    async fn write_rows(&self, title: &str, rows: Vec<Vec<Value>>) -> Result<u64, ExportError> {
        let range = format!("'{}'!A1", title);
        let mut url = self.url(&["spreadsheets", &self.spreadsheet_id, "values", &range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": rows });
        let response = self.call(Method::PUT, url, Some(body)).await?;
        Ok(response
            .get("updatedCells")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl OfferExporter for SheetsExporter {
    async fn export(&self, offer: &OfferRecord) -> Result<ExportReceipt, ExportError> {
        let span = info_span!("export.sheets");
        async {
            let sheets = self.sheets().await?;
            let template_id = sheets
                .iter()
                .find(|s| s.title == self.template_sheet)
                .map(|s| s.sheet_id)
                .ok_or_else(|| ExportError::TemplateNotFound(self.template_sheet.clone()))?;

            let existing: Vec<&str> = sheets.iter().map(|s| s.title.as_str()).collect();
            let title = unique_title(offer, &existing);
            debug!(%title, "duplicating template sheet");

            let sheet_id = self.duplicate_template(template_id, &title).await?;
            let updated_cells = self.write_rows(&title, offer_to_rows(offer)).await?;

            info!(%title, sheet_id, updated_cells, "offer exported");
            Ok(ExportReceipt {
                sheet_title: title,
                sheet_id,
                updated_cells,
            })
        }
        .instrument(span)
        .await
    }
}

/// Sheet names may not contain `[ ] * ? / \ :` and are capped in length.
pub fn sanitize_sheet_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '[' | ']' | '*' | '?' | '/' | '\\' | ':' | '\'' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    let cleaned = if cleaned.is_empty() {
        UNKNOWN_SUPPLIER
    } else {
        cleaned
    };
    cleaned.chars().take(MAX_SHEET_TITLE).collect::<String>().trim_end().to_string()
}

/// Supplier name, disambiguated by offer number and then by timestamp.
fn unique_title(offer: &OfferRecord, existing: &[&str]) -> String {
    let base = sanitize_sheet_title(offer.supplier_name().unwrap_or(UNKNOWN_SUPPLIER));
    if !existing.contains(&base.as_str()) {
        return base;
    }
    if let Some(number) = offer.offer_number.as_deref() {
        let candidate = sanitize_sheet_title(&format!("{} {}", base, number));
        if !existing.contains(&candidate.as_str()) {
            return candidate;
        }
    }
    let stamp = chrono::Local::now().format("%Y-%m-%d %H%M%S");
    sanitize_sheet_title(&format!("{} {}", base, stamp))
}

/// The values written into a fresh sheet, row by row.
pub fn offer_to_rows(offer: &OfferRecord) -> Vec<Vec<Value>> {
    let details = &offer.offer_details;
    let mut rows = vec![
        labels(HEADER_LABELS),
        vec![
            text(&offer.supplier.name),
            text(&offer.supplier.location),
            text(&offer.supplier.contact),
            text(&offer.customer.name),
            text(&offer.customer.location),
            text(&offer.offer_number),
            text(&offer.offer_date),
            text(&details.currency),
            text(&details.delivery_terms),
            text(&details.delivery_date),
            text(&details.payment_terms),
            number(details.total_quantity),
        ],
        Vec::new(),
        vec![Value::from("Products")],
        labels(PRODUCT_LABELS),
    ];

    for product in &offer.products {
        let price = product.price.unwrap_or_default();
        rows.push(vec![
            text(&product.name_of_product),
            text(&product.material),
            dimension(product.thickness),
            dimension(product.width),
            dimension(product.length),
            text(&product.grade),
            text(&product.surface),
            text(&product.metal_coating),
            text(&product.paint_coating),
            text(&product.manufacturer),
            number(product.quantity),
            number(price.net),
            number(price.gross),
        ]);
    }
    rows
}

fn labels(labels: &[&str]) -> Vec<Value> {
    labels.iter().map(|l| Value::from(*l)).collect()
}

fn text(value: &Option<String>) -> Value {
    Value::from(value.clone().unwrap_or_default())
}

fn number(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(""))
}

fn dimension(value: Option<Dimension>) -> Value {
    match value {
        Some(Dimension::Single(v)) => number(Some(v)),
        Some(range) => Value::from(range.to_string()),
        None => Value::from(""),
    }
}
