//! Structured extraction over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, Instrument};

use super::json::recover_json_object;
use super::record::OfferRecord;
use crate::config::ExtractionConfig;
use crate::email::{token_provider_from_config, TokenProvider};
use crate::error::ExtractionError;
use crate::pipeline::CombinedRecord;

const MAX_ERROR_BODY_LENGTH: usize = 500;
const TEMPERATURE: f32 = 0.3;

const SYSTEM_PROMPT: &str = "\
You analyse commercial offers for steel and metal products and return a structured summary.

Rules:
1. Use only information explicitly present in the input. Never guess.
2. Use null for anything missing. Never omit a field.
3. Never move data between fields; fill each field only with data meant for it.
4. Dimensions (thickness, width, length) are in millimetres: a single number, or a
   two-element array [min, max] when a range is given (e.g. \"min. 280 - max 300\").
5. Numeric values must be JSON numbers, not strings.
6. If the supplier is not named, derive it from the sender's mail domain.
7. Product fields: nameOfProduct (e.g. \"steel sheet\"), material (often under
   \"Commodity\"), grade (e.g. \"HC220\"), surface (finish or standard class such as A, B,
   C), metalCoating, paintCoating, manufacturer, price {net, gross}, quantity.
8. offerDetails: currency, deliveryTerms (e.g. \"CIP Gdansk\"), deliveryDate (e.g.
   \"Sept/Oct\"), paymentTerms (e.g. \"60 days date of invoice\"), totalQuantity.

Answer with a single JSON object and nothing else, shaped like:
{\"supplier\": {\"name\", \"location\", \"contact\"}, \"customer\": {\"name\", \"location\"},
 \"offerNumber\", \"offerDate\", \"offerDetails\": {...}, \"products\": [{...}]}";

/// Turns a combined record into an [`OfferRecord`].
#[async_trait]
pub trait OfferExtractor: Send + Sync {
    async fn summarize(&self, record: &CombinedRecord) -> Result<OfferRecord, ExtractionError>;
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    system_prompt: &'a str,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
}

/// Posts a prompt to a text-generation endpoint and parses the generated JSON.
///
/// The response body must carry the generated text under `output`, either as one
/// string or as an array of string chunks.
pub struct HttpOfferExtractor {
    client: Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpOfferExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let tokens = token_provider_from_config(&config.auth)
            .map_err(|e| ExtractionError::Credentials(e.to_string()))?;
        Self::with_token_provider(config, Arc::from(tokens))
    }

    pub fn with_token_provider(
        config: &ExtractionConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ExtractionError::from_reqwest)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            tokens,
        })
    }

    async fn generate(&self, prompt: String) -> Result<String, ExtractionError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| ExtractionError::Credentials(e.to_string()))?;

        let request = GenerationRequest {
            model: &self.model,
            system_prompt: SYSTEM_PROMPT,
            prompt,
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(ExtractionError::from_reqwest)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ExtractionError::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ExtractionError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))?;
        generated_text(&body)
    }
}

#[async_trait]
impl OfferExtractor for HttpOfferExtractor {
    async fn summarize(&self, record: &CombinedRecord) -> Result<OfferRecord, ExtractionError> {
        let span = info_span!("extract.offer", email_id = %record.email_id);
        async {
            let text = self.generate(build_prompt(record)).await?;
            debug!(chars = text.len(), "received generated text");

            let value = recover_json_object(&text).map_err(ExtractionError::InvalidJson)?;
            let offer: OfferRecord = serde_json::from_value(value)
                .map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;

            info!(products = offer.products.len(), "offer extracted");
            Ok(offer.clean())
        }
        .instrument(span)
        .await
    }
}

/// Instruction-free user prompt: the message, its attachment names and their data.
pub fn build_prompt(record: &CombinedRecord) -> String {
    let attachments =
        serde_json::to_string_pretty(&record.attachments).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Analyse the offer below and produce the structured summary.\n\n\
         Email subject: {}\n\
         Email body: {}\n\
         Attachments: {}\n\n\
         Attachment data (if any):\n{}",
        record.subject,
        record.body,
        record.attachment_names().join(", "),
        attachments
    )
}

fn generated_text(body: &Value) -> Result<String, ExtractionError> {
    match body.get("output") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Array(chunks)) => chunks
            .iter()
            .map(|chunk| {
                chunk.as_str().ok_or_else(|| {
                    ExtractionError::InvalidResponse("non-string output chunk".to_string())
                })
            })
            .collect::<Result<String, _>>(),
        Some(other) => Err(ExtractionError::InvalidResponse(format!(
            "unexpected output type: {}",
            other
        ))),
        None => Err(ExtractionError::InvalidResponse(
            "response has no 'output' field".to_string(),
        )),
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}
