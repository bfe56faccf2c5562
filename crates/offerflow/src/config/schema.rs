use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub spam: SpamConfig,
    pub extraction: ExtractionConfig,
    pub export: ExportConfig,
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_imap_host")]
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    pub auth: MailboxAuth,
    /// IMAP IDLE is re-issued before servers drop it (RFC 2177 allows 29 minutes).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How far back `--reset` looks for messages to mark unseen again.
    #[serde(default = "default_reset_window_days")]
    pub reset_window_days: u32,
}

fn default_imap_host() -> String {
    "imap.gmail.com".to_string()
}

fn default_imap_port() -> u16 {
    993
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    25 * 60
}

fn default_reset_window_days() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MailboxAuth {
    Password { password: SecretSource },
    Oauth2(OAuth2Credentials),
}

/// Refresh-token credentials for an OAuth2 token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Credentials {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    pub client_id: SecretSource,
    pub client_secret: SecretSource,
    pub refresh_token: SecretSource,
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Bearer-token source for the HTTP collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenAuth {
    Static { token: SecretSource },
    Oauth2(OAuth2Credentials),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_admission_retry_ms")]
    pub admission_retry_ms: u64,
}

fn default_max_workers() -> usize {
    2
}

fn default_admission_retry_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            admission_retry_ms: default_admission_retry_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_true() -> bool {
    true
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: default_languages(),
            dpi: default_dpi(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamConfig {
    #[serde(default = "default_spam_keywords")]
    pub keywords: Vec<String>,
}

pub fn default_spam_keywords() -> Vec<String> {
    [
        "alert",
        "security",
        "spam",
        "phishing",
        "Privacy Checkup",
        "privacycheckup",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            keywords: default_spam_keywords(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Completion endpoint that accepts `{model, prompt, ...}` and returns generated text.
    pub endpoint: String,
    pub model: String,
    pub auth: TokenAuth,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_extraction_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub spreadsheet_id: String,
    #[serde(default = "default_template_sheet")]
    pub template_sheet: String,
    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,
    pub auth: TokenAuth,
}

fn default_template_sheet() -> String {
    "Template".to_string()
}

fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}
