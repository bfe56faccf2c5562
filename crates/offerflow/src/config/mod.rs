pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    Config, ExportConfig, ExtractionConfig, MailboxAuth, MailboxConfig, OAuth2Credentials,
    OcrConfig, SpamConfig, TokenAuth, WorkerConfig,
};
