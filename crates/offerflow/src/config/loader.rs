use std::path::Path;

use crate::config::schema::{Config, MailboxAuth, OAuth2Credentials, TokenAuth};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let errors: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.workers.max_workers == 0 {
        return Err(ConfigError::Validation {
            message: "workers.max_workers must be at least 1".to_string(),
        });
    }

    validate_url("extraction.endpoint", &config.extraction.endpoint)?;
    validate_url("export.api_base", &config.export.api_base)?;

    match &config.mailbox.auth {
        MailboxAuth::Password { password } => {
            require_source("mailbox.auth.password", password.is_configured())?
        }
        MailboxAuth::Oauth2(oauth2) => validate_oauth2("mailbox.auth", oauth2)?,
    }

    for (field, auth) in [
        ("extraction.auth", &config.extraction.auth),
        ("export.auth", &config.export.auth),
    ] {
        match auth {
            TokenAuth::Static { token } => {
                require_source(&format!("{}.token", field), token.is_configured())?
            }
            TokenAuth::Oauth2(oauth2) => validate_oauth2(field, oauth2)?,
        }
    }

    if config.spam.keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Validation {
            message: "spam.keywords must not contain blank entries".to_string(),
        });
    }

    Ok(())
}

fn validate_oauth2(field: &str, oauth2: &OAuth2Credentials) -> Result<(), ConfigError> {
    validate_url(&format!("{}.token_url", field), &oauth2.token_url)?;
    require_source(&format!("{}.client_id", field), oauth2.client_id.is_configured())?;
    require_source(
        &format!("{}.client_secret", field),
        oauth2.client_secret.is_configured(),
    )?;
    require_source(
        &format!("{}.refresh_token", field),
        oauth2.refresh_token.is_configured(),
    )
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value).map_err(|e| ConfigError::Validation {
        message: format!("{} is not a valid URL ({}): {}", field, e, value),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            message: format!("{} must use http or https: {}", field, value),
        });
    }
    Ok(())
}

fn require_source(field: &str, configured: bool) -> Result<(), ConfigError> {
    if configured {
        Ok(())
    } else {
        Err(ConfigError::Validation {
            message: format!("{} needs a non-empty value, file or env entry", field),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base_config() -> serde_json::Value {
        serde_json::json!({
            "version": "1.0",
            "mailbox": {
                "username": "offers@example.com",
                "auth": { "type": "password", "password": { "env": "IMAP_PASSWORD" } }
            },
            "extraction": {
                "endpoint": "https://llm.example.com/v1/predictions",
                "model": "meta/llama-3-70b-instruct",
                "auth": { "type": "static", "token": { "env": "EXTRACTION_TOKEN" } }
            },
            "export": {
                "spreadsheet_id": "1AbC",
                "auth": {
                    "type": "oauth2",
                    "client_id": { "value": "id" },
                    "client_secret": { "value": "secret" },
                    "refresh_token": { "env": "SHEETS_REFRESH_TOKEN" }
                }
            }
        })
    }

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let config = load_config_from_str(&base_config().to_string()).unwrap();
        assert_eq!(config.data_directory, PathBuf::from("data"));
        assert_eq!(config.mailbox.host, "imap.gmail.com");
        assert_eq!(config.mailbox.port, 993);
        assert_eq!(config.mailbox.folder, "INBOX");
        assert_eq!(config.workers.max_workers, 2);
        assert_eq!(config.workers.admission_retry_ms, 1000);
        assert_eq!(config.export.template_sheet, "Template");
        assert!(config.spam.keywords.iter().any(|k| k == "Privacy Checkup"));
        assert!(matches!(config.export.auth, TokenAuth::Oauth2(ref o)
            if o.token_url == "https://oauth2.googleapis.com/token"));
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut json = base_config();
        json["workers"] = serde_json::json!({ "max_workers": 4 });
        json["spam"] = serde_json::json!({ "keywords": ["newsletter"] });
        json["data_directory"] = serde_json::json!("/srv/offerflow");

        let config = load_config_from_str(&json.to_string()).unwrap();
        assert_eq!(config.workers.max_workers, 4);
        assert_eq!(config.spam.keywords, vec!["newsletter".to_string()]);
        assert_eq!(config.data_directory, PathBuf::from("/srv/offerflow"));
    }

    #[test]
    fn test_invalid_version() {
        let mut json = base_config();
        json["version"] = serde_json::json!("2.0");
        assert!(matches!(
            load_config_from_str(&json.to_string()),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_schema_rejects_zero_workers() {
        let mut json = base_config();
        json["workers"] = serde_json::json!({ "max_workers": 0 });
        assert!(matches!(
            load_config_from_str(&json.to_string()),
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_schema_rejects_unknown_fields() {
        let mut json = base_config();
        json["retries"] = serde_json::json!(10);
        assert!(matches!(
            load_config_from_str(&json.to_string()),
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_schema_requires_mailbox() {
        let mut json = base_config();
        json.as_object_mut().unwrap().remove("mailbox");
        assert!(load_config_from_str(&json.to_string()).is_err());
    }

    #[test]
    fn test_invalid_endpoint_url() {
        let mut json = base_config();
        json["extraction"]["endpoint"] = serde_json::json!("not a url");
        let err = load_config_from_str(&json.to_string()).unwrap_err();
        assert!(err.to_string().contains("extraction.endpoint"));
    }

    #[test]
    fn test_blank_secret_source_rejected() {
        let mut json = base_config();
        json["mailbox"]["auth"]["password"] = serde_json::json!({ "env": "" });
        let err = load_config_from_str(&json.to_string()).unwrap_err();
        assert!(err.to_string().contains("mailbox.auth.password"));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/offerflow.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
