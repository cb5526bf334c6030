use config::{Config, ConfigError};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{env, path::Path, result::Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    pub cycle_minutes: u32,
    pub page_size: u32,
    pub processed_label: String,
    pub draft_reply_min_score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub model: String,
    pub temperature: f64,
    pub draft_temperature: f64,
    pub body_char_budget: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailLimits {
    pub quota_units_per_sec: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    pub urgency_threshold: f64,
    pub digest_frequency_minutes: i32,
    pub slack_channel: String,
    pub custom_urgent_keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    processing: ProcessingConfig,
    classifier: ClassifierConfig,
    gmail_limits: GmailLimits,
    defaults: DefaultsConfig,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub processing: ProcessingConfig,
    pub classifier: ClassifierConfig,
    pub gmail_limits: GmailLimits,
    pub defaults: DefaultsConfig,
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Server Config:\nProcessing: {:?}\n\nClassifier: {:?}\n\nGmail Limits: {:?}\n\nDefaults: {:?}",
            self.processing, self.classifier, self.gmail_limits, self.defaults,
        )
    }
}

/// Google OAuth client credentials, read from the environment at startup
/// rather than from the config file so deployments can rotate them without
/// a rebuild.
#[derive(Debug, Clone)]
pub struct GoogleOauthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
}

impl GoogleOauthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| {
            env::var(name).map_err(|_| ConfigError::NotFound(name.to_string()))
        };

        Ok(GoogleOauthConfig {
            client_id: var("GOOGLE_CLIENT_ID")?,
            client_secret: var("GOOGLE_CLIENT_SECRET")?,
            token_uri: env::var("GOOGLE_TOKEN_URI")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string()),
        })
    }
}

lazy_static! {
    pub static ref cfg: ServerConfig = {
        let root = env::var("APP_DIR").unwrap_or_else(|_| {
            let dir =
                env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
            let dir = Path::new(&dir).parent().unwrap().display().to_string();
            format!("{}/config", dir)
        });
        let path = format!("{root}/config.toml");
        let cfg_file: ConfigFile = Config::builder()
            .add_source(config::File::with_name(&path))
            .build()
            .expect("config.toml is required")
            .try_deserialize()
            .expect("config.toml is invalid");

        let ConfigFile {
            processing,
            classifier,
            gmail_limits,
            defaults,
        } = cfg_file;

        ServerConfig {
            processing,
            classifier,
            gmail_limits,
            defaults,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_loads() {
        assert!(cfg.processing.page_size > 0);
        assert_eq!(cfg.processing.draft_reply_min_score, 4.0);
        assert_eq!(cfg.defaults.urgency_threshold, 6.0);
        assert_eq!(cfg.defaults.digest_frequency_minutes, 30);
        assert!(!cfg.defaults.custom_urgent_keywords.is_empty());
    }
}
