//! Application configuration: TOML file with CLI overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub bind: String,
    /// Path to the SQLite database file.
    pub db_path: String,
    /// Public root URL, used for deep links in result emails.
    pub root_url: String,
    pub email: EmailConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Suffix appended to bare usernames to form a deliverable address.
    pub domain: String,
    /// From address on result emails.
    pub sender: String,
    /// HTTP endpoint the mail relay accepts messages on.
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Base URL screenshots are served from.
    pub base_url: String,
    /// Secret for signing screenshot URLs.
    pub secret: String,
    /// How long a derived screenshot URL stays valid.
    pub expiry_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            db_path: "data/bddhub.db".to_string(),
            root_url: "http://localhost:8080".to_string(),
            email: EmailConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            domain: "@example.com".to_string(),
            sender: "bddhub@example.com".to_string(),
            endpoint: "http://localhost:8025/send".to_string(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/screenshots".to_string(),
            secret: "change-me".to_string(),
            expiry_days: 365,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, or fall back to defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }
}
