use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project every gateway call is scoped to
    pub project: String,
    pub gcp: GcpConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    pub access_token: String,
    #[serde(default = "default_secret_manager_url")]
    pub secret_manager_url: String,
    #[serde(default = "default_api_keys_url")]
    pub api_keys_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_expiry_threshold")]
    pub expiry_threshold_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_secret_manager_url() -> String {
    "https://secretmanager.googleapis.com".to_string()
}

fn default_api_keys_url() -> String {
    "https://apikeys.googleapis.com".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_expiry_threshold() -> u32 {
    90
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            expiry_threshold_days: default_expiry_threshold(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let gcp = GcpConfig {
            access_token: std::env::var("GCP_ACCESS_TOKEN").unwrap_or_default(),
            secret_manager_url: std::env::var("GCP_SECRET_MANAGER_URL")
                .unwrap_or_else(|_| default_secret_manager_url()),
            api_keys_url: std::env::var("GCP_API_KEYS_URL")
                .unwrap_or_else(|_| default_api_keys_url()),
            timeout_seconds: std::env::var("AKR_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_timeout),
        };

        let rotation = RotationConfig {
            expiry_threshold_days: std::env::var("AKR_EXPIRY_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_expiry_threshold),
        };

        let notify = std::env::var("AKR_NOTIFY_WEBHOOK").ok().map(|webhook_url| NotifyConfig {
            webhook_url,
            recipients: std::env::var("AKR_NOTIFY_RECIPIENTS")
                .map(|s| parse_recipients(&s))
                .unwrap_or_default(),
            auth_header: std::env::var("AKR_NOTIFY_AUTH").ok(),
            timeout_seconds: default_timeout(),
        });

        Ok(Self {
            project: std::env::var("GCP_PROJECT").unwrap_or_default(),
            gcp,
            rotation,
            notify,
        })
    }

    /// Check the settings every command needs, after CLI overrides are applied
    pub fn validate(&self) -> Result<()> {
        if self.project.is_empty() {
            anyhow::bail!(
                "No project configured. Set GCP_PROJECT, --project or `project` in the config file"
            );
        }
        if self.gcp.access_token.is_empty() {
            anyhow::bail!(
                "No access token configured. Set GCP_ACCESS_TOKEN, --access-token or [gcp] access_token"
            );
        }
        Ok(())
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let sample = Self {
            project: "my-project".to_string(),
            gcp: GcpConfig {
                access_token: "your-access-token-here".to_string(),
                secret_manager_url: default_secret_manager_url(),
                api_keys_url: default_api_keys_url(),
                timeout_seconds: default_timeout(),
            },
            rotation: RotationConfig::default(),
            notify: Some(NotifyConfig {
                webhook_url: "https://hooks.example.com/rotation".to_string(),
                recipients: vec!["ops@example.com".to_string()],
                auth_header: None,
                timeout_seconds: default_timeout(),
            }),
        };

        let toml_string =
            toml::to_string_pretty(&sample).context("Failed to serialize sample config")?;
        fs::write(path.as_ref(), toml_string)
            .with_context(|| format!("Failed to write sample config to {:?}", path.as_ref()))?;

        Ok(())
    }
}

/// Split a comma-separated recipient list
fn parse_recipients(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
