//! Configuration loading and storage

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::correlation::CaseParty;

const DEFAULT_CASE_API_URL: &str = "https://nguyen.growpath.com/api/v2";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub case_api: CaseApiConfig,
    pub correlation: CorrelationConfig,
    /// Public base URL of the recording proxy, e.g. `https://relay.example.com`.
    /// Recording links sent downstream are `{public_base_url}/recording/{id}`.
    pub public_base_url: String,
    /// Fixed UTC offset for downstream timestamps. Local time when unset.
    pub timestamp_utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Secret token used to sign webhook deliveries.
    pub secret_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseApiConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CaseApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CASE_API_URL.to_string(),
            auth_token: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Which party's number identifies the case a call belongs to.
    pub case_party: CaseParty,
    /// Evict call records older than this. Unset keeps records until the
    /// recording arrives.
    pub stale_call_ttl_hours: Option<u64>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "call-relay", "call-relay")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Resolve an explicit path or fall back to the default location.
    pub fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(p.to_path_buf()),
            None => Self::default_path(),
        }
    }

    /// Load configuration from disk, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(path)?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve_path(path)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains secrets)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(path)
    }

    /// Apply environment overrides. `lookup` is injected so tests do not
    /// touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CALL_RELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }
        if let Some(secret) = lookup("CALL_RELAY_WEBHOOK_SECRET") {
            self.webhook.secret_token = Some(secret);
        }
        if let Some(url) = lookup("CALL_RELAY_CASE_API_URL") {
            self.case_api.base_url = url;
        }
        if let Some(token) = lookup("CALL_RELAY_CASE_API_TOKEN") {
            self.case_api.auth_token = Some(token);
        }
        if let Some(url) = lookup("CALL_RELAY_PUBLIC_BASE_URL") {
            self.public_base_url = url;
        }
        if let Some(party) = lookup("CALL_RELAY_CASE_PARTY") {
            self.correlation.case_party = party.parse()?;
        }
        Ok(())
    }

    /// Check that everything needed to serve traffic is present.
    pub fn validate(&self) -> Result<()> {
        if self.webhook.secret_token.as_deref().unwrap_or("").is_empty() {
            bail!("webhook.secret_token is not set (or CALL_RELAY_WEBHOOK_SECRET)");
        }
        if self.case_api.auth_token.as_deref().unwrap_or("").is_empty() {
            bail!("case_api.auth_token is not set (or CALL_RELAY_CASE_API_TOKEN)");
        }
        if self.case_api.base_url.trim().is_empty() {
            bail!("case_api.base_url is empty");
        }
        if self.public_base_url.trim().is_empty() {
            tracing::warn!("public_base_url is empty, recording links will be relative");
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.case_api.timeout_secs)
    }

    pub fn stale_call_ttl(&self) -> Option<Duration> {
        self.correlation
            .stale_call_ttl_hours
            .map(|h| Duration::from_secs(h * 3600))
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "********".to_string());
        let mut copy = self.clone();
        copy.webhook.secret_token = mask(&self.webhook.secret_token);
        copy.case_api.auth_token = mask(&self.case_api.auth_token);
        copy
    }
}
