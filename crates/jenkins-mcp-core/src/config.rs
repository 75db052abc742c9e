//! Configuration management for jenkins-mcp.
//!
//! Two layers live here:
//!
//! - [`Config`]: the sparse, editable TOML file. Stored in platform-specific
//!   locations (`~/.config/jenkins-mcp/config.toml` on Linux,
//!   `%APPDATA%\jenkins-mcp\config.toml` on Windows).
//! - [`Settings`]: the validated, immutable view every component consumes.
//!   Built once at startup by [`Settings::resolve`], which applies defaults and
//!   environment overrides, and never mutated afterwards.
//!
//! Secrets are read from the environment so they never have to be written to
//! disk:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `JENKINS_URL` | `jenkins.url` |
//! | `JENKINS_USER` | `jenkins.username` |
//! | `JENKINS_API_TOKEN` | `jenkins.api_token` |
//! | `JENKINS_WEBHOOK_SECRET` | `webhook.secret` |
//!
//! # Example
//!
//! ```ignore
//! use jenkins_mcp_core::config::{Config, Settings};
//!
//! let config = Config::load()?;
//! let settings = Settings::resolve(&config, |key| std::env::var(key).ok())?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config directory name.
const CONFIG_DIR_NAME: &str = "jenkins-mcp";

pub const ENV_URL: &str = "JENKINS_URL";
pub const ENV_USER: &str = "JENKINS_USER";
pub const ENV_API_TOKEN: &str = "JENKINS_API_TOKEN";
pub const ENV_WEBHOOK_SECRET: &str = "JENKINS_WEBHOOK_SECRET";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_MAX_WAIT_MS: u64 = 30 * 60 * 1_000;
const DEFAULT_MAX_CONCURRENT_TRIGGERS: usize = 4;
const DEFAULT_CONSOLE_TAIL_LINES: usize = 50;
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 8_000;
const DEFAULT_WEBHOOK_LISTEN: &str = "127.0.0.1:8787";
const DEFAULT_WEBHOOK_PATH: &str = "/webhook";
const DEFAULT_SIGNATURE_HEADER: &str = "X-Jenkins-Signature";

// =============================================================================
// File configuration
// =============================================================================

/// Main configuration structure, as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Jenkins connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jenkins: Option<JenkinsConfig>,

    /// Trigger/poll/wait tuning
    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    /// HTTP retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Inbound notifications
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Jenkins connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JenkinsConfig {
    /// Jenkins root URL, e.g. `https://ci.example.com`
    pub url: String,
    /// User the API token belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// API token. Prefer `JENKINS_API_TOKEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Per-request HTTP timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_triggers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_tail_lines: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Run the webhook listener (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Listen address, e.g. `0.0.0.0:8787`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    /// Request path notifications are posted to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// How pushes are authenticated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<WebhookAuth>,
    /// Header carrying the signature or token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_header: Option<String>,
    /// Shared secret. Prefer `JENKINS_WEBHOOK_SECRET`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Authentication scheme for inbound webhooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookAuth {
    /// Hex HMAC-SHA256 of the raw body keyed with the shared secret
    #[default]
    HmacSha256,
    /// Header value equals the shared secret
    SharedToken,
    /// No verification
    Disabled,
}

impl WebhookAuth {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "hmac-sha256" | "hmac" => Ok(WebhookAuth::HmacSha256),
            "shared-token" | "token" => Ok(WebhookAuth::SharedToken),
            "disabled" | "none" => Ok(WebhookAuth::Disabled),
            other => Err(Error::Config(format!(
                "Unknown webhook auth scheme '{}'. Expected hmac-sha256, shared-token or disabled",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WebhookAuth::HmacSha256 => "hmac-sha256",
            WebhookAuth::SharedToken => "shared-token",
            WebhookAuth::Disabled => "disabled",
        }
    }
}

impl Config {
    /// Get the configuration directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join(CONFIG_DIR_NAME))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default location.
    ///
    /// Returns a default (empty) config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// Returns a default (empty) config if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = ?path, "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        debug!(path = ?path, "Loading config");

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        info!(path = ?path, "Config loaded successfully");
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        debug!(path = ?path, "Saving config");

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        info!(path = ?path, "Config saved successfully");
        Ok(())
    }

    /// Set a configuration value by key path.
    ///
    /// Key format: `section.field` (e.g., `jenkins.url`, `orchestration.max_wait_ms`)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let (section, field) = split_key(key)?;

        match section {
            "jenkins" => {
                let config = self.jenkins.get_or_insert_with(JenkinsConfig::default);
                match field {
                    "url" => config.url = value.trim_end_matches('/').to_string(),
                    "username" | "user" => config.username = Some(value.to_string()),
                    "api_token" | "token" => config.api_token = Some(value.to_string()),
                    "request_timeout_ms" => config.request_timeout_ms = Some(parse_num(key, value)?),
                    _ => return Err(unknown_field("jenkins", field)),
                }
            }
            "orchestration" => {
                let config = &mut self.orchestration;
                match field {
                    "poll_interval_ms" => config.poll_interval_ms = Some(parse_num(key, value)?),
                    "max_wait_ms" => config.max_wait_ms = Some(parse_num(key, value)?),
                    "max_concurrent_triggers" => {
                        config.max_concurrent_triggers = Some(parse_num(key, value)?)
                    }
                    "console_tail_lines" => config.console_tail_lines = Some(parse_num(key, value)?),
                    _ => return Err(unknown_field("orchestration", field)),
                }
            }
            "retry" => {
                let config = &mut self.retry;
                match field {
                    "max_attempts" => config.max_attempts = Some(parse_num(key, value)?),
                    "base_delay_ms" => config.base_delay_ms = Some(parse_num(key, value)?),
                    "max_delay_ms" => config.max_delay_ms = Some(parse_num(key, value)?),
                    _ => return Err(unknown_field("retry", field)),
                }
            }
            "webhook" => {
                let config = &mut self.webhook;
                match field {
                    "enabled" => {
                        config.enabled = Some(value.parse().map_err(|_| {
                            Error::Config(format!("Invalid boolean for {}: {}", key, value))
                        })?)
                    }
                    "listen" => config.listen = Some(value.to_string()),
                    "path" => config.path = Some(value.to_string()),
                    "auth" => config.auth = Some(WebhookAuth::parse(value)?),
                    "signature_header" => config.signature_header = Some(value.to_string()),
                    "secret" => config.secret = Some(value.to_string()),
                    _ => return Err(unknown_field("webhook", field)),
                }
            }
            _ => return Err(Error::Config(format!("Unknown section: {}", section))),
        }

        Ok(())
    }

    /// Get a configuration value by key path.
    ///
    /// Secrets are reported as `<set>` rather than echoed.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let (section, field) = split_key(key)?;

        match section {
            "jenkins" => {
                let Some(config) = &self.jenkins else {
                    return Ok(None);
                };
                match field {
                    "url" => Ok(Some(config.url.clone())),
                    "username" | "user" => Ok(config.username.clone()),
                    "api_token" | "token" => Ok(config.api_token.as_ref().map(|_| redacted())),
                    "request_timeout_ms" => Ok(config.request_timeout_ms.map(|v| v.to_string())),
                    _ => Err(unknown_field("jenkins", field)),
                }
            }
            "orchestration" => {
                let config = &self.orchestration;
                match field {
                    "poll_interval_ms" => Ok(config.poll_interval_ms.map(|v| v.to_string())),
                    "max_wait_ms" => Ok(config.max_wait_ms.map(|v| v.to_string())),
                    "max_concurrent_triggers" => {
                        Ok(config.max_concurrent_triggers.map(|v| v.to_string()))
                    }
                    "console_tail_lines" => Ok(config.console_tail_lines.map(|v| v.to_string())),
                    _ => Err(unknown_field("orchestration", field)),
                }
            }
            "retry" => {
                let config = &self.retry;
                match field {
                    "max_attempts" => Ok(config.max_attempts.map(|v| v.to_string())),
                    "base_delay_ms" => Ok(config.base_delay_ms.map(|v| v.to_string())),
                    "max_delay_ms" => Ok(config.max_delay_ms.map(|v| v.to_string())),
                    _ => Err(unknown_field("retry", field)),
                }
            }
            "webhook" => {
                let config = &self.webhook;
                match field {
                    "enabled" => Ok(config.enabled.map(|v| v.to_string())),
                    "listen" => Ok(config.listen.clone()),
                    "path" => Ok(config.path.clone()),
                    "auth" => Ok(config.auth.map(|a| a.as_str().to_string())),
                    "signature_header" => Ok(config.signature_header.clone()),
                    "secret" => Ok(config.secret.as_ref().map(|_| redacted())),
                    _ => Err(unknown_field("webhook", field)),
                }
            }
            _ => Err(Error::Config(format!("Unknown section: {}", section))),
        }
    }
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('.') {
        Some((section, field)) if !field.contains('.') => Ok((section, field)),
        _ => Err(Error::Config(format!(
            "Invalid config key '{}'. Expected format: section.field",
            key
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("Invalid number for {}: {}", key, value)))
}

fn unknown_field(section: &str, field: &str) -> Error {
    Error::Config(format!("Unknown {} config field: {}", section, field))
}

fn redacted() -> String {
    "<set>".to_string()
}

// =============================================================================
// Resolved settings
// =============================================================================

/// Jenkins user + API token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub api_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Upper bound of the delay before retry number `attempt` (0-based),
    /// before jitter.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

/// Webhook listener settings.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub listen: String,
    pub path: String,
    pub auth: WebhookAuth,
    pub signature_header: String,
    pub secret: Option<String>,
}

impl fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("enabled", &self.enabled)
            .field("listen", &self.listen)
            .field("path", &self.path)
            .field("auth", &self.auth)
            .field("signature_header", &self.signature_header)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl WebhookSettings {
    /// Check what the listener needs before it binds. Not part of
    /// [`Settings::resolve`].
    pub fn validate(&self) -> Result<()> {
        if self.auth != WebhookAuth::Disabled
            && self.secret.as_deref().map_or(true, str::is_empty)
        {
            return Err(Error::Config(format!(
                "Webhook auth '{}' needs a shared secret (set webhook.secret or {})",
                self.auth.as_str(),
                ENV_WEBHOOK_SECRET
            )));
        }
        if !self.path.starts_with('/') {
            return Err(Error::Config(format!(
                "webhook.path must start with '/': {}",
                self.path
            )));
        }
        Ok(())
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: DEFAULT_WEBHOOK_LISTEN.to_string(),
            path: DEFAULT_WEBHOOK_PATH.to_string(),
            auth: WebhookAuth::HmacSha256,
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            secret: None,
        }
    }
}

/// Immutable runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub credentials: Option<Credentials>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub max_concurrent_triggers: usize,
    pub console_tail_lines: usize,
    pub webhook: WebhookSettings,
}

impl Settings {
    /// Defaults for everything except the Jenkins URL. Credentials unset.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            max_concurrent_triggers: DEFAULT_MAX_CONCURRENT_TRIGGERS,
            console_tail_lines: DEFAULT_CONSOLE_TAIL_LINES,
            webhook: WebhookSettings::default(),
        }
    }

    /// Build settings from the file config plus environment overrides.
    ///
    /// `env` is usually `|key| std::env::var(key).ok()`.
    pub fn resolve<F>(config: &Config, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file_jenkins = config.jenkins.clone().unwrap_or_default();

        let base_url = env(ENV_URL)
            .or_else(|| Some(file_jenkins.url.clone()).filter(|u| !u.is_empty()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "Jenkins URL is not configured (set jenkins.url or {})",
                    ENV_URL
                ))
            })?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Jenkins URL must start with http:// or https://: {}",
                base_url
            )));
        }

        let mut settings = Self::with_base_url(base_url);

        let username = env(ENV_USER).or(file_jenkins.username);
        let api_token = env(ENV_API_TOKEN).or(file_jenkins.api_token);
        settings.credentials = match (username, api_token) {
            (Some(username), Some(api_token)) => Some(Credentials {
                username,
                api_token,
            }),
            (None, None) => None,
            _ => {
                return Err(Error::Config(format!(
                    "Both a username ({}) and an API token ({}) are required for authentication",
                    ENV_USER, ENV_API_TOKEN
                )))
            }
        };

        if let Some(ms) = file_jenkins.request_timeout_ms {
            settings.request_timeout = Duration::from_millis(ms);
        }

        let orch = &config.orchestration;
        if let Some(ms) = orch.poll_interval_ms {
            settings.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = orch.max_wait_ms {
            settings.max_wait = Duration::from_millis(ms);
        }
        if let Some(n) = orch.max_concurrent_triggers {
            settings.max_concurrent_triggers = n;
        }
        if let Some(n) = orch.console_tail_lines {
            settings.console_tail_lines = n;
        }

        let retry = &config.retry;
        if let Some(n) = retry.max_attempts {
            settings.retry.max_attempts = n;
        }
        if let Some(ms) = retry.base_delay_ms {
            settings.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = retry.max_delay_ms {
            settings.retry.max_delay = Duration::from_millis(ms);
        }

        let hook = &config.webhook;
        let webhook = &mut settings.webhook;
        if let Some(enabled) = hook.enabled {
            webhook.enabled = enabled;
        }
        if let Some(listen) = &hook.listen {
            webhook.listen = listen.clone();
        }
        if let Some(path) = &hook.path {
            webhook.path = path.clone();
        }
        if let Some(auth) = hook.auth {
            webhook.auth = auth;
        }
        if let Some(header) = &hook.signature_header {
            webhook.signature_header = header.clone();
        }
        webhook.secret = env(ENV_WEBHOOK_SECRET).or_else(|| hook.secret.clone());

        settings.validate()?;
        Ok(settings)
    }

    /// Check invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.max_wait.is_zero() {
            return Err(Error::Config("max_wait_ms must be positive".into()));
        }
        if self.max_concurrent_triggers == 0 {
            return Err(Error::Config(
                "max_concurrent_triggers must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
