// src/config.rs

//! Manages daemon configuration: loading, validation, and defaults.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use url::Url;

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8878
}

/// Tunables for the per-room redaction queue.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RedactionConfig {
    /// The maximum number of recent messages scanned per redaction job.
    #[serde(default = "default_max_redaction_check_members")]
    pub max_redaction_check_members: usize,
    /// The maximum number of redactions dispatched per batch.
    #[serde(default = "default_max_redaction_events")]
    pub max_redaction_events: usize,
    /// The pause between redaction batches, in milliseconds.
    #[serde(default = "default_redaction_batch_linger_millis")]
    pub redaction_batch_linger_millis: u64,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            max_redaction_check_members: default_max_redaction_check_members(),
            max_redaction_events: default_max_redaction_events(),
            redaction_batch_linger_millis: default_redaction_batch_linger_millis(),
        }
    }
}

fn default_max_redaction_check_members() -> usize {
    1000
}
fn default_max_redaction_events() -> usize {
    100
}
fn default_redaction_batch_linger_millis() -> u64 {
    1000
}

/// Default on/off state for the built-in protections. Individual protections
/// can be toggled at runtime; these values seed the registry.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProtectionsConfig {
    /// If true, a banned user's recent messages are redacted after the ban.
    #[serde(default)]
    pub redact_on_ban: bool,
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    homeserver_url: String,
    access_token: String,
    /// The fully-qualified user id the daemon logs in as, e.g. `@palisade:example.org`.
    user_id: String,
    /// The room where moderators issue commands and receive reports.
    management_room: String,
    #[serde(default)]
    protected_rooms: Vec<String>,
    #[serde(default)]
    protect_all_joined_rooms: bool,
    #[serde(default = "default_background_delay_ms")]
    background_delay_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    http_timeout_secs: u64,
    #[serde(default = "default_report_poll_interval_secs")]
    report_poll_interval_secs: u64,
    #[serde(default = "default_true")]
    verify_permissions_on_startup: bool,
    #[serde(default = "default_true")]
    sync_on_startup: bool,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    redaction: RedactionConfig,
    #[serde(default)]
    protections: ProtectionsConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_background_delay_ms() -> u64 {
    1000
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_report_poll_interval_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

/// Represents the final, validated daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub homeserver_url: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub user_id: String,
    /// The server name of the daemon's own account, derived from `user_id`.
    /// It is never allowed into a deny list.
    pub own_server: String,
    pub management_room: String,
    pub protected_rooms: Vec<String>,
    pub protect_all_joined_rooms: bool,
    pub background_delay_ms: u64,
    pub http_timeout_secs: u64,
    pub report_poll_interval_secs: u64,
    pub verify_permissions_on_startup: bool,
    pub sync_on_startup: bool,
    pub log_level: String,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub protections: ProtectionsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            homeserver_url: "http://localhost:8008".to_string(),
            access_token: String::new(),
            user_id: "@palisade:localhost".to_string(),
            own_server: "localhost".to_string(),
            management_room: String::new(),
            protected_rooms: Vec::new(),
            protect_all_joined_rooms: false,
            background_delay_ms: default_background_delay_ms(),
            http_timeout_secs: default_http_timeout_secs(),
            report_poll_interval_secs: default_report_poll_interval_secs(),
            verify_permissions_on_startup: true,
            sync_on_startup: true,
            log_level: default_log_level(),
            redaction: RedactionConfig::default(),
            protections: ProtectionsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents)
    }

    /// Parses and validates a TOML configuration document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let own_server = server_name_of(&raw.user_id)
            .ok_or_else(|| anyhow!("user_id '{}' has no server part", raw.user_id))?
            .to_string();

        let config = Config {
            homeserver_url: raw.homeserver_url,
            access_token: raw.access_token,
            user_id: raw.user_id,
            own_server,
            management_room: raw.management_room,
            protected_rooms: raw.protected_rooms,
            protect_all_joined_rooms: raw.protect_all_joined_rooms,
            background_delay_ms: raw.background_delay_ms,
            http_timeout_secs: raw.http_timeout_secs,
            report_poll_interval_secs: raw.report_poll_interval_secs,
            verify_permissions_on_startup: raw.verify_permissions_on_startup,
            sync_on_startup: raw.sync_on_startup,
            log_level: raw.log_level,
            redaction: raw.redaction,
            protections: raw.protections,
            metrics: raw.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        Url::parse(&self.homeserver_url)
            .with_context(|| format!("invalid homeserver_url '{}'", self.homeserver_url))?;
        if self.access_token.trim().is_empty() {
            return Err(anyhow!("access_token cannot be empty"));
        }
        if !self.user_id.starts_with('@') {
            return Err(anyhow!("user_id must be fully qualified, e.g. '@bot:example.org'"));
        }
        if self.management_room.trim().is_empty() {
            return Err(anyhow!("management_room cannot be empty"));
        }
        if self.background_delay_ms == 0 {
            return Err(anyhow!("background_delay_ms cannot be 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(anyhow!("http_timeout_secs cannot be 0"));
        }
        if self.redaction.max_redaction_events == 0 {
            return Err(anyhow!("redaction.max_redaction_events cannot be 0"));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0"));
        }
        Ok(())
    }
}

/// Extracts the server part of a fully-qualified entity id (`@user:server`,
/// `!room:server`, `#alias:server`).
pub fn server_name_of(entity: &str) -> Option<&str> {
    entity.split_once(':').map(|(_, server)| server)
}
