//! Bootstrap configuration loaded from TOML
//!
//! Configuration priority:
//! 1. Command-line arguments (--port, --database)
//! 2. Environment variables (VERDANT_CONFIG, read by the binary)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! Every section is optional. A missing file section falls back to its defaults,
//! so an empty TOML file yields a working local configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete TOML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub jurisdiction: JurisdictionConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    /// External regulator API. Absent disables the sync worker.
    #[serde(default)]
    pub regulator: Option<RegulatorConfig>,

    #[serde(default)]
    pub cadence: CadenceConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            port: default_port(),
            logging: LoggingConfig::default(),
            jurisdiction: JurisdictionConfig::default(),
            sync: SyncSettings::default(),
            regulator: None,
            cadence: CadenceConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Jurisdiction rules consumed by the lifecycle core
///
/// Stage names are kept as text here; the lifecycle service parses them into
/// its stage type and rejects unknown names at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionConfig {
    /// Jurisdiction identifier (e.g. "CA", "CO")
    #[serde(default = "default_jurisdiction_code")]
    pub code: String,

    /// Report qualifying stage transitions to the external regulator
    #[serde(default = "default_true")]
    pub requires_external_sync: bool,

    /// Plants must carry regulator-issued tags
    #[serde(default = "default_true")]
    pub requires_plant_tags: bool,

    /// Stages usable in this jurisdiction. `None` allows every stage of a domain.
    #[serde(default)]
    pub allowed_stages: Option<Vec<String>>,

    /// Destroying a batch with plants requires a waste manifest acknowledgement
    #[serde(default = "default_true")]
    pub manifest_required_on_destroy: bool,

    /// Regex every plant tag must fully match
    #[serde(default = "default_tag_pattern")]
    pub tag_pattern: String,

    /// Allowed deviation between per-plant weights and the batch total (percent)
    #[serde(default = "default_harvest_tolerance_percent")]
    pub harvest_tolerance_percent: f64,
}

impl Default for JurisdictionConfig {
    fn default() -> Self {
        Self {
            code: default_jurisdiction_code(),
            requires_external_sync: true,
            requires_plant_tags: true,
            allowed_stages: None,
            manifest_required_on_destroy: true,
            tag_pattern: default_tag_pattern(),
            harvest_tolerance_percent: default_harvest_tolerance_percent(),
        }
    }
}

/// Regulatory sync worker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Attempts before a job is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Cap on the retry delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Timeout for one regulator call; a timeout counts as a failed attempt
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Jobs for different batches executed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Idle poll period when no enqueue notification arrives
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// External regulator API endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatorConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Recipe day advancement cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Seconds between day advancements (86400 = daily)
    #[serde(default = "default_cadence_interval_secs")]
    pub interval_secs: u64,

    /// Disable the cadence loop (days then advance only on explicit request)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cadence_interval_secs(),
            enabled: true,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("verdant.db")
}

fn default_port() -> u16 {
    5730
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_jurisdiction_code() -> String {
    "DEFAULT".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tag_pattern() -> String {
    // 24-character alphanumeric seed-to-sale tag (e.g. 1A4FF0100000022000000123)
    "^[0-9A-Z]{24}$".to_string()
}

fn default_harvest_tolerance_percent() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_cadence_interval_secs() -> u64 {
    86_400
}

/// Parse TOML text into configuration
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    let config: TomlConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

/// Load configuration from a TOML file
///
/// A missing file is not an error: built-in defaults are used.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        info!("Config file {} not found, using built-in defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config = parse_toml_config(&content)?;

    info!("Loaded TOML configuration from {}", path.display());
    Ok(config)
}

/// Write configuration to a TOML file
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn validate(config: &TomlConfig) -> Result<()> {
    let j = &config.jurisdiction;
    if !(0.0..=100.0).contains(&j.harvest_tolerance_percent) {
        return Err(Error::Config(format!(
            "harvest_tolerance_percent must be within 0..=100, got {}",
            j.harvest_tolerance_percent
        )));
    }
    if j.tag_pattern.trim().is_empty() {
        return Err(Error::Config("tag_pattern must not be empty".to_string()));
    }

    let s = &config.sync;
    if s.max_attempts == 0 {
        return Err(Error::Config("sync.max_attempts must be at least 1".to_string()));
    }
    if s.concurrency == 0 {
        return Err(Error::Config("sync.concurrency must be at least 1".to_string()));
    }
    if s.base_backoff_ms > s.max_backoff_ms {
        return Err(Error::Config(format!(
            "sync.base_backoff_ms ({}) exceeds sync.max_backoff_ms ({})",
            s.base_backoff_ms, s.max_backoff_ms
        )));
    }

    if config.cadence.interval_secs == 0 {
        return Err(Error::Config("cadence.interval_secs must be at least 1".to_string()));
    }

    Ok(())
}
