//! Configuration loading and root folder resolution
//!
//! Root folder priority:
//! 1. Command-line argument (highest priority)
//! 2. `DECLARANT_ROOT_FOLDER` environment variable
//! 3. `root_folder` in the TOML config file
//! 4. OS-dependent data directory (fallback)
//!
//! A missing or unreadable TOML file is never fatal: defaults are used and a
//! warning is logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "DECLARANT_ROOT_FOLDER";

/// Database file created inside the root folder
pub const DATABASE_FILE_NAME: &str = "declarant.db";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5730;

/// Contents of `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the SQLite database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Classification service API key (lowest priority source)
    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            bind: default_bind(),
            openai_api_key: None,
            logging: LoggingConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
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

/// Classification profile sent to the external service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Detailed classifier: reasoning, alternatives, web search fallback
    HsCode,
    /// Code-only lookup against the tariff vector store
    CodeSearch,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::HsCode => "hs_code",
            AgentType::CodeSearch => "code_search",
        }
    }
}

impl std::str::FromStr for AgentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "hs_code" => Ok(AgentType::HsCode),
            "code_search" => Ok(AgentType::CodeSearch),
            other => Err(Error::Config(format!(
                "Unknown agent_type '{}' (expected hs_code or code_search)",
                other
            ))),
        }
    }
}

/// Unit the external service reports confidence in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceScale {
    /// Already 0-100
    Percent,
    /// 0.0-1.0, multiplied by 100
    Unit,
}

impl std::str::FromStr for ConfidenceScale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "percent" => Ok(ConfidenceScale::Percent),
            "unit" => Ok(ConfidenceScale::Unit),
            other => Err(Error::Config(format!(
                "Unknown confidence_scale '{}' (expected percent or unit)",
                other
            ))),
        }
    }
}

/// `[classifier]` section: batch limits, pool sizing and service profile
///
/// Passed explicitly to the normalizer and orchestrator; nothing reads it
/// from global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Maximum classifiable rows per upload
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum upload size in megabytes
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Confidence below which rows are flagged for attention in views
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Classification profile
    #[serde(default = "default_agent_type")]
    pub agent_type: AgentType,

    /// Display pagination size
    #[serde(default = "default_results_per_page")]
    pub results_per_page: usize,

    /// Concurrent classification calls per batch
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Per-item timeout; an item exceeding it is marked failed
    #[serde(default = "default_item_timeout_secs")]
    pub item_timeout_secs: u64,

    /// Outbound request budget shared by all workers
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_confidence_scale")]
    pub confidence_scale: ConfidenceScale,

    /// Model name sent to the service
    #[serde(default = "default_model")]
    pub model: String,

    /// Service base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Vector store holding the tariff nomenclature
    #[serde(default)]
    pub vector_store_id: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_file_size_mb: default_max_file_size_mb(),
            confidence_threshold: default_confidence_threshold(),
            agent_type: default_agent_type(),
            results_per_page: default_results_per_page(),
            concurrency_limit: default_concurrency_limit(),
            item_timeout_secs: default_item_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
            confidence_scale: default_confidence_scale(),
            model: default_model(),
            base_url: default_base_url(),
            vector_store_id: None,
        }
    }
}

impl ClassifierConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be at least 1".to_string()));
        }
        if self.max_file_size_mb == 0 {
            return Err(Error::Config("max_file_size_mb must be at least 1".to_string()));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::Config("concurrency_limit must be at least 1".to_string()));
        }
        if self.results_per_page == 0 {
            return Err(Error::Config("results_per_page must be at least 1".to_string()));
        }
        if self.item_timeout_secs == 0 {
            return Err(Error::Config("item_timeout_secs must be at least 1".to_string()));
        }
        if self.requests_per_minute == 0 {
            return Err(Error::Config("requests_per_minute must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be within 0-100, got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }

    pub fn item_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.item_timeout_secs)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_confidence_threshold() -> f64 {
    40.0
}

fn default_agent_type() -> AgentType {
    AgentType::HsCode
}

fn default_results_per_page() -> usize {
    10
}

fn default_concurrency_limit() -> usize {
    10
}

fn default_item_timeout_secs() -> u64 {
    120
}

fn default_requests_per_minute() -> u32 {
    120
}

fn default_confidence_scale() -> ConfidenceScale {
    ConfidenceScale::Percent
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Locate the config file: explicit path, then user config dir, then /etc
pub fn config_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let user_config = dirs::config_dir().map(|d| d.join("declarant").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/declarant/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.classifier.validate()?;
    Ok(config)
}

/// Load the TOML config, falling back to defaults when missing or invalid
pub fn load_toml_config(explicit: Option<&Path>) -> TomlConfig {
    match config_file_path(explicit) {
        Some(path) => match read_toml_config(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring config file {}: {} (using defaults)", path.display(), e);
                TomlConfig::default()
            }
        },
        None => {
            warn!("No config file found, using defaults");
            TomlConfig::default()
        }
    }
}

/// Resolves the root folder following the documented priority order
pub struct RootFolderResolver<'a> {
    cli_arg: Option<&'a Path>,
    toml_value: Option<&'a Path>,
}

impl<'a> RootFolderResolver<'a> {
    pub fn new(cli_arg: Option<&'a Path>, toml_value: Option<&'a Path>) -> Self {
        Self { cli_arg, toml_value }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = self.cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.toml_value {
            return path.to_path_buf();
        }

        default_root_folder()
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("declarant"))
        .unwrap_or_else(|| PathBuf::from("./declarant_data"))
}

/// Creates the root folder and locates the database inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ClassifierConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_batch_size, 1000);
        assert_eq!(config.agent_type, AgentType::HsCode);
        assert_eq!(config.max_file_size_bytes(), 50 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = ClassifierConfig {
            concurrency_limit: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let config = ClassifierConfig {
            confidence_threshold: 120.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_classifier_section_uses_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 6000

            [classifier]
            max_batch_size = 50
            agent_type = "code_search"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.classifier.max_batch_size, 50);
        assert_eq!(config.classifier.agent_type, AgentType::CodeSearch);
        assert_eq!(config.classifier.concurrency_limit, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_agent_type_from_str() {
        assert_eq!("hs_code".parse::<AgentType>().unwrap(), AgentType::HsCode);
        assert_eq!(" code_search ".parse::<AgentType>().unwrap(), AgentType::CodeSearch);
        assert!("gpt".parse::<AgentType>().is_err());
    }
}
