use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::ticket::PollPolicy;

/// System-wide configuration file, read before the per-user one
pub const SYSTEM_CONFIG_PATH: &str = "/usr/local/orca/conf/custom.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub setup: SetupConfig,
    #[serde(default)]
    pub workflow_platform: WorkflowPlatformConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Action and step sections keyed by `<workflow>-<action or step>`
    #[serde(default)]
    pub integration: HashMap<String, Map<String, Value>>,
}

/// Connection and engine settings shared by every section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub verify_ssl: bool,
    #[serde(default = "default_auth_method")]
    pub auth_method: String,
    /// Proxy URL used for outbound integration calls
    #[serde(default)]
    pub proxy: Option<String>,
    /// Extra request headers as a JSON object string
    #[serde(default)]
    pub header: Option<String>,
    /// Character wrapping placeholder names in templates
    #[serde(default = "default_specifier")]
    pub specifier: String,
    #[serde(default = "default_templates_root_dir")]
    pub templates_root_dir: PathBuf,
    #[serde(default = "default_plugins_root_dir")]
    pub plugins_root_dir: PathBuf,
    /// User that unassigned tasks are reassigned to while the integration runs
    /// (default: the workflow platform login)
    #[serde(default)]
    pub integration_user: Option<String>,
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_auth_method() -> String {
    "basic".to_string()
}

fn default_specifier() -> String {
    "#".to_string()
}

fn default_templates_root_dir() -> PathBuf {
    PathBuf::from("/usr/local/orca/templates")
}

fn default_plugins_root_dir() -> PathBuf {
    PathBuf::from("/usr/local/orca/plugins")
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            protocol: default_protocol(),
            verify_ssl: false,
            auth_method: default_auth_method(),
            proxy: None,
            header: None,
            specifier: default_specifier(),
            templates_root_dir: default_templates_root_dir(),
            plugins_root_dir: default_plugins_root_dir(),
            integration_user: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlatformConfig {
    #[serde(default)]
    pub host: String,
    /// Secret store key holding the platform login
    #[serde(default = "default_credentials_key")]
    pub credentials_key: String,
    #[serde(default)]
    pub verify_ssl: bool,
    /// Seconds between polls while waiting for pending tasks (default: 5)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: usize,
}

fn default_credentials_key() -> String {
    "securechangeworkflow".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_poll_attempts() -> usize {
    60
}

impl Default for WorkflowPlatformConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            credentials_key: default_credentials_key(),
            verify_ssl: false,
            poll_interval_secs: default_poll_interval(),
            poll_attempts: default_poll_attempts(),
        }
    }
}

impl WorkflowPlatformConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            attempts: self.poll_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Directory holding `secret.passphrase` and `secret.db`
    #[serde(default = "default_secrets_dir")]
    pub dir: PathBuf,
}

fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/usr/local/orca/conf")
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            dir: default_secrets_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to log to file (false = stderr)
    #[serde(default = "default_log_to_file")]
    pub to_file: bool,

    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_to_file() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log")
}

fn default_log_file() -> String {
    "ps_orca_logger.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: default_log_to_file(),
            dir: default_log_dir(),
            file: default_log_file(),
        }
    }
}

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so orca works without config files
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let system_config = PathBuf::from(SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            builder = builder.add_source(config::File::from(system_config));
        }

        // User config in ~/.config/orca/ (optional overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("orca").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with ORCA__ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("ORCA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Section for a workflow and an action or step name, matched case-insensitively
    pub fn section(&self, workflow: &str, name: &str) -> Option<&Map<String, Value>> {
        let wanted = section_key(workflow, name);
        self.integration
            .iter()
            .find(|(key, _)| key.to_lowercase() == wanted)
            .map(|(_, section)| section)
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.logging.dir.join(&self.logging.file)
    }
}

fn section_key(workflow: &str, name: &str) -> String {
    format!("{workflow}-{name}").to_lowercase()
}

/// Human readable section name used in logs
pub fn section_name(workflow: &str, name: &str) -> String {
    format!("integration {workflow}-{name}")
}
