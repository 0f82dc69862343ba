use crate::cli::{Cli, Command};
use crate::http_client::{BROWSER_USER_AGENT, HttpClientConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for the network timeout, in seconds
pub const MAX_TIMEOUT_SECONDS: u64 = 600;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub scratch: ScratchConfig,
    pub schema: SchemaConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Web service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,
    /// Path prefix when mounted behind a reverse proxy, e.g. `/validatems`
    pub application_root: Option<String>,
    /// Maximum request body size in megabytes
    pub max_upload_mb: u64,
}

/// Scratch directory configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScratchConfig {
    /// Directory uploads are stored in while being validated
    pub directory: PathBuf,
    /// Seconds between sweeps for leaked files
    pub sweep_interval_seconds: u64,
    /// Age in seconds after which a leftover file is swept
    pub stale_after_seconds: u64,
}

/// Schema configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SchemaConfig {
    /// XSD file to use instead of the bundled schema
    pub path: Option<PathBuf>,
    /// Namespace stripped from diagnostics; defaults to the schema's targetNamespace
    pub namespace: Option<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent sent with the probe and the fetch
    pub user_agent: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log at debug level to stdout instead of the daily file
    pub debug: bool,
    /// Directory for `<YYYY-MM-DD>.log` files
    pub directory: PathBuf,
    /// Emit JSON lines instead of text
    pub json: bool,
}

fn local_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("validatems")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5014".to_string(),
            application_root: None,
            max_upload_mb: 16,
        }
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            directory: local_data_dir().join("instance"),
            sweep_interval_seconds: 300,
            stale_after_seconds: 3600,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug: false,
            directory: local_data_dir().join("logs"),
            json: false,
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    /// Same as [`Self::load_config`] with a custom environment provider
    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides_with(env, config)?;

        // CLI has the highest precedence
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "validatems.toml",
            "validatems.json",
            ".validatems.toml",
            ".validatems.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("validatems");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Server settings
        if let Some(bind) = env.get("VALIDATEMS_BIND") {
            config.server.bind = bind;
        }
        if let Some(root) = env.get("VALIDATEMS_APPLICATION_ROOT") {
            config.server.application_root = Some(root).filter(|root| !root.is_empty());
        }

        // Scratch settings
        if let Some(dir) = env.get("VALIDATEMS_SCRATCH_DIR") {
            config.scratch.directory = PathBuf::from(dir);
        }

        // Schema settings
        if let Some(schema) = env.get("VALIDATEMS_SCHEMA") {
            config.schema.path = Some(PathBuf::from(schema));
        }
        if let Some(namespace) = env.get("VALIDATEMS_SCHEMA_NAMESPACE") {
            config.schema.namespace = Some(namespace);
        }

        // Network settings
        if let Some(timeout) = parse_env(env, "VALIDATEMS_TIMEOUT")? {
            config.network.timeout_seconds = timeout;
        }

        // Logging settings
        if let Some(debug) = parse_env(env, "VALIDATEMS_DEBUG")? {
            config.logging.debug = debug;
        }
        if let Some(dir) = env.get("VALIDATEMS_LOG_DIR") {
            config.logging.directory = PathBuf::from(dir);
        }
        if let Some(json) = parse_env(env, "VALIDATEMS_LOG_JSON")? {
            config.logging.json = json;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(dir) = &cli.scratch_dir {
            config.scratch.directory = dir.clone();
        }
        if let Some(schema) = &cli.schema {
            config.schema.path = Some(schema.clone());
        }
        if let Some(timeout) = cli.timeout {
            config.network.timeout_seconds = timeout;
        }
        if cli.debug {
            config.logging.debug = true;
        }
        if let Some(dir) = &cli.log_dir {
            config.logging.directory = dir.clone();
        }

        if let Command::Serve {
            bind,
            application_root,
        } = &cli.command
        {
            if let Some(bind) = bind {
                config.server.bind = bind.clone();
            }
            if application_root.is_some() {
                config.server.application_root = application_root.clone();
            }
        }

        config
    }

    /// Merge two configurations (second takes precedence for non-None values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        base.server.bind = override_config.server.bind;
        if override_config.server.application_root.is_some() {
            base.server.application_root = override_config.server.application_root;
        }
        base.server.max_upload_mb = override_config.server.max_upload_mb;

        base.scratch = override_config.scratch;

        if override_config.schema.path.is_some() {
            base.schema.path = override_config.schema.path;
        }
        if override_config.schema.namespace.is_some() {
            base.schema.namespace = override_config.schema.namespace;
        }

        base.network = override_config.network;
        base.logging = override_config.logging;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid bind address: {}",
                config.server.bind
            )));
        }

        if let Some(root) = &config.server.application_root
            && (!root.starts_with('/') || root.ends_with('/'))
        {
            return Err(ConfigError::Validation(format!(
                "Application root must start with '/' and not end with '/': {}",
                root
            )));
        }

        if config.server.max_upload_mb == 0 {
            return Err(ConfigError::Validation(
                "Maximum upload size must be greater than 0".to_string(),
            ));
        }

        if config.scratch.sweep_interval_seconds == 0 {
            return Err(ConfigError::Validation(
                "Sweep interval must be greater than 0".to_string(),
            ));
        }

        if config.network.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.network.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(ConfigError::Validation(format!(
                "Timeout cannot exceed {} seconds",
                MAX_TIMEOUT_SECONDS
            )));
        }

        Ok(())
    }

    /// Convert configuration to Duration for network timeout
    pub fn get_timeout_duration(config: &Config) -> Duration {
        Duration::from_secs(config.network.timeout_seconds)
    }

    pub fn get_sweep_interval(config: &Config) -> Duration {
        Duration::from_secs(config.scratch.sweep_interval_seconds)
    }

    pub fn get_stale_after(config: &Config) -> Duration {
        Duration::from_secs(config.scratch.stale_after_seconds)
    }

    /// Request body limit in bytes
    pub fn get_max_upload_bytes(config: &Config) -> usize {
        usize::try_from(config.server.max_upload_mb.saturating_mul(1024 * 1024))
            .unwrap_or(usize::MAX)
    }

    pub fn get_http_client_config(config: &Config) -> HttpClientConfig {
        HttpClientConfig {
            timeout_seconds: config.network.timeout_seconds,
            user_agent: config.network.user_agent.clone(),
        }
    }
}

fn parse_env<T: FromStr>(env: &impl EnvProvider, key: &str) -> Result<Option<T>> {
    env.get(key)
        .map(|value| {
            value.trim().parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid {} value: {}", key, value))
            })
        })
        .transpose()
}
