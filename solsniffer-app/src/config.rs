use crate::error::AppError;
use anyhow::{Context, Result};
use serde::Deserialize;
use solsniffer_connector::config::ConnectorConfig;
use solsniffer_logger::LogConfig;

/// The top-level configuration for the SOLSniffer application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub app: AppSettings,
}

/// Settings that belong to the binary rather than the connector library.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppSettings {
    pub name: String,
    pub environment: Environment,
    /// Directory of the `sled` database holding records and the checkpoint.
    pub db_path: String,
    pub log: LogConfig,
}

/// The deployment stage the process runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    #[default]
    Local,
    Testing,
    Staging,
    StagingCanary,
    Canary,
    Production,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "solsniffer".to_string(),
            environment: Environment::Local,
            db_path: "./solsniffer.db".to_string(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.app.db_path.trim().is_empty() {
            return Err(AppError::InvalidConfig("app.db-path must not be empty".to_string()));
        }
        self.connector.validate().map_err(AppError::from_validation)
    }
}

/// Loads the configuration from an optional TOML file, then applies
/// `SOLSNIFFER__SECTION__KEY` environment overrides on top.
pub fn load_config(path: Option<&str>) -> Result<AppConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("SOLSNIFFER")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("connector.monitor.wallets")
            .with_list_parse_key("connector.monitor.tokens"),
    );

    let source = path.unwrap_or("environment");
    let settings: AppConfig = builder
        .build()
        .context(format!("Failed to build configuration from '{}'", source))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
