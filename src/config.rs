use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::okr::{InvalidIdentifier, ProjectId, TableGroup};

const DEFAULT_CONFIG_FILE: &str = ".figma-okr.toml";
const DEFAULT_FIGMA_URL: &str = "https://api.figma.com/v1/files";
const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DEFAULT_PROJECT: &str = "atb-mobility-platform";
const DEFAULT_TABLE_GROUP: &str = "figma_comments_okr";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] InvalidIdentifier),

    #[error("Invalid value for {name}: {value:?}")]
    Env { name: &'static str, value: String },
}

/// Top-level configuration loaded from .figma-okr.toml.
///
/// All fields are optional; secrets normally come from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Figma API settings
    #[serde(default)]
    pub figma: FigmaConfig,

    /// BigQuery destination settings
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// HTTP trigger settings
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FigmaConfig {
    /// Personal access token. If None, falls back to FIGMA_SECRET env var.
    pub token: Option<String>,
    /// Files endpoint; comments live under `{base_url}/{file}/comments`
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for FigmaConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: DEFAULT_FIGMA_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl FigmaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Google Cloud project owning the dataset
    pub project: String,
    /// Dataset holding one table per file. Overridden by TABLE_NAME.
    pub table_group: String,
    /// OAuth access token. If None, falls back to BIGQUERY_ACCESS_TOKEN env var.
    pub access_token: Option<String>,
    /// BigQuery REST root
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project: DEFAULT_PROJECT.to_string(),
            table_group: DEFAULT_TABLE_GROUP.to_string(),
            access_token: None,
            endpoint: DEFAULT_BIGQUERY_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl WarehouseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn project(&self) -> Result<ProjectId, InvalidIdentifier> {
        ProjectId::parse(&self.project)
    }

    pub fn table_group(&self) -> Result<TableGroup, InvalidIdentifier> {
        TableGroup::parse(&self.table_group)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: IpAddr,
    /// Listening port. Overridden by PORT.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or .figma-okr.toml in the current
    /// directory when no path is given. Returns defaults if that file
    /// doesn't exist. Environment variables are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_from(path)?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Fill secrets and overrides from the environment. Tokens already set
    /// in the file win; TABLE_NAME and PORT override the file.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if self.figma.token.is_none() {
            self.figma.token = var("FIGMA_SECRET");
        }
        if self.warehouse.access_token.is_none() {
            self.warehouse.access_token = var("BIGQUERY_ACCESS_TOKEN");
        }
        if let Some(table) = var("TABLE_NAME") {
            self.warehouse.table_group = table;
        }
        if let Some(port) = var("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Env {
                name: "PORT",
                value: port,
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.warehouse.project()?;
        self.warehouse.table_group()?;
        Ok(())
    }
}
