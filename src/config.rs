use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::settlement::{HandlerConfig, SettlementError};

/// Top-level service configuration, loaded from a single YAML file.
///
/// Logging options live next to the per-contract handler table so one file
/// describes a whole deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    /// One entry per monitored contract/chain pair, keyed by a free-form
    /// deployment name ("blast_mainnet", "arbitrum_sepolia", ...).
    pub service: HashMap<String, HandlerConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_file() -> String {
    "settlement.log".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl AppConfig {
    /// Load configuration from a YAML file and validate every handler entry.
    pub fn from_file(path: &str) -> Result<Self, SettlementError> {
        let content =
            fs::read_to_string(path).map_err(|e| SettlementError::Config(e.to_string()))?;
        let config: AppConfig =
            serde_yaml::from_str(&content).map_err(|e| SettlementError::Config(e.to_string()))?;
        for (name, handler) in &config.service {
            handler
                .validate()
                .map_err(|e| SettlementError::Config(format!("{name}: {e}")))?;
        }
        Ok(config)
    }
}
