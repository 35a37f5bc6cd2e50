//! Configuration file loading and error types.

use std::{fs, path::Path};

use sslwrap_core::errors::ERROR_CONFIG;

use crate::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format: {0:?}")]
    UnsupportedFormat(String),
    #[error("validation: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn error_type(&self) -> &'static str {
        ERROR_CONFIG
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)?;
    let format = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    parse_config(&data, format)
}

/// Parse config text in the format named by a file extension.
pub fn parse_config(data: &str, format: &str) -> Result<Config, ConfigError> {
    match format {
        "json" | "jsonc" => {
            let stripped = json_comments::StripComments::new(data.as_bytes());
            Ok(serde_json::from_reader(stripped)?)
        }
        "yaml" | "yml" => Ok(serde_yaml::from_str(data)?),
        "toml" => Ok(toml::from_str(data)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}
