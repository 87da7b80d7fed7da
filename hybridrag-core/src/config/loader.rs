use std::fs;
use std::path::Path;

use crate::config::RagConfig;
use crate::core::{RagError, Result};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML configuration format
    Toml,
    /// JSON configuration format
    Json,
}

impl ConfigFormat {
    /// Determine configuration format from file extension
    pub fn from_extension(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Load and validate configuration from file
pub fn load_config(path: impl AsRef<Path>) -> Result<RagConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RagError::Config {
            message: format!("Configuration file not found: {}", path.display()),
        });
    }

    let content = fs::read_to_string(path)?;
    let config = match ConfigFormat::from_extension(path) {
        ConfigFormat::Toml => load_toml_config(&content)?,
        ConfigFormat::Json => load_json_config(&content)?,
    };
    config.validate()?;

    tracing::info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Write configuration in the format implied by the file extension
pub fn save_config(config: &RagConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let content = match ConfigFormat::from_extension(path) {
        ConfigFormat::Toml => save_toml_config(config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
    };
    fs::write(path, content)?;
    Ok(())
}

#[cfg(feature = "toml-support")]
fn load_toml_config(content: &str) -> Result<RagConfig> {
    toml::from_str(content).map_err(|e| RagError::Config {
        message: format!("Failed to parse TOML config: {e}"),
    })
}

#[cfg(not(feature = "toml-support"))]
fn load_toml_config(_content: &str) -> Result<RagConfig> {
    Err(RagError::Config {
        message: "TOML support not enabled. Enable 'toml-support' feature.".to_string(),
    })
}

#[cfg(feature = "toml-support")]
fn save_toml_config(config: &RagConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| RagError::Config {
        message: format!("Failed to serialize TOML config: {e}"),
    })
}

#[cfg(not(feature = "toml-support"))]
fn save_toml_config(_config: &RagConfig) -> Result<String> {
    Err(RagError::Config {
        message: "TOML support not enabled. Enable 'toml-support' feature.".to_string(),
    })
}

fn load_json_config(content: &str) -> Result<RagConfig> {
    serde_json::from_str(content).map_err(|e| RagError::Config {
        message: format!("Failed to parse JSON config: {e}"),
    })
}
