use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DEFAULT_MODEL: &str = "api-sonnet";

/// Settings from `config.toml`, all optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    model: Option<String>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    grounding: Option<bool>,
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub grounding: bool,
    pub data_dir: PathBuf,
}

impl Config {
    /// File settings, then `OFFERLENS_*` environment overrides.
    pub fn load() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "offerlens");
        let file = match &dirs {
            Some(dirs) => read_file_config(&dirs.config_dir().join("config.toml"))?,
            None => FileConfig::default(),
        };
        let default_data_dir = dirs
            .as_ref()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let mut config = Self::from_file(file, default_data_dir);
        if let Ok(model) = std::env::var("OFFERLENS_MODEL") {
            config.model = model;
        }
        if let Ok(dir) = std::env::var("OFFERLENS_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    fn from_file(file: FileConfig, default_data_dir: PathBuf) -> Self {
        Self {
            model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: file.max_tokens.unwrap_or(16000),
            timeout: Duration::from_secs(file.timeout_secs.unwrap_or(180)),
            grounding: file.grounding.unwrap_or(true),
            data_dir: file.data_dir.unwrap_or(default_data_dir),
        }
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_file_config(&text).with_context(|| format!("Invalid config file {}", path.display()))
}

fn parse_file_config(text: &str) -> Result<FileConfig> {
    let file: FileConfig = toml::from_str(text)?;
    if file.max_tokens == Some(0) {
        return Err(anyhow!("max_tokens must be greater than zero"));
    }
    if file.timeout_secs == Some(0) {
        return Err(anyhow!("timeout_secs must be greater than zero"));
    }
    Ok(file)
}
