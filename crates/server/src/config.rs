//! # Application Configuration
//!
//! Defines the configuration structure for the `cityrag-server` and the
//! logic for loading it. Defaults are layered under an optional `config.yml`
//! (with `${VAR}` environment substitution), and plain environment variables
//! override top-level keys last.

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use tracing::info;

/// A custom error type for configuration issues.
#[derive(Debug)]
pub enum ConfigError {
    /// Indicates an error from the underlying `config` crate.
    General(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::General(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::General(err.to_string())
    }
}

/// The root configuration structure, mapping directly to `config.yml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// The port for the server to listen on. Loaded from `PORT` env var.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory scanned by the ingestion endpoint. Loaded from `DATA_DIR`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// The AI provider to use ("gemini" or "local").
    #[serde(default = "default_ai_provider")]
    pub ai_provider: String,
    /// The AI API endpoint URL.
    #[serde(default)]
    pub ai_api_url: String,
    /// The AI API key. Required for the gemini provider.
    #[serde(default)]
    pub ai_api_key: Option<String>,
    /// The model name, for providers that select one per request.
    #[serde(default)]
    pub ai_model: Option<String>,

    /// Pipeline tuning knobs, all optional in the file.
    #[serde(default)]
    pub pipeline: PipelineSection,
}

fn default_port() -> u16 {
    9090
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_ai_provider() -> String {
    "local".to_string()
}

/// The `pipeline:` section of `config.yml`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineSection {
    pub context_window_size: Option<usize>,
    pub search_k: Option<usize>,
    pub index_batch_size: Option<usize>,
    pub sample_rows: Option<usize>,
    pub max_tool_calls: Option<usize>,
    pub max_attempts: Option<u32>,
}

impl PipelineSection {
    /// Applies the file's overrides on top of the library defaults.
    pub fn resolve(&self) -> cityrag::PipelineConfig {
        let defaults = cityrag::PipelineConfig::default();
        cityrag::PipelineConfig {
            context_window_size: self.context_window_size.unwrap_or(defaults.context_window_size),
            search_k: self.search_k.unwrap_or(defaults.search_k),
            index_batch_size: self.index_batch_size.unwrap_or(defaults.index_batch_size),
            sample_rows: self.sample_rows.unwrap_or(defaults.sample_rows),
            max_tool_calls: self.max_tool_calls.unwrap_or(defaults.max_tool_calls),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
        }
    }
}

/// Reads a file and substitutes `${VAR}` references from the environment.
/// Returns `Ok(None)` if the file does not exist.
fn read_and_substitute(path: &str) -> Result<Option<String>, ConfigError> {
    if !std::path::Path::new(path).exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::General(format!("Failed to read config file '{path}': {e}")))?;

    let re = Regex::new(r"\$\{(?P<var>[A-Z0-9_]+)\}")
        .map_err(|e| ConfigError::General(e.to_string()))?;
    let expanded_content = re.replace_all(&content, |caps: &regex::Captures| {
        let var_name = &caps["var"];
        env::var(var_name).unwrap_or_else(|_| "".to_string())
    });

    Ok(Some(expanded_content.to_string()))
}

/// Loads the application configuration.
///
/// Layering, lowest to highest precedence:
/// 1. Built-in defaults.
/// 2. `config.yml` next to the manifest (or `config_path_override`), with
///    `${VAR}` substitution.
/// 3. Environment variables for top-level keys (`PORT`, `DATA_DIR`,
///    `AI_PROVIDER`, `AI_API_URL`, `AI_API_KEY`, `AI_MODEL`).
pub fn get_config(config_path_override: Option<&str>) -> Result<AppConfig, ConfigError> {
    let base_path = env!("CARGO_MANIFEST_DIR");
    let mut builder = ConfigBuilder::builder();

    let config_path = config_path_override
        .map(str::to_string)
        .unwrap_or_else(|| format!("{base_path}/config.yml"));
    if let Some(content) = read_and_substitute(&config_path)? {
        info!("Loading configuration from '{config_path}'.");
        builder = builder.add_source(File::from_str(&content, FileFormat::Yaml));
    }

    let settings = builder.add_source(Environment::default()).build()?;

    let config: AppConfig = settings.try_deserialize()?;
    Ok(config)
}
