//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to defaults
//! tuned for the Gemini structuring service.
//!
//! ```toml
//! [db]
//! path = "./data/uap.sqlite"
//!
//! [llm]
//! provider = "gemini"
//! model = "gemini-2.5-flash"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::DEFAULT_CHUNK_CHARS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub parsing: ParsingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub insights: InsightsConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParsingConfig {
    /// Characters per chunk sent to the structuring service.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_parse_workers")]
    pub workers: usize,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            workers: default_parse_workers(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_CHARS
}
fn default_parse_workers() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_workers")]
    pub workers: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            workers: default_search_workers(),
        }
    }
}

fn default_search_workers() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Records per analysis request.
    #[serde(default = "default_analysis_batch")]
    pub batch_size: usize,
    #[serde(default = "default_parse_workers")]
    pub workers: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_size: default_analysis_batch(),
            workers: default_parse_workers(),
        }
    }
}

fn default_analysis_batch() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct InsightsConfig {
    #[serde(default = "default_min_entries")]
    pub min_entries: usize,
    /// Cap on analysed records sent in one synthesis request.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            min_entries: default_min_entries(),
            max_entries: default_max_entries(),
            top_n: default_top_n(),
        }
    }
}

fn default_min_entries() -> usize {
    3
}
fn default_max_entries() -> usize {
    200
}
fn default_top_n() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// Lower bound on page workers; the hardware parallelism hint may raise it.
    #[serde(default = "default_parse_workers")]
    pub min_workers: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            min_workers: default_parse_workers(),
        }
    }
}

impl OcrConfig {
    pub fn workers(&self) -> usize {
        let hint = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        hint.max(self.min_workers).max(1)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Minimum spacing between two outgoing requests, across all workers.
    #[serde(default = "default_min_request_delay_ms")]
    pub min_request_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            min_request_delay_ms: default_min_request_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_min_request_delay_ms() -> u64 {
    1500
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// A configuration with defaults everywhere and the given database path.
    pub fn with_db(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            parsing: ParsingConfig::default(),
            search: SearchConfig::default(),
            analysis: AnalysisConfig::default(),
            insights: InsightsConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.parsing.chunk_size == 0 {
            anyhow::bail!("parsing.chunk_size must be > 0");
        }
        if self.parsing.workers == 0 || self.search.workers == 0 || self.analysis.workers == 0 {
            anyhow::bail!("worker counts must be >= 1");
        }
        if self.analysis.batch_size == 0 {
            anyhow::bail!("analysis.batch_size must be > 0");
        }
        if self.insights.top_n == 0 || self.insights.max_entries < self.insights.min_entries {
            anyhow::bail!("insights.top_n must be > 0 and max_entries >= min_entries");
        }

        match self.llm.provider.as_str() {
            "disabled" | "gemini" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be disabled or gemini.",
                other
            ),
        }
        if self.llm.is_enabled() && self.llm.model.trim().is_empty() {
            anyhow::bail!(
                "llm.model must be specified when provider is '{}'",
                self.llm.provider
            );
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"x.sqlite\"\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.parsing.chunk_size, 8000);
        assert_eq!(config.parsing.workers, 2);
        assert_eq!(config.search.workers, 5);
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.llm.min_request_delay_ms, 1500);
        assert!(!config.llm.is_enabled());
    }

    #[test]
    fn rejects_unknown_provider() {
        let config: Config =
            toml::from_str("[db]\npath = \"x\"\n[llm]\nprovider = \"openai\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let mut config = Config::with_db("x");
        config.parsing.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ocr_workers_respect_minimum() {
        let config = OcrConfig { min_workers: 64 };
        assert!(config.workers() >= 64);
    }
}
