use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_ENV: &str = "SYNTHCAST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub script: ScriptConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "openai", "gemini", "groq" or "local"
    #[serde(default)]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    pub openai: Option<EndpointConfig>,
    pub groq: Option<EndpointConfig>,
    pub gemini: Option<EndpointConfig>,
    pub local: Option<LocalModelConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            api_key: None,
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay(),
            timeout_seconds: default_timeout(),
            openai: None,
            groq: None,
            gemini: None,
            local: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LocalModelConfig {
    #[serde(default = "default_local_base_url")]
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScriptConfig {
    /// Sources at or below this many words are scripted in one call.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,
    #[serde(default = "default_chunk_max_words")]
    pub chunk_max_words: usize,
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: usize,
    /// How many main-script turns the intro/outro stage gets to see.
    #[serde(default = "default_preview_turns")]
    pub preview_turns: usize,
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,
    #[serde(default = "default_podcast_name")]
    pub default_podcast_name: String,
    #[serde(default = "default_min_source_words")]
    pub min_source_words: usize,
    /// Used by the `generate` command, which has no per-request settings.
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: u32,
    #[serde(default = "default_num_speakers")]
    pub default_num_speakers: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: default_chunk_threshold(),
            chunk_max_words: default_chunk_max_words(),
            words_per_minute: default_words_per_minute(),
            preview_turns: default_preview_turns(),
            chunk_concurrency: default_chunk_concurrency(),
            default_podcast_name: default_podcast_name(),
            min_source_words: default_min_source_words(),
            default_duration_minutes: default_duration_minutes(),
            default_num_speakers: default_num_speakers(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_provider() -> String {
    "gemini".to_string()
}
fn default_retry_count() -> usize {
    2
}
fn default_retry_delay() -> u64 {
    5
}
fn default_timeout() -> u64 {
    120
}
fn default_local_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_chunk_threshold() -> usize {
    1200
}
fn default_chunk_max_words() -> usize {
    3000
}
fn default_words_per_minute() -> usize {
    150
}
fn default_preview_turns() -> usize {
    5
}
fn default_chunk_concurrency() -> usize {
    1
}
fn default_podcast_name() -> String {
    "Synth-FM".to_string()
}
fn default_min_source_words() -> usize {
    500
}
fn default_duration_minutes() -> u32 {
    5
}
fn default_num_speakers() -> usize {
    2
}

impl Config {
    /// Loads from `$SYNTHCAST_CONFIG`, falling back to `config.yml`.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
