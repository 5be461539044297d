use crate::core::config::LlmConfig;
use crate::core::error::ScriptError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Gemini,
    Groq,
    Local,
}

impl Provider {
    pub fn requires_credential(&self) -> bool {
        !matches!(self, Provider::Local)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Provider::OpenAi => "OpenAI",
            Provider::Gemini => "Gemini",
            Provider::Groq => "Groq",
            Provider::Local => "Local LLM",
        };
        f.write_str(label)
    }
}

impl FromStr for Provider {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            "groq" => Ok(Provider::Groq),
            "local" | "local llm" | "ollama" => Ok(Provider::Local),
            _ => Err(ScriptError::UnknownProvider(s.to_string())),
        }
    }
}

/// Per-request completion settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
}

impl LlmSettings {
    /// The configured default provider, used by the command-line path.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ScriptError> {
        Ok(Self {
            provider: config.provider.parse()?,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

/// A local inference backend that was loaded by someone else.
///
/// The handle is only ever cloned and called; loading, unloading and
/// device memory stay with whoever created it.
#[derive(Debug, Clone)]
pub struct LocalModelHandle(Arc<dyn LlmClient>);

impl LocalModelHandle {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self(client)
    }

    pub fn client(&self) -> Arc<dyn LlmClient> {
        self.0.clone()
    }
}

pub fn create_llm(
    settings: &LlmSettings,
    config: &LlmConfig,
    local: Option<&LocalModelHandle>,
) -> Result<Arc<dyn LlmClient>> {
    let api_key = || {
        settings
            .credential()
            .map(str::to_string)
            .ok_or(ScriptError::MissingCredential(settings.provider))
    };

    let client: Arc<dyn LlmClient> = match settings.provider {
        Provider::OpenAi => {
            let base_url = config.openai.as_ref().map(|c| c.base_url.as_str());
            Arc::new(OpenAIClient::new(&api_key()?, &settings.model, base_url))
        }
        Provider::Groq => {
            let base_url = config
                .groq
                .as_ref()
                .map(|c| c.base_url.as_str())
                .unwrap_or(GROQ_BASE_URL);
            Arc::new(OpenAIClient::new(&api_key()?, &settings.model, Some(base_url)).with_max_tokens(1024))
        }
        Provider::Gemini => {
            let base_url = config.gemini.as_ref().map(|c| c.base_url.as_str());
            Arc::new(GeminiClient::new(&api_key()?, &settings.model, base_url))
        }
        Provider::Local => {
            let handle = local.ok_or(ScriptError::LocalModelUnavailable)?;
            handle.client()
        }
    };

    Ok(Arc::new(
        RetryingClient::new(
            client,
            config.retry_count,
            Duration::from_secs(config.retry_delay_seconds),
        )
        .with_attempt_timeout(Duration::from_secs(config.timeout_seconds)),
    ))
}

/// Upper bound for one pipeline stage: every attempt timing out, plus the
/// delays between them.
pub fn stage_timeout(config: &LlmConfig) -> Duration {
    let attempts = config.retry_count as u64 + 1;
    Duration::from_secs(
        attempts * config.timeout_seconds + config.retry_count as u64 * config.retry_delay_seconds,
    )
}

/// Builds completion clients for incoming requests.
pub trait ClientFactory: Send + Sync {
    fn create(&self, settings: &LlmSettings) -> Result<Arc<dyn LlmClient>>;

    fn has_local_model(&self) -> bool;
}

pub struct ProviderFactory {
    config: LlmConfig,
    local: Option<LocalModelHandle>,
}

impl ProviderFactory {
    pub fn new(config: LlmConfig, local: Option<LocalModelHandle>) -> Self {
        Self { config, local }
    }

    /// Connects the local model configured under `llm.local`, if any.
    pub fn from_config(config: &LlmConfig) -> Self {
        let local = config.local.as_ref().map(|cfg| {
            log::info!("Using local model '{}' at {}", cfg.model, cfg.base_url);
            LocalModelHandle::new(Arc::new(OllamaClient::new(&cfg.base_url, &cfg.model)))
        });
        Self::new(config.clone(), local)
    }
}

impl ClientFactory for ProviderFactory {
    fn create(&self, settings: &LlmSettings) -> Result<Arc<dyn LlmClient>> {
        create_llm(settings, &self.config, self.local.as_ref())
    }

    fn has_local_model(&self) -> bool {
        self.local.is_some()
    }
}

// --- Retry ---

/// Retries failed completions after a fixed delay. Each attempt gets its own
/// timeout, and a timed-out attempt counts as a failure like any other.
#[derive(Debug)]
pub struct RetryingClient {
    inner: Arc<dyn LlmClient>,
    retry_count: usize,
    delay: Duration,
    attempt_timeout: Option<Duration>,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn LlmClient>, retry_count: usize, delay: Duration) -> Self {
        Self {
            inner,
            retry_count,
            delay,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> Result<String> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.complete(messages))
                .await
                .unwrap_or_else(|_| Err(anyhow!("completion timed out after {:?}", limit))),
            None => self.inner.complete(messages).await,
        }
    }
}

#[async_trait]
impl LlmClient for RetryingClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.attempt(messages).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.retry_count => {
                    attempt += 1;
                    log::warn!(
                        "Completion failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempt,
                        self.retry_count + 1,
                        e,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn system_text(messages: &[ChatMessage]) -> Option<String> {
    let parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

// --- Gemini ---

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.unwrap_or(GEMINI_BASE_URL).trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiRequest {
    fn from_messages(messages: &[ChatMessage]) -> Self {
        let contents = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        Self {
            contents,
            system_instruction: system_text(messages).map(|text| GeminiSystemInstruction {
                parts: vec![GeminiPart { text }],
            }),
        }
    }
}

impl GeminiResponse {
    fn into_text(self) -> Result<String> {
        if let Some(err) = self.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        let first = self
            .candidates
            .and_then(|c| c.into_iter().next())
            .context("Gemini response contained no candidates")?;

        let text: String = first
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&GeminiRequest::from_messages(messages))
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse Gemini response. Body: {}", response_text))?;
        result.into_text()
    }
}

// --- Ollama (local) ---

#[derive(Debug)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Local model error: {}", error_text));
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.message.content)
    }
}

// --- OpenAI (and OpenAI-compatible: Groq) ---

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string(),
            max_tokens: None,
            client: reqwest::Client::new(),
        }
    }

    fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: &self.model,
            messages,
            temperature: 0.7,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("OpenAI response empty or missing content"))
    }
}
