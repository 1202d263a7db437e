use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::services::retry::{Backoff, RetryPolicy};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "openai", "gemini" or "ollama"
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    pub openai: Option<OpenAIConfig>,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

fn default_retry_count() -> usize {
    3
}
fn default_retry_delay() -> u64 {
    10
}
fn default_openai_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.8
}

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    /// Single-turn completion. An empty `system` sends only the user message.
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let inner: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI config missing")?;
            Box::new(OpenAIClient::new(cfg))
        }
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            Box::new(GeminiClient::new(&cfg.api_key, &cfg.model))
        }
        "ollama" => {
            let cfg = config.ollama.as_ref().context("Ollama config missing")?;
            Box::new(OllamaClient::new(&cfg.base_url, &cfg.model))
        }
        _ => return Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    };

    let policy = RetryPolicy::new(
        config.retry_count + 1,
        Backoff::Fixed,
        Duration::from_secs(config.retry_delay_seconds),
    );
    Ok(Arc::new(RetryingLlmClient::new(inner, policy)))
}

/// Wraps any client so every chat call follows a retry policy.
#[derive(Debug)]
pub struct RetryingLlmClient {
    inner: Box<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(inner: Box<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let inner = self.inner.as_ref();
        self.policy
            .run("LLM request", |_| inner.chat(system, user))
            .await
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(cfg: &OpenAIConfig) -> Self {
        Self {
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            base_url: cfg
                .base_url
                .as_deref()
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
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

fn openai_messages(system: &str, user: &str) -> Vec<OpenAIMessage> {
    let mut messages = Vec::with_capacity(2);
    if !system.is_empty() {
        messages.push(OpenAIMessage {
            role: "system".to_string(),
            content: system.to_string(),
        });
    }
    messages.push(OpenAIMessage {
        role: "user".to_string(),
        content: user.to_string(),
    });
    messages
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: openai_messages(system, user),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!("OpenAI chat request to {} ({})", url, self.model);
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
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.trim().to_string());
            }
        }

        Err(anyhow!("OpenAI response empty or missing content"))
    }
}

// --- Gemini ---

#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
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

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: user.to_string(),
                }],
            }],
            system_instruction: (!system.is_empty()).then(|| GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            }),
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            anyhow!(
                "Failed to parse Gemini response: {}. Body: {}",
                e,
                response_text
            )
        })?;

        if let Some(err) = result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        if let Some(first) = result.candidates.as_ref().and_then(|c| c.first()) {
            if let Some(part) = first.content.as_ref().and_then(|c| c.parts.first()) {
                return Ok(part.text.trim().to_string());
            }
            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }

        Err(anyhow!(
            "Gemini response format unexpected or empty. Body: {}",
            response_text
        ))
    }
}

// --- Ollama ---

#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
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
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: self.model.clone(),
            messages: openai_messages(system, user),
            stream: false,
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.message.content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "[TEXT ON SCREEN: \"1. WAKE UP\"]"
                },
                "finish_reason": "stop"
            }]
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("[TEXT ON SCREEN: \"1. WAKE UP\"]")
        );
    }

    #[test]
    fn test_empty_system_prompt_is_omitted() {
        let messages = openai_messages("", "describe the scene");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");

        let messages = openai_messages("You are a scriptwriter.", "write");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
    }

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                { "finishReason": "SAFETY", "index": 0 }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let candidate = &result.candidates.as_ref().unwrap()[0];
        assert!(candidate.content.is_none());
        assert_eq!(candidate.finish_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let config = LlmConfig {
            provider: "mock".to_string(),
            retry_count: 0,
            retry_delay_seconds: 0,
            openai: None,
            gemini: None,
            ollama: None,
        };
        assert!(create_llm(&config).is_err());
    }

    #[derive(Debug)]
    struct FlakyLlm {
        failures_left: Mutex<usize>,
    }

    #[async_trait]
    impl LlmClient for FlakyLlm {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(anyhow!("503"));
            }
            Ok("ok".to_string())
        }
    }

    #[tokio::test]
    async fn test_retrying_client_recovers() {
        let client = RetryingLlmClient::new(
            Box::new(FlakyLlm {
                failures_left: Mutex::new(2),
            }),
            RetryPolicy::new(3, Backoff::None, Duration::ZERO),
        );
        assert_eq!(client.chat("", "hi").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_retrying_client_gives_up() {
        let client = RetryingLlmClient::new(
            Box::new(FlakyLlm {
                failures_left: Mutex::new(5),
            }),
            RetryPolicy::new(2, Backoff::None, Duration::ZERO),
        );
        assert!(client.chat("", "hi").await.is_err());
    }
}
