use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::services::llm::{LlmClient, OPENAI_BASE_URL};

pub const REWRITE_SYSTEM_PROMPT: &str = "You are a helpful assistant that rewrites scene descriptions to be safe \
for AI image generation. Avoid any mention or implication of violence, nudity, politics, \
or other sensitive topics. Keep the rewrite highly visual, creative, and aligned with the original intent.";

/// Substitutions applied in order by the keyword sanitizer.
pub const KEYWORD_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("bedroom", "living room"),
    ("person", "someone"),
    ("people", "a group"),
    ("yoga mat", "exercise mat"),
    ("bed", "sofa"),
    ("bathroom", "home interior"),
    ("nude", "outfit"),
    ("underwear", "clothes"),
    ("sleeping", "resting"),
];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModerationConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Rewrite descriptions that passed moderation too.
    #[serde(default = "default_rewrite_when_safe")]
    pub rewrite_when_safe: bool,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            model: None,
            rewrite_when_safe: default_rewrite_when_safe(),
        }
    }
}

fn default_rewrite_when_safe() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SanitizerKind {
    #[default]
    Moderation,
    Keyword,
}

#[async_trait]
pub trait ModerationClient: Send + Sync {
    /// True when the text violates content policy.
    async fn is_flagged(&self, text: &str) -> Result<bool>;
}

/// Makes a scene description safe to submit for image generation.
#[async_trait]
pub trait Sanitizer: Send + Sync {
    async fn sanitize(&self, description: &str) -> String;
}

pub fn create_sanitizer(
    kind: SanitizerKind,
    config: &ModerationConfig,
    llm: Arc<dyn LlmClient>,
) -> Box<dyn Sanitizer> {
    match kind {
        SanitizerKind::Moderation => Box::new(ModerationSanitizer::new(
            Box::new(OpenAIModerationClient::new(config)),
            llm,
            config.rewrite_when_safe,
        )),
        SanitizerKind::Keyword => Box::new(KeywordSanitizer),
    }
}

// --- Moderation endpoint ---

pub struct OpenAIModerationClient {
    api_key: String,
    base_url: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl OpenAIModerationClient {
    pub fn new(config: &ModerationConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
}

#[async_trait]
impl ModerationClient for OpenAIModerationClient {
    async fn is_flagged(&self, text: &str) -> Result<bool> {
        let resp = self
            .client
            .post(format!("{}/moderations", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&ModerationRequest {
                input: text,
                model: self.model.as_deref(),
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Moderation API error: {}", error_text));
        }

        let result: ModerationResponse = resp.json().await?;
        result
            .results
            .first()
            .map(|r| r.flagged)
            .ok_or_else(|| anyhow!("Moderation response has no results"))
    }
}

// --- Moderation + rewrite ---

pub struct ModerationSanitizer {
    moderation: Box<dyn ModerationClient>,
    llm: Arc<dyn LlmClient>,
    rewrite_when_safe: bool,
}

impl ModerationSanitizer {
    pub fn new(
        moderation: Box<dyn ModerationClient>,
        llm: Arc<dyn LlmClient>,
        rewrite_when_safe: bool,
    ) -> Self {
        Self {
            moderation,
            llm,
            rewrite_when_safe,
        }
    }

    /// A failed check counts as flagged.
    async fn is_potentially_unsafe(&self, text: &str) -> bool {
        match self.moderation.is_flagged(text).await {
            Ok(flagged) => {
                info!(
                    "Moderation check: {}",
                    if flagged { "unsafe" } else { "safe" }
                );
                flagged
            }
            Err(e) => {
                warn!("Moderation check failed: {:#}. Assuming unsafe.", e);
                true
            }
        }
    }

    /// Falls back to the original description when the rewrite fails.
    async fn rewrite(&self, description: &str) -> String {
        let user_prompt = format!(
            "Original scene description:\n{}\n\nRewrite it to be safe and suitable for image generation:",
            description
        );
        match self.llm.chat(REWRITE_SYSTEM_PROMPT, &user_prompt).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten.trim().to_string(),
            Ok(_) => {
                warn!("Rewrite returned empty text, keeping original description");
                description.to_string()
            }
            Err(e) => {
                warn!("Rewriting failed: {:#}", e);
                description.to_string()
            }
        }
    }
}

#[async_trait]
impl Sanitizer for ModerationSanitizer {
    async fn sanitize(&self, description: &str) -> String {
        info!("Checking and rewriting description...");
        if self.is_potentially_unsafe(description).await {
            info!("Unsafe or unverified. Rewriting...");
        } else if self.rewrite_when_safe {
            info!("Moderation passed. Rewriting anyway...");
        } else {
            return description.to_string();
        }
        self.rewrite(description).await
    }
}

// --- Keyword substitution ---

pub struct KeywordSanitizer;

impl KeywordSanitizer {
    pub fn substitute(prompt: &str) -> String {
        KEYWORD_SUBSTITUTIONS
            .iter()
            .fold(prompt.to_string(), |acc, (bad, good)| acc.replace(bad, good))
    }
}

#[async_trait]
impl Sanitizer for KeywordSanitizer {
    async fn sanitize(&self, description: &str) -> String {
        Self::substitute(description)
    }
}
