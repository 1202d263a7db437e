use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::services::llm::OPENAI_BASE_URL;
use crate::services::tts::{collect_audio, TtsClient};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAITtsConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "tts-1".to_string()
}
fn default_voice() -> String {
    "onyx".to_string()
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

pub struct OpenAITtsClient {
    config: OpenAITtsConfig,
    client: reqwest::Client,
}

impl OpenAITtsClient {
    pub fn new(config: OpenAITtsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TtsClient for OpenAITtsClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/');

        let resp = self
            .client
            .post(format!("{}/audio/speech", base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&SpeechRequest {
                model: &self.config.model,
                input: text,
                voice: &self.config.voice,
                response_format: "mp3",
            })
            .send()
            .await?;

        collect_audio(resp, "OpenAI").await
    }
}
