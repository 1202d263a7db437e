use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::services::tts::{collect_audio, TtsClient};

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    pub base_url: Option<String>,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: default_voice_id(),
            model_id: default_model_id(),
            base_url: None,
        }
    }
}

fn default_voice_id() -> String {
    "pNInz6obpgDQGcFmaJgB".to_string()
}
fn default_model_id() -> String {
    "eleven_monolingual_v1".to_string()
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

pub struct ElevenLabsClient {
    config: ElevenLabsConfig,
    client: reqwest::Client,
}

impl ElevenLabsClient {
    pub fn new(config: ElevenLabsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn speech_url(&self) -> String {
        format!(
            "{}/text-to-speech/{}",
            self.config
                .base_url
                .as_deref()
                .unwrap_or(ELEVENLABS_BASE_URL)
                .trim_end_matches('/'),
            self.config.voice_id
        )
    }
}

#[async_trait]
impl TtsClient for ElevenLabsClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = self.speech_url();
        debug!("ElevenLabs synthesis: {} chars via {}", text.len(), url);

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.config.api_key)
            .header("Accept", "audio/mpeg")
            .json(&SpeechRequest {
                text,
                model_id: &self.config.model_id,
            })
            .send()
            .await?;

        collect_audio(resp, "ElevenLabs").await
    }
}
