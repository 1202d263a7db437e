use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::info;
use serde::{Deserialize, Serialize};

use crate::services::tts::elevenlabs::ElevenLabsConfig;
use crate::services::tts::openai::OpenAITtsConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String, // "elevenlabs" or "openai"
    pub elevenlabs: Option<ElevenLabsConfig>,
    pub openai: Option<OpenAITtsConfig>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            elevenlabs: None,
            openai: None,
        }
    }
}

fn default_tts_provider() -> String {
    "elevenlabs".to_string()
}

#[async_trait]
pub trait TtsClient: Send + Sync {
    /// Synthesizes narration and returns encoded MP3 bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

pub fn create_tts_client(config: &AudioConfig) -> Result<Box<dyn TtsClient>> {
    info!("Initializing TTS client for provider: {}", config.provider);
    match config.provider.as_str() {
        "elevenlabs" => {
            let cfg = config
                .elevenlabs
                .clone()
                .ok_or_else(|| anyhow!("ElevenLabs config missing"))?;
            Ok(Box::new(elevenlabs::ElevenLabsClient::new(cfg)))
        }
        "openai" => {
            let cfg = config
                .openai
                .clone()
                .ok_or_else(|| anyhow!("OpenAI TTS config missing"))?;
            Ok(Box::new(openai::OpenAITtsClient::new(cfg)))
        }
        _ => Err(anyhow!("Unknown TTS provider: {}", config.provider)),
    }
}

/// Collects a streamed audio response body.
pub(crate) async fn collect_audio(resp: reqwest::Response, provider: &str) -> Result<Vec<u8>> {
    if !resp.status().is_success() {
        let status = resp.status();
        let error_text = resp.text().await?;
        return Err(anyhow!("{} TTS error ({}): {}", provider, status, error_text));
    }

    let mut audio = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        audio.extend_from_slice(&chunk?);
    }

    if audio.is_empty() {
        return Err(anyhow!("{} TTS returned no audio", provider));
    }
    Ok(audio)
}

pub mod elevenlabs;
pub mod openai;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_provider_section_is_error() {
        let config = AudioConfig::default();
        assert!(create_tts_client(&config).is_err());
    }

    #[test]
    fn test_unknown_provider_is_error() {
        let config = AudioConfig {
            provider: "edge-tts".to_string(),
            ..Default::default()
        };
        assert!(create_tts_client(&config).is_err());
    }

    #[test]
    fn test_elevenlabs_client_created() {
        let config = AudioConfig {
            elevenlabs: Some(ElevenLabsConfig {
                api_key: "xi".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(create_tts_client(&config).is_ok());
    }
}
