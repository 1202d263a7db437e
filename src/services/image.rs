use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::config::join;
use crate::core::io::Storage;
use crate::services::llm::{LlmClient, OPENAI_BASE_URL};
use crate::services::moderation::{Sanitizer, SanitizerKind};
use crate::services::retry::Backoff;
use crate::utils::naming::scene_file_name;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Vertical frame for short-form video.
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default)]
    pub retry_backoff: Backoff,
    #[serde(default)]
    pub retry_delay_seconds: u64,
    #[serde(default)]
    pub sanitizer: SanitizerKind,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            model: default_model(),
            size: default_size(),
            quality: default_quality(),
            max_retries: default_max_retries(),
            retry_backoff: Backoff::default(),
            retry_delay_seconds: 0,
            sanitizer: SanitizerKind::default(),
        }
    }
}

fn default_model() -> String {
    "dall-e-3".to_string()
}
fn default_size() -> String {
    "1024x1792".to_string()
}
fn default_quality() -> String {
    "standard".to_string()
}
fn default_max_retries() -> usize {
    2
}

#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Returns the base64-encoded image for a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// --- OpenAI Images ---

pub struct OpenAIImageClient {
    config: ImageConfig,
    client: reqwest::Client,
}

impl OpenAIImageClient {
    pub fn new(config: ImageConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    quality: &'a str,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[async_trait]
impl ImageClient for OpenAIImageClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/');

        let resp = self
            .client
            .post(format!("{}/images/generations", base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&ImageRequest {
                model: &self.config.model,
                prompt,
                n: 1,
                size: &self.config.size,
                quality: &self.config.quality,
                response_format: "b64_json",
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Image API error: {}", error_text));
        }

        let result: ImageResponse = resp.json().await?;
        result
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| anyhow!("Image response contained no b64_json payload"))
    }
}

pub fn build_description_prompt(text_on_screen: &str, voiceover: &str) -> String {
    format!(
        r#"You are a creative assistant for AI visuals.

Based on the following YouTube Shorts scene elements, write a single-sentence visual description of what should be shown:

Text on Screen: "{}"
Voiceover: "{}"

Rules:
- Don't make it too long. 1 or 2 sentences at most
- Don't repeat the text
- Don't mention "text" or "voice"
- Describe a vivid, vertical image that fits the scene
- Avoid logos, brands, watermarks
- Use cinematic, clean style

Only respond with the image description."#,
        text_on_screen, voiceover
    )
}

/// Best-effort name for a non-PNG payload, used in error messages.
fn sniff_format(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\xff\xd8\xff") {
        "JPEG"
    } else if bytes.starts_with(b"GIF8") {
        "GIF"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "WebP"
    } else {
        "unrecognised"
    }
}

/// Decodes a base64 image payload. Only PNG is accepted: scenes are saved as
/// `scene_NN.png` and assembly looks them up by that extension.
pub fn decode_image(payload: &str) -> Result<Vec<u8>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("Image payload is not valid base64")?;
    if !bytes.starts_with(PNG_SIGNATURE) {
        return Err(anyhow!(
            "Image API returned {} data, expected PNG",
            sniff_format(&bytes)
        ));
    }
    Ok(bytes)
}

/// Turns scene text into a persisted still image.
pub struct ImageGenerator {
    llm: Arc<dyn LlmClient>,
    sanitizer: Box<dyn Sanitizer>,
    client: Box<dyn ImageClient>,
    storage: Arc<dyn Storage>,
}

impl ImageGenerator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sanitizer: Box<dyn Sanitizer>,
        client: Box<dyn ImageClient>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            llm,
            sanitizer,
            client,
            storage,
        }
    }

    pub async fn describe_scene(&self, text_on_screen: &str, voiceover: &str) -> Result<String> {
        let prompt = build_description_prompt(text_on_screen, voiceover);
        let description = self.llm.chat("", &prompt).await?;
        Ok(description.trim().to_string())
    }

    /// One full attempt: describe, sanitize, generate, decode and write
    /// `scene_NN.png` under `image_dir`. Returns the written path.
    pub async fn generate_scene_image(
        &self,
        scene_number: u32,
        text_on_screen: &str,
        voiceover: &str,
        image_dir: &str,
    ) -> Result<String> {
        let description = self.describe_scene(text_on_screen, voiceover).await?;
        let sanitized = self.sanitizer.sanitize(&description).await;
        info!("Scene {} description sanitized", scene_number);

        let payload = self.client.generate(&sanitized).await?;
        let bytes = decode_image(&payload)?;

        let path = join(image_dir, &scene_file_name(scene_number, "png"));
        self.storage.write(&path, &bytes).await?;
        info!("Saved {}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::services::moderation::KeywordSanitizer;
    use std::sync::Mutex;

    fn tiny_png_b64() -> String {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(b"fake-ihdr");
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[derive(Debug)]
    struct DescribingLlm;

    #[async_trait]
    impl LlmClient for DescribingLlm {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            Ok("  A person stretching beside a bed at sunrise  ".to_string())
        }
    }

    struct RecordingImages {
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ImageClient for RecordingImages {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(tiny_png_b64())
        }
    }

    #[test]
    fn test_description_prompt_constraints() {
        let prompt = build_description_prompt("1. HYDRATE", "Drink water first.");
        assert!(prompt.contains("Text on Screen: \"1. HYDRATE\""));
        assert!(prompt.contains("Voiceover: \"Drink water first.\""));
        assert!(prompt.contains("Avoid logos, brands, watermarks"));
        assert!(prompt.contains("vertical image"));
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(decode_image("not base64!!").is_err());
        let not_png = base64::engine::general_purpose::STANDARD.encode(b"GIF89a");
        assert!(decode_image(&not_png).is_err());
        assert!(decode_image(&tiny_png_b64()).is_ok());
    }

    #[test]
    fn test_decode_image_names_the_rejected_format() {
        fn message(bytes: &[u8]) -> String {
            let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
            decode_image(&payload).unwrap_err().to_string()
        }

        assert_eq!(
            message(b"\xff\xd8\xff\xe0\x00\x10JFIF"),
            "Image API returned JPEG data, expected PNG"
        );
        assert!(message(b"RIFF\x24\x00\x00\x00WEBPVP8 ").contains("returned WebP data"));
        assert!(message(b"GIF89a").contains("returned GIF data"));
        assert!(message(b"hello").contains("returned unrecognised data"));
    }

    #[tokio::test]
    async fn test_generate_scene_image_writes_numbered_png() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image_dir = dir.path().join("assets/Habits");
        let prompts = Arc::new(Mutex::new(Vec::new()));

        let generator = ImageGenerator::new(
            Arc::new(DescribingLlm),
            Box::new(KeywordSanitizer),
            Box::new(RecordingImages {
                prompts: prompts.clone(),
            }),
            Arc::new(NativeStorage::new()),
        );

        let path = generator
            .generate_scene_image(3, "3. STRETCH", "Loosen up.", image_dir.to_str().unwrap())
            .await?;

        assert!(path.ends_with("scene_03.png"));
        assert!(std::fs::read(&path)?.starts_with(PNG_SIGNATURE));
        assert_eq!(
            prompts.lock().unwrap().as_slice(),
            ["A someone stretching beside a sofa at sunrise".to_string()]
        );
        Ok(())
    }
}
