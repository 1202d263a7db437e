use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{join, Config};
use crate::core::io::Storage;
use crate::core::state::{Metadata, Scene};
use crate::services::brief::Brief;
use crate::services::image::ImageGenerator;
use crate::services::llm::LlmClient;
use crate::services::retry::RetryPolicy;
use crate::services::script::{
    build_script_prompt, narration_text, parse_script, strip_code_blocks, SCRIPT_SYSTEM_PROMPT,
};
use crate::services::tts::TtsClient;
use crate::utils::naming::{sanitize_title, scene_file_name};

/// Drives one brief through script, narration and image generation.
pub struct WorkflowManager {
    config: Config,
    llm: Arc<dyn LlmClient>,
    tts: Box<dyn TtsClient>,
    images: ImageGenerator,
    storage: Arc<dyn Storage>,
    image_retry: RetryPolicy,
}

impl WorkflowManager {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        tts: Box<dyn TtsClient>,
        images: ImageGenerator,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let image_retry = RetryPolicy::new(
            config.image.max_retries,
            config.image.retry_backoff,
            Duration::from_secs(config.image.retry_delay_seconds),
        );
        Self {
            config,
            llm,
            tts,
            images,
            storage,
            image_retry,
        }
    }

    pub fn with_image_retry(mut self, policy: RetryPolicy) -> Self {
        self.image_retry = policy;
        self
    }

    pub async fn generate_script(&self, title: &str, brief: &Brief) -> Result<Vec<Scene>> {
        let prompt = build_script_prompt(title, brief);
        let script_text = self
            .llm
            .chat(SCRIPT_SYSTEM_PROMPT, &prompt)
            .await
            .context("Script generation failed")?;
        debug!("Generated script:\n{}", script_text);

        Ok(parse_script(&strip_code_blocks(&script_text)))
    }

    pub async fn run(&self, brief: &Brief) -> Result<Metadata> {
        let title = sanitize_title(&brief.topic);
        info!("Generating script for \"{}\"", title);

        let scenes = self.generate_script(&title, brief).await?;
        if scenes.is_empty() {
            warn!("Script produced no scenes; check the model output format");
        } else {
            info!("Parsed {} scenes", scenes.len());
        }

        let audio_dir = self.config.audio_dir(&title);
        let image_dir = self.config.image_dir(&title);

        let pb = ProgressBar::new(scenes.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );

        for scene in &scenes {
            pb.set_message(format!("scene {}", scene.scene_number));
            self.process_scene(scene, &audio_dir, &image_dir).await?;
            pb.inc(1);
        }
        pb.finish_with_message("assets generated");

        let metadata = Metadata {
            title: title.clone(),
            video_title: brief.topic.clone(),
            tone: brief.tone.clone(),
            scene_count: scenes.len(),
            scenes,
            music: brief.wants_music(),
            audio_folder: audio_dir,
            image_folder: image_dir,
            output_path: self.config.output_path(&title),
        };

        save_metadata(self.storage.as_ref(), &self.config.metadata_file, &metadata).await?;
        info!("Metadata saved to {}", self.config.metadata_file);
        Ok(metadata)
    }

    async fn process_scene(&self, scene: &Scene, audio_dir: &str, image_dir: &str) -> Result<()> {
        let narration = narration_text(scene);

        let audio = self
            .tts
            .synthesize(&narration)
            .await
            .with_context(|| format!("Speech synthesis failed for scene {}", scene.scene_number))?;
        let audio_path = join(audio_dir, &scene_file_name(scene.scene_number, "mp3"));
        self.storage.write(&audio_path, &audio).await?;
        info!("Scene {} audio saved to {}", scene.scene_number, audio_path);

        let transcript_path = join(audio_dir, &scene_file_name(scene.scene_number, "txt"));
        self.storage
            .write(&transcript_path, narration.as_bytes())
            .await?;

        let label = format!("Scene {} image", scene.scene_number);
        let result = self
            .image_retry
            .run(&label, |_| {
                self.images.generate_scene_image(
                    scene.scene_number,
                    &scene.text_on_screen,
                    &narration,
                    image_dir,
                )
            })
            .await;

        if let Err(e) = result {
            warn!(
                "Giving up on scene {} image after {} attempts: {:#}",
                scene.scene_number, self.image_retry.max_attempts, e
            );
        }
        Ok(())
    }
}

pub async fn save_metadata(storage: &dyn Storage, path: &str, metadata: &Metadata) -> Result<()> {
    let content = serde_json::to_string_pretty(metadata)?;
    storage.write(path, content.as_bytes()).await
}

pub async fn load_metadata(storage: &dyn Storage, path: &str) -> Result<Metadata> {
    if !storage.exists(path).await? {
        bail!("Metadata file {} not found. Run `autoshorts generate` first.", path);
    }
    let content = storage.read_to_string(path).await?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse metadata {}", path))
}
