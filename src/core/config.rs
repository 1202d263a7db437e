use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::brief::BriefConfig;
use crate::services::image::ImageConfig;
use crate::services::llm::LlmConfig;
use crate::services::moderation::ModerationConfig;
use crate::services::tts::AudioConfig;
use crate::services::video::VideoConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_audio_folder")]
    pub audio_folder: String,

    #[serde(default = "default_assets_folder")]
    pub assets_folder: String,

    #[serde(default = "default_output_folder")]
    pub output_folder: String,

    #[serde(default = "default_music_folder")]
    pub music_folder: String,

    #[serde(default = "default_build_folder")]
    pub build_folder: String,

    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub brief: BriefConfig,

    pub llm: LlmConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub moderation: ModerationConfig,

    #[serde(default)]
    pub video: VideoConfig,
}

fn default_audio_folder() -> String {
    "audio".to_string()
}
fn default_assets_folder() -> String {
    "assets".to_string()
}
fn default_output_folder() -> String {
    "output".to_string()
}
fn default_music_folder() -> String {
    "music".to_string()
}
fn default_build_folder() -> String {
    "build".to_string()
}
fn default_metadata_file() -> String {
    "metadata.json".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.audio_folder)?;
        fs::create_dir_all(&self.assets_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }

    /// Directory holding `scene_NN.mp3` / `scene_NN.txt` for a sanitized title.
    pub fn audio_dir(&self, title: &str) -> String {
        join(&self.audio_folder, title)
    }

    /// Directory holding `scene_NN.png` for a sanitized title.
    pub fn image_dir(&self, title: &str) -> String {
        join(&self.assets_folder, title)
    }

    pub fn output_path(&self, title: &str) -> String {
        join(&self.output_folder, &format!("{}.mp4", title))
    }
}

pub(crate) fn join(base: &str, child: &str) -> String {
    Path::new(base).join(child).to_string_lossy().to_string()
}
