use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::core::config::{join, Config};
use crate::core::io::Storage;
use crate::core::state::{Metadata, Scene};
use crate::services::llm::LlmClient;
use crate::utils::naming::{
    index_by_scene_number, is_plain_component, is_strictly_inside, scene_file_name,
};

pub mod ffmpeg;
pub mod music;

use ffmpeg::{escape_filter_value, FfmpegCommand, MediaRunner};
use music::{classify_music, select_music};

// Rough glyph advance relative to font size for a bold sans font.
const GLYPH_WIDTH_RATIO: f64 = 0.55;
const CAPTION_WIDTH_RATIO: f64 = 0.9;
const CAPTION_BOX_BORDER: u32 = 20;
const AUDIO_SAMPLE_RATE: &str = "44100";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VideoConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_crossfade")]
    pub crossfade_seconds: f64,
    #[serde(default = "default_intro")]
    pub intro_seconds: f64,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    pub font_file: Option<String>,
    #[serde(default = "default_box_opacity")]
    pub caption_box_opacity: f64,
    #[serde(default = "default_music_volume")]
    pub music_volume: f64,
    #[serde(default = "default_fade_in")]
    pub music_fade_in_seconds: f64,
    #[serde(default = "default_fade_out")]
    pub music_fade_out_seconds: f64,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            crossfade_seconds: default_crossfade(),
            intro_seconds: default_intro(),
            font_size: default_font_size(),
            font_file: None,
            caption_box_opacity: default_box_opacity(),
            music_volume: default_music_volume(),
            music_fade_in_seconds: default_fade_in(),
            music_fade_out_seconds: default_fade_out(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            preset: default_preset(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

fn default_width() -> u32 {
    1024
}
fn default_height() -> u32 {
    1792
}
fn default_fps() -> u32 {
    30
}
fn default_crossfade() -> f64 {
    0.5
}
fn default_intro() -> f64 {
    1.0
}
fn default_font_size() -> u32 {
    50
}
fn default_box_opacity() -> f64 {
    0.6
}
fn default_music_volume() -> f64 {
    0.07
}
fn default_fade_in() -> f64 {
    1.5
}
fn default_fade_out() -> f64 {
    2.0
}
fn default_video_codec() -> String {
    "libx264".to_string()
}
fn default_audio_codec() -> String {
    "aac".to_string()
}
fn default_preset() -> String {
    "medium".to_string()
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

/// On-screen caption for the scene at `index` (0-based position in the
/// video). The opening scene and any closing scene show their narration,
/// every other scene shows its caption.
pub fn caption_source(index: usize, scene: &Scene) -> &str {
    if index == 0 || scene.text_on_screen.to_uppercase().contains("CLOSING") {
        &scene.voiceover
    } else {
        &scene.text_on_screen
    }
}

/// Characters per caption line that fit in 90% of the frame width.
pub fn caption_max_chars(video: &VideoConfig) -> usize {
    let usable = video.width as f64 * CAPTION_WIDTH_RATIO;
    let glyph = video.font_size.max(1) as f64 * GLYPH_WIDTH_RATIO;
    ((usable / glyph).floor() as usize).max(1)
}

/// Greedy word wrap. Words longer than a line stay on a line of their own.
pub fn wrap_caption(text: &str, max_chars: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.join("\n")
}

/// Image scaled to the frame, caption band at the bottom, fade in from black.
pub fn scene_filter(video: &VideoConfig, caption_file: &str) -> String {
    let mut drawtext = format!(
        "drawtext=textfile={}:expansion=none:fontsize={}:fontcolor=white:line_spacing=10:x=(w-text_w)/2:y=h-text_h-{}:box=1:boxcolor=black@{:.2}:boxborderw={}",
        escape_filter_value(caption_file),
        video.font_size,
        CAPTION_BOX_BORDER,
        video.caption_box_opacity,
        CAPTION_BOX_BORDER
    );
    if let Some(font) = &video.font_file {
        drawtext.push_str(&format!(":fontfile={}", escape_filter_value(font)));
    }

    format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,{drawtext},fade=t=in:st=0:d={fade},format=yuv420p[v]",
        w = video.width,
        h = video.height,
        drawtext = drawtext,
        fade = video.crossfade_seconds
    )
}

/// Background track looped to `total` seconds, faded at both ends and mixed
/// under the narration.
pub fn music_filter(video: &VideoConfig, total: f64) -> String {
    let fade_out_start = (total - video.music_fade_out_seconds).max(0.0);
    format!(
        "[1:a]volume={},atrim=0:{:.3},asetpts=N/SR/TB,afade=t=in:st=0:d={},afade=t=out:st={:.3}:d={}[bg];[0:a][bg]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[a]",
        video.music_volume,
        total,
        video.music_fade_in_seconds,
        fade_out_start,
        video.music_fade_out_seconds
    )
}

fn encoded(command: FfmpegCommand, video: &VideoConfig) -> FfmpegCommand {
    command
        .video_codec(video.video_codec.clone())
        .preset(video.preset.clone())
        .output_args(["-pix_fmt", "yuv420p"])
        .frame_rate(video.fps)
        .audio_codec(video.audio_codec.clone())
        .output_args(["-ar", AUDIO_SAMPLE_RATE, "-ac", "2"])
}

/// Scene plus the files resolved for it.
#[derive(Debug, Clone)]
pub struct SceneAssets {
    pub scene: Scene,
    pub image: String,
    pub audio: String,
}

pub struct VideoAssembler {
    config: Config,
    llm: Arc<dyn LlmClient>,
    storage: Arc<dyn Storage>,
    runner: Box<dyn MediaRunner>,
}

impl VideoAssembler {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        storage: Arc<dyn Storage>,
        runner: Box<dyn MediaRunner>,
    ) -> Self {
        Self {
            config,
            llm,
            storage,
            runner,
        }
    }

    /// Pairs every scene with its `scene_NN.png` and `scene_NN.mp3` by scene
    /// number. Any scene without both files is an error.
    pub async fn resolve_assets(&self, metadata: &Metadata) -> Result<Vec<SceneAssets>> {
        let images = index_by_scene_number(&self.storage.list(&metadata.image_folder).await?, "png")?;
        let audio = index_by_scene_number(&self.storage.list(&metadata.audio_folder).await?, "mp3")?;

        let mut resolved = Vec::with_capacity(metadata.scenes.len());
        for scene in &metadata.scenes {
            let n = scene.scene_number;
            let image = images
                .get(&n)
                .ok_or_else(|| anyhow!("Missing image for scene {}", n))?;
            let audio = audio
                .get(&n)
                .ok_or_else(|| anyhow!("Missing audio for scene {}", n))?;
            resolved.push(SceneAssets {
                scene: scene.clone(),
                image: image.clone(),
                audio: audio.clone(),
            });
        }

        let stray = images
            .keys()
            .chain(audio.keys())
            .filter(|n| !metadata.scenes.iter().any(|s| s.scene_number == **n))
            .count();
        if stray > 0 {
            warn!("Ignoring {} asset files with no matching scene", stray);
        }

        Ok(resolved)
    }

    async fn pick_music(&self, metadata: &Metadata) -> Result<Option<String>> {
        if !metadata.music {
            return Ok(None);
        }
        let full_script = metadata
            .scenes
            .iter()
            .map(|s| s.voiceover.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        match classify_music(self.llm.as_ref(), &metadata.title, &metadata.tone, &full_script).await? {
            Some(category) => {
                select_music(self.storage.as_ref(), &self.config.music_folder, category).await
            }
            None => Ok(None),
        }
    }

    async fn render_intro(&self, first_audio: &str, path: &str) -> Result<()> {
        let video = &self.config.video;
        let color = format!(
            "color=c=black:s={}x{}:r={}:d={}",
            video.width, video.height, video.fps, video.intro_seconds
        );
        let command = FfmpegCommand::new(path)
            .input_with(["-f", "lavfi"], color)
            .input(first_audio)
            .filter_complex("[1:a]volume=0,apad[a]")
            .map("0:v")
            .map("[a]")
            .duration(video.intro_seconds);
        self.runner.run_ffmpeg(&encoded(command, video)).await
    }

    /// Renders one scene clip and returns its duration.
    async fn render_scene(
        &self,
        index: usize,
        assets: &SceneAssets,
        build_dir: &str,
        path: &str,
    ) -> Result<f64> {
        let video = &self.config.video;
        let duration = self.runner.probe_duration(&assets.audio).await?;

        let caption = wrap_caption(caption_source(index, &assets.scene), caption_max_chars(video));
        let caption_file = join(build_dir, &format!("caption_{:02}.txt", assets.scene.scene_number));
        self.storage.write(&caption_file, caption.as_bytes()).await?;

        let command = FfmpegCommand::new(path)
            .input_with(["-loop", "1"], assets.image.clone())
            .input(assets.audio.clone())
            .filter_complex(scene_filter(video, &caption_file))
            .map("[v]")
            .map("1:a")
            .duration(duration);
        self.runner.run_ffmpeg(&encoded(command, video)).await?;

        info!(
            "Scene {} rendered ({:.2}s)",
            assets.scene.scene_number, duration
        );
        Ok(duration)
    }

    async fn concat(&self, segments: &[String], build_dir: &str, path: &str) -> Result<()> {
        // Entries are relative to the list file, which lives next to the segments.
        let list: String = segments
            .iter()
            .map(|s| {
                let name = Path::new(s)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| s.clone());
                format!("file '{}'\n", name.replace('\'', "'\\''"))
            })
            .collect();
        let list_path = join(build_dir, "concat.txt");
        self.storage.write(&list_path, list.as_bytes()).await?;

        let command = FfmpegCommand::new(path)
            .input_with(["-f", "concat", "-safe", "0"], list_path)
            .output_args(["-c", "copy"]);
        self.runner.run_ffmpeg(&command).await
    }

    async fn render_final(
        &self,
        merged: &str,
        music: Option<&str>,
        total: f64,
        output: &str,
    ) -> Result<()> {
        let video = &self.config.video;
        let command = match music {
            Some(track) => FfmpegCommand::new(output)
                .input(merged)
                .input_with(["-stream_loop", "-1"], track)
                .filter_complex(music_filter(video, total))
                .map("0:v")
                .map("[a]"),
            None => FfmpegCommand::new(output).input(merged),
        };
        self.runner.run_ffmpeg(&encoded(command, video)).await
    }

    /// Deletes intermediate files. Only paths below `build_folder` are touched.
    async fn remove_build_dir(&self, build_dir: &str) -> Result<()> {
        if !is_strictly_inside(&self.config.build_folder, build_dir) {
            warn!("Not removing {}: outside {}", build_dir, self.config.build_folder);
            return Ok(());
        }
        debug!("Removing {}", build_dir);
        self.storage.delete(build_dir).await
    }

    /// Builds the final video for a metadata record and returns its path.
    pub async fn assemble(&self, metadata: &Metadata) -> Result<String> {
        if !is_plain_component(&metadata.title) {
            bail!(
                "Metadata title {:?} is not usable as a folder name",
                metadata.title
            );
        }
        if metadata.scenes.is_empty() {
            bail!("Metadata for \"{}\" has no scenes to assemble", metadata.title);
        }
        let scenes = self.resolve_assets(metadata).await?;
        info!("Assembling {} scenes for \"{}\"", scenes.len(), metadata.title);

        let music = self.pick_music(metadata).await?;

        let build_dir = join(&self.config.build_folder, &metadata.title);
        tokio::fs::create_dir_all(&build_dir).await?;
        if let Some(parent) = Path::new(&metadata.output_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut segments = Vec::with_capacity(scenes.len() + 1);
        let intro = join(&build_dir, "intro.mp4");
        self.render_intro(&scenes[0].audio, &intro).await?;
        segments.push(intro);

        let mut total = self.config.video.intro_seconds;
        for (index, assets) in scenes.iter().enumerate() {
            let path = join(&build_dir, &scene_file_name(assets.scene.scene_number, "mp4"));
            total += self.render_scene(index, assets, &build_dir, &path).await?;
            segments.push(path);
        }

        let merged = join(&build_dir, "merged.mp4");
        self.concat(&segments, &build_dir, &merged).await?;

        self.render_final(&merged, music.as_deref(), total, &metadata.output_path)
            .await?;

        self.remove_build_dir(&build_dir).await?;

        info!("Video written to {} ({:.1}s)", metadata.output_path, total);
        Ok(metadata.output_path.clone())
    }
}
