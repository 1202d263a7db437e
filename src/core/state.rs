use serde::{Deserialize, Serialize};

/// One caption + narration unit of a script.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Scene {
    pub scene_number: u32,
    pub text_on_screen: String,
    pub voiceover: String,
}

/// Record bridging asset generation and video assembly. Written once per run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Metadata {
    /// Sanitized title used for folder and file names.
    pub title: String,
    /// Topic exactly as it appeared in the brief.
    #[serde(default)]
    pub video_title: String,
    pub tone: String,
    pub scenes: Vec<Scene>,
    pub music: bool,
    pub scene_count: usize,
    pub audio_folder: String,
    pub image_folder: String,
    pub output_path: String,
}
