use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;

/// Argument builder for a single ffmpeg invocation.
///
/// Inputs keep their own leading options (`-loop 1`, `-f lavfi`, ...) so the
/// final argument order is always `-y -v error <inputs..> <outputs..> <out>`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCommand {
    inputs: Vec<Vec<String>>,
    output_args: Vec<String>,
    output: String,
}

impl FfmpegCommand {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    /// Plain file input.
    pub fn input(self, path: impl Into<String>) -> Self {
        self.input_with(Vec::<String>::new(), path)
    }

    /// Input preceded by per-input options.
    pub fn input_with<I, S>(mut self, options: I, path: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args: Vec<String> = options.into_iter().map(Into::into).collect();
        args.push("-i".to_string());
        args.push(path.into());
        self.inputs.push(args);
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn filter_complex(self, graph: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(graph)
    }

    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn frame_rate(self, fps: u32) -> Self {
        self.output_arg("-r").output_arg(fps.to_string())
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];
        for input in &self.inputs {
            args.extend(input.iter().cloned());
        }
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.clone());
        args
    }
}

fn backslash_escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escapes a value (paths, colors) placed as a filter option inside a
/// `-filter_complex` graph.
///
/// ffmpeg unescapes twice: once while splitting the graph on `[ ] , ;` and
/// once while splitting filter options on `:`. The option layer is applied
/// first, then the graph layer on top of it.
pub fn escape_filter_value(value: &str) -> String {
    let option_level = backslash_escape(value, &['\\', '\'', ':']);
    backslash_escape(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

/// Executes media tools. Kept behind a trait so assembly can be exercised
/// without ffmpeg installed.
#[async_trait]
pub trait MediaRunner: Send + Sync {
    async fn run_ffmpeg(&self, command: &FfmpegCommand) -> Result<()>;
    /// Duration of a media file in seconds.
    async fn probe_duration(&self, path: &str) -> Result<f64>;
}

pub struct FfmpegRunner {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegRunner {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub fn parse_probe_duration(json: &[u8]) -> Result<f64> {
    let probe: ProbeOutput =
        serde_json::from_slice(json).context("Failed to parse ffprobe output")?;
    probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| *d > 0.0)
        .ok_or_else(|| anyhow!("ffprobe reported no duration"))
}

#[async_trait]
impl MediaRunner for FfmpegRunner {
    async fn run_ffmpeg(&self, command: &FfmpegCommand) -> Result<()> {
        let args = command.build_args();
        debug!("{} {}", self.ffmpeg, args.join(" "));

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to launch {}", self.ffmpeg))?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffmpeg failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }

    async fn probe_duration(&self, path: &str) -> Result<f64> {
        debug!("{} -show_format {}", self.ffprobe, path);

        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to launch {}", self.ffprobe))?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffprobe failed on {}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        parse_probe_duration(&output.stdout).with_context(|| format!("Probing {}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_orders_inputs_before_outputs() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input_with(["-loop", "1"], "scene_01.png")
            .input("scene_01.mp3")
            .map("[v]")
            .duration(2.5)
            .video_codec("libx264");

        assert_eq!(
            cmd.build_args(),
            vec![
                "-y", "-v", "error", "-loop", "1", "-i", "scene_01.png", "-i", "scene_01.mp3",
                "-map", "[v]", "-t", "2.500", "-c:v", "libx264", "out.mp4"
            ]
        );
    }

    /// One ffmpeg unescape pass. A bare quote is reported as `None` since it
    /// would open a quoted section.
    fn unescape_once(value: &str) -> Option<String> {
        let mut out = String::new();
        let mut chars = value.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => out.push(chars.next()?),
                '\'' => return None,
                _ => out.push(c),
            }
        }
        Some(out)
    }

    #[test]
    fn test_escape_filter_value_survives_both_unescape_passes() {
        for value in [
            "build/Don't Quit/caption_01.txt",
            "build/Eat, Sleep; Repeat [Part 2]/caption_01.txt",
            "C:\\fonts\\a'b.ttf",
        ] {
            let escaped = escape_filter_value(value);
            let graph_level = unescape_once(&escaped).unwrap();
            assert_eq!(unescape_once(&graph_level).as_deref(), Some(value));
        }
    }

    #[test]
    fn test_escape_filter_value_apostrophe_title() {
        assert_eq!(escape_filter_value("build/cap.txt"), "build/cap.txt");
        assert_eq!(
            escape_filter_value("build/Don't Quit/caption_01.txt"),
            r"build/Don\\\'t Quit/caption_01.txt"
        );
        assert_eq!(
            escape_filter_value("C:\\fonts\\a'b.ttf"),
            r"C\\:\\\\fonts\\\\a\\\'b.ttf"
        );
    }

    #[test]
    fn test_parse_probe_duration() {
        let json = br#"{"format": {"filename": "a.mp3", "duration": "4.231000"}}"#;
        assert!((parse_probe_duration(json).unwrap() - 4.231).abs() < 1e-9);

        assert!(parse_probe_duration(br#"{"format": {}}"#).is_err());
        assert!(parse_probe_duration(br#"{"format": {"duration": "N/A"}}"#).is_err());
        assert!(parse_probe_duration(b"not json").is_err());
    }
}
