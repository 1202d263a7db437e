use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::io::Storage;

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets/";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BriefConfig {
    #[serde(default = "default_source")]
    pub source: String, // "sheets" or "file"
    #[serde(default)]
    pub spreadsheet_id: String,
    #[serde(default = "default_range")]
    pub range: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_headers")]
    pub headers: Vec<String>,
    /// YAML or JSON mapping of header to value, used when `source` is "file".
    #[serde(default = "default_brief_path")]
    pub path: String,
}

impl Default for BriefConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            spreadsheet_id: String::new(),
            range: default_range(),
            api_key: String::new(),
            headers: default_headers(),
            path: default_brief_path(),
        }
    }
}

fn default_source() -> String {
    "sheets".to_string()
}
fn default_range() -> String {
    "Prompts!A2:F2".to_string()
}
fn default_headers() -> Vec<String> {
    ["Topic", "Tone", "Audience", "Voiceover?", "Style", "Background_music"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_brief_path() -> String {
    "brief.yml".to_string()
}

/// Content parameters driving one run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Brief {
    pub topic: String,
    pub tone: String,
    pub audience: String,
    pub voiceover: String,
    pub style: String,
    pub background_music: String,
}

impl Brief {
    /// Builds a brief from header/value pairs. Header names are normalized, so
    /// `Voiceover?` and `voiceover` address the same field.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let normalized: HashMap<String, &str> = fields
            .iter()
            .map(|(k, v)| (normalize_header(k), v.trim()))
            .collect();
        let get = |key: &str, default: &str| {
            normalized
                .get(key)
                .map(|v| v.to_string())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            topic: get("topic", ""),
            tone: get("tone", "neutral"),
            audience: get("audience", ""),
            voiceover: get("voiceover", ""),
            style: get("style", ""),
            background_music: get("background_music", "yes"),
        }
    }

    pub fn from_row(headers: &[String], row: &[String]) -> Self {
        let fields = headers
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect::<HashMap<_, _>>();
        Self::from_fields(&fields)
    }

    pub fn wants_music(&self) -> bool {
        self.background_music.trim().eq_ignore_ascii_case("yes")
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .trim_end_matches('?')
        .trim()
        .replace(' ', "_")
}

#[async_trait]
pub trait BriefSource: Send + Sync {
    async fn read_brief(&self) -> Result<Brief>;
}

pub fn create_brief_source(
    config: &BriefConfig,
    storage: Arc<dyn Storage>,
) -> Result<Box<dyn BriefSource>> {
    match config.source.as_str() {
        "sheets" => Ok(Box::new(SheetsBriefSource::new(config.clone()))),
        "file" => Ok(Box::new(FileBriefSource::new(&config.path, storage))),
        _ => Err(anyhow!("Unknown brief source: {}", config.source)),
    }
}

// --- Google Sheets ---

pub struct SheetsBriefSource {
    config: BriefConfig,
    client: reqwest::Client,
}

impl SheetsBriefSource {
    pub fn new(config: BriefConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn values_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(SHEETS_BASE_URL)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Sheets base URL cannot be a base"))?
            .pop_if_empty()
            .push(&self.config.spreadsheet_id)
            .push("values")
            .push(&self.config.range);
        url.query_pairs_mut().append_pair("key", &self.config.api_key);
        Ok(url)
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

fn first_row(range: ValueRange) -> Result<Vec<String>> {
    range
        .values
        .into_iter()
        .next()
        .filter(|row| !row.is_empty())
        .ok_or_else(|| anyhow!("No data found in the specified range."))
}

#[async_trait]
impl BriefSource for SheetsBriefSource {
    async fn read_brief(&self) -> Result<Brief> {
        if self.config.spreadsheet_id.is_empty() {
            return Err(anyhow!("brief.spreadsheet_id is not configured"));
        }
        let url = self.values_url()?;
        info!("Reading brief from spreadsheet range {}", self.config.range);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach Sheets API")?;
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Sheets API error: {}", error_text));
        }

        let range: ValueRange = resp.json().await?;
        let row = first_row(range)?;
        Ok(Brief::from_row(&self.config.headers, &row))
    }
}

// --- Local file ---

pub struct FileBriefSource {
    path: String,
    storage: Arc<dyn Storage>,
}

impl FileBriefSource {
    pub fn new(path: &str, storage: Arc<dyn Storage>) -> Self {
        Self {
            path: path.to_string(),
            storage,
        }
    }
}

#[async_trait]
impl BriefSource for FileBriefSource {
    async fn read_brief(&self) -> Result<Brief> {
        let content = self.storage.read_to_string(&self.path).await?;
        let fields: HashMap<String, String> = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse brief file {}", self.path))?;
        if fields.is_empty() {
            return Err(anyhow!("No data found in brief file {}", self.path));
        }
        Ok(Brief::from_fields(&fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_row_maps_default_headers() {
        let brief = Brief::from_row(
            &default_headers(),
            &row(&["5 Morning Habits", "energetic", "young adults", "yes", "punchy", "yes"]),
        );
        assert_eq!(brief.topic, "5 Morning Habits");
        assert_eq!(brief.tone, "energetic");
        assert_eq!(brief.audience, "young adults");
        assert_eq!(brief.voiceover, "yes");
        assert_eq!(brief.style, "punchy");
        assert!(brief.wants_music());
    }

    #[test]
    fn test_short_row_falls_back_to_defaults() {
        let brief = Brief::from_row(&default_headers(), &row(&["Sleep Better"]));
        assert_eq!(brief.tone, "neutral");
        assert_eq!(brief.background_music, "yes");
        assert_eq!(brief.style, "");
    }

    #[test]
    fn test_music_flag_is_case_insensitive() {
        let mut brief = Brief::from_row(&default_headers(), &row(&["T"]));
        brief.background_music = "No".to_string();
        assert!(!brief.wants_music());
        brief.background_music = " YES ".to_string();
        assert!(brief.wants_music());
    }

    #[test]
    fn test_empty_sheet_is_an_error() {
        let range: ValueRange = serde_json::from_str(r#"{"range": "Prompts!A2:F2"}"#).unwrap();
        assert!(first_row(range).is_err());

        let range: ValueRange = serde_json::from_str(r#"{"values": [[]]}"#).unwrap();
        assert!(first_row(range).is_err());
    }

    #[test]
    fn test_values_url_encodes_range() {
        let source = SheetsBriefSource::new(BriefConfig {
            spreadsheet_id: "abc123".to_string(),
            api_key: "k".to_string(),
            ..Default::default()
        });
        let url = source.values_url().unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/Prompts!A2:F2?key=k"
        );
    }

    #[tokio::test]
    async fn test_file_brief_source() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("brief.yml");
        std::fs::write(
            &path,
            "Topic: 5 Morning Habits\nTone: energetic\nVoiceover?: yes\nBackground_music: no\n",
        )?;

        let source = FileBriefSource::new(path.to_str().unwrap(), Arc::new(NativeStorage::new()));
        let brief = source.read_brief().await?;
        assert_eq!(brief.topic, "5 Morning Habits");
        assert_eq!(brief.voiceover, "yes");
        assert!(!brief.wants_music());
        Ok(())
    }
}
