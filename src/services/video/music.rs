use anyhow::Result;
use log::{info, warn};
use rand::seq::IndexedRandom;
use std::fmt;
use std::path::Path;

use crate::core::config::join;
use crate::core::io::Storage;
use crate::services::llm::LlmClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicCategory {
    Motivational,
    Calm,
    Educational,
    Dramatic,
    Inspirational,
    Mysterious,
}

impl MusicCategory {
    pub const ALL: [MusicCategory; 6] = [
        MusicCategory::Motivational,
        MusicCategory::Calm,
        MusicCategory::Educational,
        MusicCategory::Dramatic,
        MusicCategory::Inspirational,
        MusicCategory::Mysterious,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MusicCategory::Motivational => "motivational",
            MusicCategory::Calm => "calm",
            MusicCategory::Educational => "educational",
            MusicCategory::Dramatic => "dramatic",
            MusicCategory::Inspirational => "inspirational",
            MusicCategory::Mysterious => "mysterious",
        }
    }

    /// Reads a category out of a free-form model answer such as
    /// `"- Motivational."`. The earliest mentioned category wins.
    pub fn from_answer(answer: &str) -> Option<Self> {
        let answer = answer.to_lowercase();
        Self::ALL
            .iter()
            .filter_map(|c| answer.find(c.as_str()).map(|pos| (pos, *c)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, c)| c)
    }
}

impl fmt::Display for MusicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn build_music_prompt(title: &str, tone: &str, full_script: &str) -> String {
    let categories: Vec<String> = MusicCategory::ALL
        .iter()
        .map(|c| format!("- {}", c))
        .collect();
    format!(
        r#"You're helping assign background music for a short video.

Title: {}
Tone: {}

Script:
{}

Pick the best background music category that enhances the viewer's emotional experience.

Return only one category from:
{}"#,
        title,
        tone,
        full_script,
        categories.join("\n")
    )
}

/// Asks the model for a mood. An answer naming no known category yields `None`.
pub async fn classify_music(
    llm: &dyn LlmClient,
    title: &str,
    tone: &str,
    full_script: &str,
) -> Result<Option<MusicCategory>> {
    let answer = llm
        .chat("", &build_music_prompt(title, tone, full_script))
        .await?;
    let category = MusicCategory::from_answer(&answer);
    match category {
        Some(c) => info!("{} category chosen", c),
        None => warn!("Unrecognised music category: {:?}", answer.trim()),
    }
    Ok(category)
}

/// Picks a random `.mp3` from `<music_folder>/<category>`. An empty or
/// missing directory means no music.
pub async fn select_music(
    storage: &dyn Storage,
    music_folder: &str,
    category: MusicCategory,
) -> Result<Option<String>> {
    let dir = join(music_folder, category.as_str());
    let mut tracks: Vec<String> = storage
        .list(&dir)
        .await?
        .into_iter()
        .filter(|p| {
            Path::new(p)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"))
        })
        .collect();
    tracks.sort();

    let choice = tracks.choose(&mut rand::rng()).cloned();
    match &choice {
        Some(track) => info!("Background music: {}", track),
        None => warn!("No .mp3 tracks found in {}", dir),
    }
    Ok(choice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct FixedAnswer(&'static str);

    #[async_trait]
    impl LlmClient for FixedAnswer {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_category_from_answer() {
        assert_eq!(
            MusicCategory::from_answer("Motivational"),
            Some(MusicCategory::Motivational)
        );
        assert_eq!(
            MusicCategory::from_answer("- calm."),
            Some(MusicCategory::Calm)
        );
        assert_eq!(
            MusicCategory::from_answer("I'd go with dramatic, maybe mysterious"),
            Some(MusicCategory::Dramatic)
        );
        assert_eq!(MusicCategory::from_answer("lo-fi hip hop"), None);
    }

    #[test]
    fn test_music_prompt_lists_every_category() {
        let prompt = build_music_prompt("Habits", "energetic", "Drink water.");
        for c in MusicCategory::ALL {
            assert!(prompt.contains(&format!("- {}", c)));
        }
        assert!(prompt.contains("Tone: energetic"));
    }

    #[tokio::test]
    async fn test_classify_music_unknown_answer_is_none() -> Result<()> {
        let category = classify_music(&FixedAnswer("jazz"), "t", "calm", "s").await?;
        assert_eq!(category, None);
        let category = classify_music(&FixedAnswer(" Inspirational\n"), "t", "calm", "s").await?;
        assert_eq!(category, Some(MusicCategory::Inspirational));
        Ok(())
    }

    #[tokio::test]
    async fn test_select_music_only_picks_mp3() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let calm = dir.path().join("calm");
        std::fs::create_dir_all(&calm)?;
        std::fs::write(calm.join("notes.txt"), b"x")?;
        std::fs::write(calm.join("cover.wav"), b"x")?;
        std::fs::write(calm.join("rain.mp3"), b"x")?;

        let storage = NativeStorage::new();
        let music_folder = dir.path().to_str().unwrap();

        let track = select_music(&storage, music_folder, MusicCategory::Calm).await?;
        assert!(track.unwrap().ends_with("rain.mp3"));

        let none = select_music(&storage, music_folder, MusicCategory::Dramatic).await?;
        assert!(none.is_none());
        Ok(())
    }
}
