use regex::Regex;
use std::sync::LazyLock;

use crate::core::state::Scene;
use crate::services::brief::Brief;

pub const SCRIPT_SYSTEM_PROMPT: &str = "You are a scriptwriter for YouTube Shorts.";

static SCENE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\[TEXT ON SCREEN:\s*"(.*?)"\]\s*\[Voiceover\]"#).expect("valid regex")
});

// Narration runs until the next caption marker, an outro marker, or end of text.
static NARRATION_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[TEXT ON SCREEN:|\[OUTRO:").expect("valid regex"));

/// Extracts scenes from a script of repeating
/// `[TEXT ON SCREEN: "<caption>"] [Voiceover] <narration>` blocks.
///
/// Scenes are numbered from 1 in source order. Text that contains no such
/// block yields an empty list rather than an error.
pub fn parse_script(script_text: &str) -> Vec<Scene> {
    let mut scenes = Vec::new();
    let mut pos = 0;

    while let Some(caps) = SCENE_HEADER.captures_at(script_text, pos) {
        let (Some(header), Some(caption)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let body_start = header.end();
        let body_end = NARRATION_END
            .find_at(script_text, body_start)
            .map_or(script_text.len(), |m| m.start());

        scenes.push(Scene {
            scene_number: scenes.len() as u32 + 1,
            text_on_screen: caption.as_str().trim().to_string(),
            voiceover: script_text[body_start..body_end].trim().to_string(),
        });

        pos = body_end;
    }

    scenes
}

pub fn build_script_prompt(title: &str, brief: &Brief) -> String {
    format!(
        r#"You are an expert YouTube Shorts scriptwriter.

Write a script for a short video that lasts **exactly 60 seconds or close (no less than 50s)**.

- Topic: {}
- Tone: {}
- Audience: {}
- Voiceover?: {}
- Style: {}

Use this structure:

[INTRO: Brief sound or visual cue]

[TEXT ON SCREEN:]
[Voiceover] Strong hook to grab attention (1 sentence, ~8-12 words)

Then write 5-7 scenes like this:

[TEXT ON SCREEN: "1. TIP TITLE"]
[Voiceover] Give a punchy but **slightly longer explanation or insight** (2-3 sentences, around 30 words max)

Finally:

[TEXT ON SCREEN: "CLOSING MESSAGE"]
[Voiceover] Wrap up with a motivating, surprising, or reflective message (1-2 sentences, ~20 words)

The entire voiceover should **add up to 120-140 words**, enough to fill 55-60 seconds.

Only return the formatted script. No extra commentary."#,
        title, brief.tone, brief.audience, brief.voiceover, brief.style
    )
}

fn is_bookend(caption: &str) -> bool {
    let upper = caption.to_uppercase();
    ["CLOSING", "OUTRO", "INTRO"]
        .iter()
        .any(|marker| upper.contains(marker))
}

/// Text spoken for a scene: the caption is read out before the narration,
/// except for intro/outro/closing scenes which speak the narration alone.
pub fn narration_text(scene: &Scene) -> String {
    if is_bookend(&scene.text_on_screen) {
        scene.voiceover.clone()
    } else {
        format!("{}: {}", scene.text_on_screen, scene.voiceover)
    }
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```") {
        let body = s.trim_start_matches("```");
        // drop an optional language tag on the opening fence
        let body = match body.split_once('\n') {
            Some((tag, rest)) if !tag.contains('[') => rest,
            _ => body,
        };
        body.trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"[INTRO: Upbeat alarm sound]

[TEXT ON SCREEN:]
[Voiceover] Want mornings that actually work for you?

[TEXT ON SCREEN: "1. HYDRATE FIRST"]
[Voiceover] Drink a glass of water before coffee. Your body just went eight hours without it.

[TEXT ON SCREEN: "2. MOVE, DON'T SCROLL!"]
[Voiceover] Five minutes of stretching beats fifty minutes of feeds.
Your brain wakes up faster when your body does.

[TEXT ON SCREEN: "CLOSING MESSAGE"]
[Voiceover] Small habits, stacked daily, change everything.

[OUTRO: Logo sting]"#;

    #[test]
    fn test_parses_scenes_in_order() {
        let scenes = parse_script(SCRIPT);
        assert_eq!(scenes.len(), 3);
        let numbers: Vec<u32> = scenes.iter().map(|s| s.scene_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(scenes[0].text_on_screen, "1. HYDRATE FIRST");
        assert_eq!(
            scenes[0].voiceover,
            "Drink a glass of water before coffee. Your body just went eight hours without it."
        );
        assert_eq!(scenes[2].text_on_screen, "CLOSING MESSAGE");
    }

    #[test]
    fn test_caption_kept_verbatim_with_punctuation() {
        let scenes = parse_script(SCRIPT);
        assert_eq!(scenes[1].text_on_screen, "2. MOVE, DON'T SCROLL!");
    }

    #[test]
    fn test_multiline_narration_is_captured_in_full() {
        let scenes = parse_script(SCRIPT);
        assert_eq!(
            scenes[1].voiceover,
            "Five minutes of stretching beats fifty minutes of feeds.\nYour brain wakes up faster when your body does."
        );
    }

    #[test]
    fn test_narration_stops_at_outro_marker() {
        let scenes = parse_script(SCRIPT);
        assert_eq!(
            scenes[2].voiceover,
            "Small habits, stacked daily, change everything."
        );
    }

    #[test]
    fn test_narration_runs_to_end_of_text() {
        let scenes = parse_script("[TEXT ON SCREEN: \"ONLY\"] [Voiceover]   last words  \n");
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].voiceover, "last words");
    }

    #[test]
    fn test_caption_whitespace_is_trimmed() {
        let scenes = parse_script("[TEXT ON SCREEN: \"  1. TIP  \"]\n[Voiceover] Do it.");
        assert_eq!(scenes[0].text_on_screen, "1. TIP");
    }

    #[test]
    fn test_unmatched_script_yields_no_scenes() {
        assert!(parse_script("").is_empty());
        assert!(parse_script("Here is your script: wake up early and drink water.").is_empty());
        assert!(parse_script("[TEXT ON SCREEN: 1. NO QUOTES]\n[Voiceover] text").is_empty());
    }

    #[test]
    fn test_narration_text_rules() {
        let tip = Scene {
            scene_number: 1,
            text_on_screen: "1. HYDRATE".to_string(),
            voiceover: "Drink water.".to_string(),
        };
        assert_eq!(narration_text(&tip), "1. HYDRATE: Drink water.");

        let closing = Scene {
            scene_number: 5,
            text_on_screen: "Closing message".to_string(),
            voiceover: "Go build it.".to_string(),
        };
        assert_eq!(narration_text(&closing), "Go build it.");
    }

    #[test]
    fn test_prompt_embeds_brief_fields() {
        let brief = Brief {
            topic: "5 Morning Habits".to_string(),
            tone: "energetic".to_string(),
            audience: "young adults".to_string(),
            voiceover: "yes".to_string(),
            style: "punchy".to_string(),
            background_music: "yes".to_string(),
        };
        let prompt = build_script_prompt("5 Morning Habits", &brief);
        assert!(prompt.contains("- Topic: 5 Morning Habits"));
        assert!(prompt.contains("- Tone: energetic"));
        assert!(prompt.contains("- Audience: young adults"));
        assert!(prompt.contains("- Style: punchy"));
        assert!(prompt.contains("120-140 words"));
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("plain"), "plain");
        assert_eq!(strip_code_blocks("```\n[TEXT ON SCREEN: \"A\"]\n```"), "[TEXT ON SCREEN: \"A\"]");
        assert_eq!(strip_code_blocks("```text\nbody\n```"), "body");
    }
}
