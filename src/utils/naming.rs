use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::LazyLock;

static ILLEGAL_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("valid regex"));

static NUMERIC_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

pub const UNTITLED: &str = "untitled";

/// Strips characters that are illegal in file names on common platforms.
///
/// The result is always a single plain path component: a title that is empty
/// or made only of dots once cleaned becomes [`UNTITLED`].
pub fn sanitize_title(title: &str) -> String {
    let cleaned = ILLEGAL_FILENAME_CHARS.replace_all(title, "");
    let cleaned = cleaned.trim();
    if cleaned.chars().all(|c| c == '.') {
        UNTITLED.to_string()
    } else {
        cleaned.to_string()
    }
}

/// True when `name` is exactly one normal path component (no `.`, `..`,
/// separators or root).
pub fn is_plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// True when `path` lies strictly below `base`, reached only through normal
/// components.
pub fn is_strictly_inside(base: &str, path: &str) -> bool {
    match Path::new(path).strip_prefix(base) {
        Ok(rest) => {
            let mut components = rest.components().peekable();
            components.peek().is_some()
                && components.all(|c| matches!(c, Component::Normal(_)))
        }
        Err(_) => false,
    }
}

/// `scene_03.mp3` style name for a scene asset.
pub fn scene_file_name(scene_number: u32, extension: &str) -> String {
    format!("scene_{:02}.{}", scene_number, extension)
}

/// First run of digits in the file name, if any.
pub fn extract_number(file_name: &str) -> Option<u32> {
    NUMERIC_TOKEN
        .find(file_name)
        .and_then(|m| m.as_str().parse().ok())
}

/// Maps scene number to path for every entry with the given extension.
///
/// Two files resolving to the same scene number is an error: the pairing
/// between audio, image and scene would be ambiguous.
pub fn index_by_scene_number(entries: &[String], extension: &str) -> Result<BTreeMap<u32, String>> {
    let mut index = BTreeMap::new();
    for entry in entries {
        let path = Path::new(entry);
        if path.extension().is_none_or(|ext| ext != extension) {
            continue;
        }
        let Some(file_name) = path.file_name().map(|f| f.to_string_lossy()) else {
            continue;
        };
        let Some(number) = extract_number(&file_name) else {
            continue;
        };
        if let Some(previous) = index.insert(number, entry.clone()) {
            return Err(anyhow!(
                "Scene {} has more than one .{} asset: {} and {}",
                number,
                extension,
                previous,
                entry
            ));
        }
    }
    Ok(index)
}
