//! Rename template rendering
//!
//! Supported placeholders (case-insensitive):
//! - `{season}` / `Season` - season number, zero-padded to 2 digits
//! - `{episode}` / `Episode` - episode number, zero-padded to 2 digits
//! - `{quality}` / `Quality` - quality tag
//! - `{audio}` / `Audio` - audio/language tag
//!
//! The bare-word spellings are legacy aliases and only match whole words.
//! Missing numbers render as [`MISSING_NUMBER`], a missing audio tag as
//! [`MISSING_AUDIO`]. Anything else in the template is copied verbatim.
//!
//! Example template: `{season}x{episode} [{quality}]` -> `01x07 [1080p]`

use regex::{Captures, Regex};

use super::file_utils::{format_bytes, format_duration, get_extension, sanitize_for_filename};
use super::filename_parser::ExtractionResult;
use super::transport::MediaKind;

/// Rendered in place of a season or episode number that could not be determined
pub const MISSING_NUMBER: &str = "XX";

/// Rendered in place of an undeclared audio tag
pub const MISSING_AUDIO: &str = "Unknown";

const PLACEHOLDER_PATTERN: &str =
    r"(?i)\{(season|episode|quality|audio)\}|\b(season|episode|quality|audio)\b";

const CAPTION_PATTERN: &str = r"\{(filename|filesize|duration)\}";

/// Values available to a caption template
#[derive(Debug, Clone)]
pub struct CaptionContext<'a> {
    pub file_name: &'a str,
    pub size_bytes: u64,
    pub duration_secs: Option<u64>,
}

/// Substitutes extracted fields into user templates
pub struct TemplateRenderer {
    placeholder: Regex,
    caption_placeholder: Regex,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            placeholder: Regex::new(PLACEHOLDER_PATTERN)?,
            caption_placeholder: Regex::new(CAPTION_PATTERN)?,
        })
    }

    /// Render a rename template.
    ///
    /// Substitution is a single pass over the template, so values that happen
    /// to contain a placeholder word (e.g. the audio tag "Dual Audio") are
    /// never substituted again.
    pub fn render(&self, template: &str, fields: &ExtractionResult) -> String {
        self.placeholder
            .replace_all(template, |caps: &Captures<'_>| {
                let token = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str().to_ascii_lowercase())
                    .unwrap_or_default();
                match token.as_str() {
                    "season" => format_number(fields.season),
                    "episode" => format_number(fields.episode),
                    "quality" => fields.quality.as_str().to_string(),
                    "audio" => fields
                        .audio
                        .clone()
                        .unwrap_or_else(|| MISSING_AUDIO.to_string()),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Caption for the delivered artifact; `**<file name>**` when no template is set
    pub fn render_caption(&self, template: Option<&str>, ctx: &CaptionContext<'_>) -> String {
        let Some(template) = template else {
            return format!("**{}**", ctx.file_name);
        };

        self.caption_placeholder
            .replace_all(template, |caps: &Captures<'_>| match &caps[1] {
                "filename" => ctx.file_name.to_string(),
                "filesize" => format_bytes(ctx.size_bytes),
                "duration" => format_duration(ctx.duration_secs.unwrap_or(0)),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

fn format_number(value: Option<u32>) -> String {
    value
        .map(|n| format!("{:02}", n))
        .unwrap_or_else(|| MISSING_NUMBER.to_string())
}

/// Final artifact name: sanitized rendered base plus the source extension,
/// or the media kind's default extension when the source has none.
pub fn target_file_name(rendered: &str, source_filename: &str, kind: MediaKind) -> String {
    let extension = get_extension(source_filename)
        .unwrap_or_else(|| kind.default_extension().to_string());
    format!("{}{}", sanitize_for_filename(rendered.trim()), extension)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::services::filename_parser::Quality;

    fn renderer() -> TemplateRenderer {
        TemplateRenderer::new().expect("placeholder patterns compile")
    }

    fn fields(season: Option<u32>, episode: Option<u32>, audio: Option<&str>) -> ExtractionResult {
        ExtractionResult {
            season,
            episode,
            quality: Quality::P1080,
            audio: audio.map(str::to_string),
        }
    }

    #[test]
    fn test_render_braced_placeholders() {
        let result = renderer().render(
            "{season}x{episode} [{quality}]",
            &fields(Some(1), Some(7), None),
        );
        assert_eq!(result, "01x07 [1080p]");
    }

    #[test]
    fn test_render_missing_fields_use_sentinels() {
        let result = renderer().render(
            "S{season}E{episode} {audio}",
            &fields(None, Some(7), None),
        );
        assert_eq!(result, "SXXE07 Unknown");
    }

    #[test]
    fn test_render_is_case_insensitive_and_supports_bare_words() {
        let result = renderer().render(
            "Naruto {SEASON} - Episode [Quality] audio",
            &fields(Some(2), Some(13), Some("Hindi")),
        );
        assert_eq!(result, "Naruto 02 - 13 [1080p] Hindi");
    }

    #[test]
    fn test_render_substituted_values_are_not_rescanned() {
        let result = renderer().render("{audio} - {episode}", &fields(None, Some(1), Some("Dual Audio")));
        assert_eq!(result, "Dual Audio - 01");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders_verbatim() {
        let result = renderer().render(
            "{show} {seasons} Episodes {episode}",
            &fields(Some(1), Some(2), None),
        );
        assert_eq!(result, "{show} {seasons} Episodes 02");
    }

    #[test]
    fn test_render_is_idempotent() {
        let renderer = renderer();
        let fields = fields(Some(3), Some(11), Some("English"));
        let template = "[{quality}] Show S{season}E{episode} {audio}";
        assert_eq!(renderer.render(template, &fields), renderer.render(template, &fields));
    }

    #[test]
    fn test_target_file_name() {
        assert_eq!(
            target_file_name("01x07 [1080p]", "Naruto S01 - EP07.mkv", MediaKind::Document),
            "01x07 [1080p].mkv"
        );
        assert_eq!(
            target_file_name("01x07", "Show S01E07 1080p", MediaKind::Video),
            "01x07.mp4"
        );
        assert_eq!(
            target_file_name("Track 01", "Track 01", MediaKind::Audio),
            "Track 01.mp3"
        );
        assert_eq!(
            target_file_name("01x07 [1080p]", "Show.S01E07.1080p.WEB.x264", MediaKind::Video),
            "01x07 [1080p].mp4"
        );
    }

    #[test]
    fn test_render_caption() {
        let renderer = renderer();
        let ctx = CaptionContext {
            file_name: "01x07 [1080p].mkv",
            size_bytes: 2048,
            duration_secs: None,
        };
        assert_eq!(renderer.render_caption(None, &ctx), "**01x07 [1080p].mkv**");
        assert_eq!(
            renderer.render_caption(Some("{filename} | {filesize} | {duration} | {other}"), &ctx),
            "01x07 [1080p].mkv | 2.0 KB | 00:00:00 | {other}"
        );
    }
}
