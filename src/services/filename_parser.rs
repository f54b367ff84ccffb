//! Filename parser for fan-release style media names
//!
//! Parses filenames like:
//! - "Naruto Shippuden S01 - EP07 - 1080p [Dual Audio] @Channel.mkv"
//! - "Show.S01E07.1080p.WEB.h264-GROUP"
//! - "[Group] Title - 12 [720p]"
//!
//! Each field is resolved by an ordered cascade of pattern rules. The first
//! rule in a cascade that matches wins, so the later, more general rules (a
//! bare standalone number, a resolution suffix) only apply when none of the
//! specific markers (`S01E07`, `4kX264`, `HdRip`, ...) are present.

use std::fmt;

use regex::{Captures, Regex, RegexBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::file_utils::get_extension;

/// A cascade entry failed to compile. Raised at startup, never per request.
#[derive(Debug, Error)]
#[error("invalid {cascade} rule `{rule}` ({pattern}): {source}")]
pub struct CascadeError {
    pub cascade: &'static str,
    pub rule: &'static str,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

type Extractor<T> = Box<dyn Fn(&Captures<'_>) -> Option<T> + Send + Sync>;

struct Rule<T> {
    name: &'static str,
    pattern: Regex,
    extract: Extractor<T>,
}

/// Ordered list of pattern rules evaluated top to bottom, first match wins.
///
/// A rule "matches" when its pattern matches and its extractor yields a
/// value; a rule whose captures cannot be converted (e.g. an out-of-range
/// number, a year) falls through to the next one.
pub struct Cascade<T> {
    name: &'static str,
    rules: Vec<Rule<T>>,
}

impl<T> Cascade<T> {
    pub fn builder(name: &'static str) -> CascadeBuilder<T> {
        CascadeBuilder {
            name,
            specs: Vec::new(),
        }
    }

    /// Evaluate the cascade, returning the winning rule's name and value.
    /// Within one rule, later matches are tried when the extractor rejects an earlier one.
    pub fn evaluate(&self, input: &str) -> Option<(&'static str, T)> {
        self.rules.iter().find_map(|rule| {
            rule.pattern
                .captures_iter(input)
                .find_map(|caps| (rule.extract)(&caps))
                .map(|value| (rule.name, value))
        })
    }

    pub fn first_match(&self, input: &str) -> Option<T> {
        self.evaluate(input).map(|(_, value)| value)
    }

    /// Rule names in evaluation order
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Collects rule specs; patterns are only compiled (and validated) in [`build`](Self::build).
pub struct CascadeBuilder<T> {
    name: &'static str,
    specs: Vec<(&'static str, String, Extractor<T>)>,
}

impl<T> CascadeBuilder<T> {
    pub fn rule<F>(mut self, name: &'static str, pattern: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&Captures<'_>) -> Option<T> + Send + Sync + 'static,
    {
        self.specs.push((name, pattern.into(), Box::new(extract)));
        self
    }

    /// Rule that yields a fixed value whenever its pattern matches
    pub fn tag(self, name: &'static str, pattern: impl Into<String>, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.rule(name, pattern, move |_| Some(value.clone()))
    }

    /// Compile every pattern case-insensitively. Any invalid entry fails the whole cascade.
    pub fn build(self) -> Result<Cascade<T>, CascadeError> {
        let cascade = self.name;
        let rules = self
            .specs
            .into_iter()
            .map(|(name, pattern, extract)| {
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|compiled| Rule {
                        name,
                        pattern: compiled,
                        extract,
                    })
                    .map_err(|source| CascadeError {
                        cascade,
                        rule: name,
                        pattern,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Cascade {
            name: cascade,
            rules,
        })
    }
}

/// Closed quality vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Quality {
    P240,
    P360,
    P480,
    P540,
    P576,
    P720,
    P1080,
    P1440,
    P2160,
    FourK,
    TwoK,
    HdRip,
    FourKX264,
    FourKX265,
    /// Sentinel for "no rule matched"
    Unknown,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::P240 => "240p",
            Quality::P360 => "360p",
            Quality::P480 => "480p",
            Quality::P540 => "540p",
            Quality::P576 => "576p",
            Quality::P720 => "720p",
            Quality::P1080 => "1080p",
            Quality::P1440 => "1440p",
            Quality::P2160 => "2160p",
            Quality::FourK => "4k",
            Quality::TwoK => "2k",
            Quality::HdRip => "HdRip",
            Quality::FourKX264 => "4kX264",
            Quality::FourKX265 => "4kx265",
            Quality::Unknown => "Unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Quality::Unknown)
    }

    fn from_resolution(lines: &str) -> Option<Self> {
        match lines {
            "240" => Some(Quality::P240),
            "360" => Some(Quality::P360),
            "480" => Some(Quality::P480),
            "540" => Some(Quality::P540),
            "576" => Some(Quality::P576),
            "720" => Some(Quality::P720),
            "1080" => Some(Quality::P1080),
            "1440" => Some(Quality::P1440),
            "2160" => Some(Quality::P2160),
            _ => None,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Episode (and, when the matching rule carries one, season) number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EpisodeMarker {
    pub season: Option<u32>,
    pub episode: u32,
}

/// Fields inferred from a filename. Recomputed for every item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub quality: Quality,
    pub audio: Option<String>,
}

fn number(caps: &Captures<'_>, group: usize) -> Option<u32> {
    caps.get(group).and_then(|m| m.as_str().parse().ok())
}

fn season_and_episode(caps: &Captures<'_>) -> Option<EpisodeMarker> {
    Some(EpisodeMarker {
        season: Some(number(caps, 1)?),
        episode: number(caps, 2)?,
    })
}

fn episode_only(caps: &Captures<'_>) -> Option<EpisodeMarker> {
    Some(EpisodeMarker {
        season: None,
        episode: number(caps, 1)?,
    })
}

/// Four-digit years are titles or release dates, never episode numbers
fn non_year_episode(caps: &Captures<'_>) -> Option<EpisodeMarker> {
    let digits = caps.get(1)?.as_str();
    let is_year = digits.len() == 4 && (digits.starts_with("19") || digits.starts_with("20"));
    if is_year { None } else { episode_only(caps) }
}

/// Season/episode cascade, most specific first
pub fn episode_cascade() -> Result<Cascade<EpisodeMarker>, CascadeError> {
    Cascade::builder("episode")
        // S01E07, S01 E07, S01EP07
        .rule("season_episode", r"\bS(\d{1,4})\s*EP?\s*(\d{1,4})", season_and_episode)
        // S01 - EP07, S01.E07
        .rule(
            "season_dash_episode",
            r"\bS(\d{1,4})\s*[-–._]\s*EP?\s*(\d{1,4})",
            season_and_episode,
        )
        // 1x07
        .rule("cross", r"\b(\d{1,2})x(\d{2,3})\b", season_and_episode)
        // Season 1 Episode 7
        .rule(
            "verbose",
            r"\bSeason\s*(\d{1,4}).*?\bEpisode\s*(\d{1,4})",
            season_and_episode,
        )
        // E07, EP07, [EP 07], Episode 7
        .rule(
            "episode_marker",
            r"(?:^|[^a-z0-9])[(\[<{]?\s*(?:Episode|EP|E)\s*[.#]?\s*(\d{1,4})\s*[)\]>}]?",
            episode_only,
        )
        // Title - 07
        .rule("dash_number", r"(?:^|\s)-\s*(\d{1,4})\b", episode_only)
        // S2 anything 12
        .rule("season_loose", r"\bS(\d{1,4})\D*?(\d{1,4})\b", season_and_episode)
        // Any standalone number (not part of 1080p, x264, ...)
        .rule("bare_number", r"\b(\d{1,4})\b", non_year_episode)
        .build()
}

/// Quality cascade. Explicit tokens come before the generic resolution suffix.
pub fn quality_cascade() -> Result<Cascade<Quality>, CascadeError> {
    Cascade::builder("quality")
        .tag("4k_x264", r"\b4k[\s._-]*x264\b", Quality::FourKX264)
        .tag("4k_x265", r"\b4k[\s._-]*x265\b", Quality::FourKX265)
        .tag("4k", r"\b4k\b", Quality::FourK)
        .tag("2k", r"\b2k\b", Quality::TwoK)
        .tag("hdrip", r"\bHD[\s._-]?Rip\b", Quality::HdRip)
        .rule(
            "resolution",
            r"\b(240|360|480|540|576|720|1080|1440|2160)p\b",
            |caps| caps.get(1).and_then(|m| Quality::from_resolution(m.as_str())),
        )
        .build()
}

/// Audio/language cascade. Multi-track markers beat single languages,
/// which beat the generic dub/sub markers.
pub fn audio_cascade() -> Result<Cascade<String>, CascadeError> {
    let languages: [(&'static str, &'static str, &'static str); 16] = [
        ("hindi", r"\b(?:Hindi|Hin)\b", "Hindi"),
        ("tamil", r"\b(?:Tamil|Tam)\b", "Tamil"),
        ("telugu", r"\b(?:Telugu|Tel)\b", "Telugu"),
        ("malayalam", r"\b(?:Malayalam|Mal)\b", "Malayalam"),
        ("kannada", r"\b(?:Kannada|Kan)\b", "Kannada"),
        ("bengali", r"\b(?:Bengali|Bangla)\b", "Bengali"),
        ("english", r"\b(?:English|Eng)\b", "English"),
        ("japanese", r"\b(?:Japanese|Jap|Jpn)\b", "Japanese"),
        ("korean", r"\b(?:Korean|Kor)\b", "Korean"),
        ("chinese", r"\b(?:Chinese|Mandarin|Chi)\b", "Chinese"),
        ("spanish", r"\b(?:Spanish|Spa|Latino)\b", "Spanish"),
        ("french", r"\b(?:French|Fre|VFF)\b", "French"),
        ("german", r"\b(?:German|Ger)\b", "German"),
        ("italian", r"\b(?:Italian|Ita)\b", "Italian"),
        ("russian", r"\b(?:Russian|Rus)\b", "Russian"),
        ("portuguese", r"\b(?:Portuguese|Por)\b", "Portuguese"),
    ];

    let mut builder = Cascade::builder("audio")
        .tag("multi_audio", r"\bMulti[\s._-]?Audio\b", "Multi Audio".to_string())
        .tag(
            "triple_audio",
            r"\b(?:Tri|Triple)[\s._-]?Audio\b",
            "Triple Audio".to_string(),
        )
        .tag("dual_audio", r"\bDual[\s._-]?Audio\b", "Dual Audio".to_string());

    for (name, pattern, label) in languages {
        builder = builder.tag(name, pattern, label.to_string());
    }

    builder
        .tag("dubbed", r"\bDub(?:bed)?\b", "Dubbed".to_string())
        .tag("subbed", r"\b(?:Sub(?:bed|s)?|ESubs?)\b", "Subbed".to_string())
        .build()
}

/// The three compiled cascades. Build once at startup and share.
pub struct FilenameParser {
    episode: Cascade<EpisodeMarker>,
    quality: Cascade<Quality>,
    audio: Cascade<String>,
}

impl FilenameParser {
    /// Compile all cascades. An invalid entry is a fatal configuration error.
    pub fn new() -> Result<Self, CascadeError> {
        Ok(Self {
            episode: episode_cascade()?,
            quality: quality_cascade()?,
            audio: audio_cascade()?,
        })
    }

    pub fn extract(&self, filename: &str) -> ExtractionResult {
        let stem = strip_extension(filename);
        let marker = self.extract_episode(stem);
        let result = ExtractionResult {
            season: marker.and_then(|m| m.season),
            episode: marker.map(|m| m.episode),
            quality: self.extract_quality(stem),
            audio: self.extract_audio(stem),
        };

        debug!(
            filename = filename,
            season = ?result.season,
            episode = ?result.episode,
            quality = %result.quality,
            audio = ?result.audio,
            "Parsed filename"
        );

        result
    }

    pub fn extract_episode(&self, filename: &str) -> Option<EpisodeMarker> {
        self.episode.first_match(&normalize(filename))
    }

    /// Never empty: falls back to [`Quality::Unknown`]
    pub fn extract_quality(&self, filename: &str) -> Quality {
        self.quality
            .first_match(&normalize(filename))
            .unwrap_or(Quality::Unknown)
    }

    pub fn extract_audio(&self, filename: &str) -> Option<String> {
        self.audio.first_match(&normalize(filename))
    }

    pub fn episode_rules(&self) -> &Cascade<EpisodeMarker> {
        &self.episode
    }

    pub fn quality_rules(&self) -> &Cascade<Quality> {
        &self.quality
    }

    pub fn audio_rules(&self) -> &Cascade<String> {
        &self.audio
    }
}

/// `_` is a regex word character, so "Show_S01E07_1080p" would hide every
/// token from the `\b` anchors. Treat it as a space.
fn normalize(filename: &str) -> String {
    filename.replace('_', " ")
}

fn strip_extension(filename: &str) -> &str {
    match get_extension(filename) {
        Some(ext) => &filename[..filename.len() - ext.len()],
        None => filename,
    }
}
