//! Shared file utility functions
//!
//! Extension handling, sanitization and human-readable formatting used when
//! building target names and captions.

use std::path::Path;

/// Video container extensions (lowercase)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".ts", ".m2ts", ".mpg",
    ".mpeg", ".3gp", ".ogv",
];

/// Audio file extensions (lowercase)
pub const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".flac", ".m4a", ".m4b", ".aac", ".ogg", ".opus", ".wav", ".wma", ".aiff", ".alac",
];

/// Other files that travel as documents (lowercase)
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    ".srt", ".ass", ".ssa", ".vtt", ".zip", ".rar", ".7z", ".pdf", ".epub",
];

/// Get the extension of a filename including the leading dot
///
/// Only known media and document extensions count. Scene-style names use
/// dots as separators, so "Show.S01E07.1080p.WEB.x264" has no extension.
///
/// # Example
/// ```
/// use autorename::services::file_utils::get_extension;
/// assert_eq!(get_extension("Show S01E01.mkv"), Some(".mkv".to_string()));
/// assert_eq!(get_extension("no_extension"), None);
/// ```
pub fn get_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .filter(|ext| is_known_extension(ext))
}

fn is_known_extension(ext: &str) -> bool {
    let lower = ext.to_ascii_lowercase();
    [VIDEO_EXTENSIONS, AUDIO_EXTENSIONS, DOCUMENT_EXTENSIONS]
        .iter()
        .any(|list| list.contains(&lower.as_str()))
}

/// Sanitize a string for use as a filename
///
/// Uses the `sanitize_filename` crate which handles:
/// - Invalid characters for the current OS
/// - Reserved filenames (CON, PRN, etc. on Windows)
/// - Leading/trailing spaces and dots
pub fn sanitize_for_filename(name: &str) -> String {
    sanitize_filename::sanitize(name)
}

/// Format bytes into a human-readable string
///
/// # Example
/// ```
/// use autorename::services::file_utils::format_bytes;
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// assert_eq!(format_bytes(1073741824), "1.0 GB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a duration in seconds as `HH:MM:SS`
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}
