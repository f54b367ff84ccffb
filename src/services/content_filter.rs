//! Content-safety classification of inbound filenames

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

/// Who is asking; lets a classifier apply per-user or per-chat policy
#[derive(Debug, Clone, Copy)]
pub struct SafetyContext {
    pub user_id: i64,
    pub chat_id: i64,
}

#[async_trait]
pub trait ContentSafety: Send + Sync + 'static {
    async fn is_unsafe(&self, filename: &str, ctx: &SafetyContext) -> bool;
}

/// Flags filenames containing any blocked keyword as a whole word
pub struct KeywordContentFilter {
    pattern: Option<Regex>,
}

impl KeywordContentFilter {
    pub fn new<I, S>(keywords: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = keywords
            .into_iter()
            .filter_map(|k| {
                let k = k.as_ref().trim();
                (!k.is_empty()).then(|| regex::escape(k))
            })
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_none()
    }
}

#[async_trait]
impl ContentSafety for KeywordContentFilter {
    async fn is_unsafe(&self, filename: &str, _ctx: &SafetyContext) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(filename))
    }
}
