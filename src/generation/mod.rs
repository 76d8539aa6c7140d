/// Content Generation Module
///
/// Candidate posts, the length rules they must satisfy, and the two
/// interchangeable strategies that produce them (random template fills and
/// prompted generation against a hosted language model).

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::llm::BackendError;

pub mod knowledge;
pub mod prompted;
pub mod prompts;
pub mod template;
pub mod unique;

pub use prompted::PromptedGenerator;
pub use template::TemplateGenerator;
pub use unique::UniquenessFilter;

/// Hard platform limit for a single post, in characters
pub const MAX_POST_CHARS: usize = 280;

/// A generated post that has not been published yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    /// Length in characters (not bytes)
    pub length: usize,
}

impl Candidate {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let length = text.chars().count();
        Self { text, length }
    }
}

/// Inclusive character-length range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBand {
    pub min: usize,
    pub max: usize,
}

impl LengthBand {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, length: usize) -> bool {
        length >= self.min && length <= self.max
    }
}

impl fmt::Display for LengthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Credentials were rejected; retrying cannot help
    #[error("generative backend rejected the credentials")]
    Unauthorized,

    #[error("generative backend failed after {attempts} attempts: {source}")]
    Backend {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("generated text is {length} characters, outside {band}")]
    InvalidLength { length: usize, band: LengthBand },

    #[error("generator produced empty text")]
    Empty,

    #[error("knowledge catalog has no categories")]
    EmptyCatalog,
}

impl GenerationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GenerationError::Unauthorized)
    }
}

/// A strategy that produces one candidate post per call
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self) -> Result<Candidate, GenerationError>;

    /// Deterministic, always-valid texts used when no unique candidate can be
    /// produced within the attempt budget
    fn fallback_texts(&self) -> &[String];

    /// Short label used in logs
    fn name(&self) -> &'static str;
}

/// Collapse every run of whitespace (newlines included) into a single space
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F600..=0x1F64F
            | 0x1F300..=0x1F5FF
            | 0x1F680..=0x1F6FF
            | 0x1F1E0..=0x1F1FF
            | 0x2700..=0x27BF
            | 0x1F900..=0x1F9FF
    )
}

/// Clean raw model output into postable text.
///
/// Strips wrapping quotes, emoji, list markers at line starts and collapses
/// whitespace.
pub fn sanitize_generated(raw: &str) -> String {
    let unquoted = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '\u{201C}' | '\u{201D}'));

    let without_emoji: String = unquoted.chars().filter(|c| !is_emoji(*c)).collect();

    let without_markers = without_emoji
        .lines()
        .map(|line| match line.strip_prefix(&['-', '•', '*'][..]) {
            Some(rest) => rest.trim_start(),
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");

    normalize_whitespace(&without_markers)
}
