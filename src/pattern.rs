//! Message pattern matching
//!
//! Patterns are compiled case-insensitive with `.` matching newlines and
//! are anchored at the start of the message text.

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};

/// Invitation to a volleyball game.
pub const DEFAULT_GAME_PATTERN: &str = r".*приглашаю.*поиграть.*волейбол.*";

/// Announcement of today's training.
pub const DEFAULT_TRAINING_PATTERN: &str = r".*сегодня.*тренировка.*";

/// Resolve a preset name (`training`, `game`) to its pattern.
/// Anything else is returned unchanged.
pub fn resolve_preset(pattern: &str) -> &str {
    match pattern.trim().to_lowercase().as_str() {
        "training" => DEFAULT_TRAINING_PATTERN,
        "game" => DEFAULT_GAME_PATTERN,
        _ => pattern,
    }
}

/// Compiled form of a tracking pattern.
#[derive(Debug, Clone)]
pub struct Matcher {
    source: String,
    regex: Regex,
}

impl Matcher {
    /// Compile a pattern. Invalid syntax is a configuration error.
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::Configuration("pattern must not be empty".to_string()));
        }

        let regex = RegexBuilder::new(&format!(r"\A(?:{})", pattern))
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// True if the text matches from its first character.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// The pattern as configured, without the anchor.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}
