//! Prompt detection
//!
//! A [`PromptDetector`] owns a compiled [`PatternSet`] and classifies screen
//! snapshots against it. Detectors share no state with each other.

mod fields;
mod patterns;

pub use fields::{
    extract_fields, CompiledField, FieldRule, FieldType, FieldValue, FieldVerdict,
    ValidationError, ValidationErrorKind,
};
pub use patterns::{PatternDecl, PatternFile, PatternSet, PromptPattern};

use crate::core::terminal::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pattern loading errors
#[derive(Error, Debug)]
pub enum PatternError {
    /// Expression failed to compile
    #[error("Invalid regex in pattern '{id}': {source}")]
    Regex {
        id: String,
        #[source]
        source: regex::Error,
    },

    /// File content could not be parsed
    #[error("Pattern parse error: {0}")]
    Parse(String),

    /// Two patterns share an id
    #[error("Duplicate pattern id: {0}")]
    DuplicateId(String),

    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a prompt expects input to be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "snake_case")]
pub enum InputKind {
    /// Keys sent verbatim with no terminator
    SingleKey,
    /// Keys followed by a carriage return
    #[default]
    Line,
    /// A single space, whatever keys were given
    AnyKey,
}

impl InputKind {
    /// Parse a kind name; unknown names are `Line`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single_key" | "single" | "key" | "no_terminator" | "hotkey" => Self::SingleKey,
            "any_key" | "anykey" | "filler" | "pause" | "more" => Self::AnyKey,
            _ => Self::Line,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleKey => "single_key",
            Self::Line => "line",
            Self::AnyKey => "any_key",
        }
    }
}

impl From<String> for InputKind {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl FromStr for InputKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified prompt
#[derive(Debug, Clone, Serialize)]
pub struct PromptMatch {
    /// Id of the matching pattern
    pub prompt_id: String,
    /// Input kind declared by the pattern
    pub input_kind: InputKind,
    /// Text matched by the positive expression
    pub matched_text: String,
    /// Extracted fields
    pub fields: BTreeMap<String, FieldValue>,
    /// Field validation outcome
    pub verdict: FieldVerdict,
}

/// Classifies snapshots against a pattern set
#[derive(Debug, Clone, Default)]
pub struct PromptDetector {
    patterns: PatternSet,
}

impl PromptDetector {
    pub fn new(patterns: PatternSet) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// First pattern, in declaration order, that matches the screen.
    ///
    /// Patterns expecting the cursor at the end are skipped when the
    /// snapshot says otherwise.
    pub fn detect_prompt(&self, snapshot: &Snapshot) -> Option<PromptMatch> {
        let text = Self::match_text(snapshot);

        for pattern in self.patterns.iter() {
            if pattern.expect_cursor_at_end() && !snapshot.cursor_at_end {
                continue;
            }
            let Some(found) = pattern.matches_text(&text) else {
                continue;
            };

            let (fields, verdict) = extract_fields(pattern.fields(), &text);
            tracing::debug!(
                prompt_id = pattern.id(),
                fields = fields.len(),
                errors = verdict.errors.len(),
                "prompt detected"
            );
            return Some(PromptMatch {
                prompt_id: pattern.id().to_string(),
                input_kind: pattern.input_kind(),
                matched_text: found.as_str().to_string(),
                fields,
                verdict,
            });
        }

        None
    }

    /// Guess the input kind from phrase cues on the last lines of `text`
    pub fn auto_detect_input_type(text: &str) -> Option<InputKind> {
        let tail: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .rev()
            .take(2)
            .map(str::to_ascii_lowercase)
            .collect();

        // Most specific cue first
        const ANY_KEY: &[&str] = &[
            "press any key",
            "[pause]",
            "hit a key",
            "hit any key",
            "<more>",
        ];
        const SINGLE_KEY: &[&str] = &["(y/n)", "[y/n]", "(yes/no)", "[yn]"];
        const LINE: &[&str] = &["enter", "type", "name:", "password:", "handle:"];

        for line in &tail {
            if ANY_KEY.iter().any(|cue| line.contains(cue)) {
                return Some(InputKind::AnyKey);
            }
            if SINGLE_KEY.iter().any(|cue| line.contains(cue)) {
                return Some(InputKind::SingleKey);
            }
            if LINE.iter().any(|cue| line.contains(cue)) {
                return Some(InputKind::Line);
            }
        }
        None
    }

    /// Screen text with row padding removed
    fn match_text(snapshot: &Snapshot) -> String {
        let lines: Vec<&str> = snapshot.trimmed_lines().collect();
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(decls: Vec<PatternDecl>) -> PromptDetector {
        PromptDetector::new(PatternSet::new(decls).unwrap())
    }

    #[test]
    fn test_command_prompt_with_sector() {
        let detector = detector(vec![PatternDecl::new(
            "command",
            r"Command \[TL=[0-9:]+\]:\[\d+\]",
        )
        .input(InputKind::SingleKey)
        .field(
            FieldRule::new("sector", r"\]:\[(\d+)\]")
                .typed(FieldType::Int)
                .required(),
        )]);

        let snap = Snapshot::from_text("Command [TL=00:00:05]:[42] (?=Help)?", true);
        let found = detector.detect_prompt(&snap).unwrap();
        assert_eq!(found.prompt_id, "command");
        assert_eq!(found.input_kind, InputKind::SingleKey);
        assert_eq!(found.fields["sector"].as_i64(), Some(42));
        assert!(found.verdict.is_valid());
    }

    #[test]
    fn test_negative_regex_vetoes_match() {
        let detector =
            detector(vec![PatternDecl::new("password", "password").negative("invalid|error")]);

        let snap = Snapshot::from_text("Invalid password\nPassword: ", true);
        assert!(detector.detect_prompt(&snap).is_none());

        let snap = Snapshot::from_text("Password: ", true);
        assert!(detector.detect_prompt(&snap).is_some());
    }

    #[test]
    fn test_cursor_gating() {
        let detector = detector(vec![
            PatternDecl::new("gated", "Continue"),
            PatternDecl::new("ungated", "Continue").cursor_at_end(false),
        ]);

        let at_end = Snapshot::from_text("Continue? ", true);
        assert_eq!(detector.detect_prompt(&at_end).unwrap().prompt_id, "gated");

        let away = Snapshot::from_text("Continue? ", false);
        assert_eq!(detector.detect_prompt(&away).unwrap().prompt_id, "ungated");
    }

    #[test]
    fn test_declaration_order_wins() {
        let detector = detector(vec![
            PatternDecl::new("first", "Menu"),
            PatternDecl::new("second", "Main Menu"),
        ]);
        let snap = Snapshot::from_text("Main Menu: ", true);
        assert_eq!(detector.detect_prompt(&snap).unwrap().prompt_id, "first");
    }

    #[test]
    fn test_one_missing_required_field() {
        let detector = detector(vec![PatternDecl::new("status", "Credits")
            .field(FieldRule::new("credits", r"Credits: ([\d,]+)").typed(FieldType::Int))
            .field(FieldRule::new("turns", r"Turns: (\d+)").typed(FieldType::Int).required())
            .field(FieldRule::new("ship", r"Ship: (\w+)"))]);

        let snap = Snapshot::from_text("Credits: 1,234  Ship: Merchant\nCommand? ", true);
        let found = detector.detect_prompt(&snap).unwrap();
        assert_eq!(found.verdict.errors.len(), 1);
        assert_eq!(found.verdict.count(ValidationErrorKind::MissingRequired), 1);
        assert_eq!(found.fields["credits"].as_i64(), Some(1234));
        assert_eq!(found.fields["ship"].as_str(), Some("Merchant"));
        assert!(!found.fields.contains_key("turns"));
    }

    #[test]
    fn test_padding_does_not_affect_matching() {
        let detector = detector(vec![PatternDecl::new("name", r"name:$")]);
        let mut snap = Snapshot::from_text("Enter your name:", true);
        snap.text = format!("{:<40}\n{:<40}", "Welcome", "Enter your name:");
        snap.cursor.row = 1;
        assert!(detector.detect_prompt(&snap).is_some());
    }

    #[test]
    fn test_independent_detectors() {
        let a = detector(vec![PatternDecl::new("a", "alpha")]);
        let b = detector(vec![PatternDecl::new("b", "beta")]);
        let snap = Snapshot::from_text("alpha beta", true);
        assert_eq!(a.detect_prompt(&snap).unwrap().prompt_id, "a");
        assert_eq!(b.detect_prompt(&snap).unwrap().prompt_id, "b");
    }

    #[test]
    fn test_auto_detect_input_type() {
        assert_eq!(
            PromptDetector::auto_detect_input_type("News\n\n[Pause]"),
            Some(InputKind::AnyKey)
        );
        assert_eq!(
            PromptDetector::auto_detect_input_type("Continue (Y/N)?"),
            Some(InputKind::SingleKey)
        );
        assert_eq!(
            PromptDetector::auto_detect_input_type("Password: "),
            Some(InputKind::Line)
        );
        assert_eq!(PromptDetector::auto_detect_input_type("ASCII art only"), None);
    }

    #[test]
    fn test_input_kind_names() {
        assert_eq!(InputKind::parse("single_key"), InputKind::SingleKey);
        assert_eq!(InputKind::parse("no-terminator"), InputKind::SingleKey);
        assert_eq!(InputKind::parse("filler"), InputKind::AnyKey);
        assert_eq!(InputKind::parse("line-terminated"), InputKind::Line);
        assert_eq!(InputKind::parse("whatever"), InputKind::Line);
        assert_eq!("any_key".parse::<InputKind>().unwrap(), InputKind::AnyKey);
        assert_eq!(InputKind::default().to_string(), "line");
    }
}
