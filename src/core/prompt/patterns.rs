//! Pattern declarations and compiled pattern sets
//!
//! Patterns are declared in YAML or TOML:
//!
//! ```yaml
//! patterns:
//!   - id: command_prompt
//!     regex: 'Command \[TL=[0-9:]+\]:\[\d+\]'
//!     input_type: single_key
//!     fields:
//!       - name: sector
//!         type: int
//!         regex: '\]:\[(\d+)\]'
//!         required: true
//! ```

use super::fields::{CompiledField, FieldRule};
use super::{InputKind, PatternError};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

fn default_true() -> bool {
    true
}

/// One prompt pattern as written in a pattern file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDecl {
    /// Unique identifier
    pub id: String,
    /// Positive expression
    pub regex: String,
    /// Expression that vetoes a positive match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_regex: Option<String>,
    /// How input should be sent when this prompt is seen
    #[serde(default, alias = "input_kind")]
    pub input_type: InputKind,
    /// Only match when the cursor sits after the last screen content
    #[serde(default = "default_true")]
    pub expect_cursor_at_end: bool,
    /// Field extraction rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldRule>,
    /// Free-form note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PatternDecl {
    /// Create a declaration with defaults (line input, cursor at end)
    pub fn new(id: &str, regex: &str) -> Self {
        Self {
            id: id.to_string(),
            regex: regex.to_string(),
            negative_regex: None,
            input_type: InputKind::Line,
            expect_cursor_at_end: true,
            fields: Vec::new(),
            description: None,
        }
    }

    /// Set the negative expression
    #[must_use]
    pub fn negative(mut self, regex: &str) -> Self {
        self.negative_regex = Some(regex.to_string());
        self
    }

    /// Set input kind
    #[must_use]
    pub fn input(mut self, kind: InputKind) -> Self {
        self.input_type = kind;
        self
    }

    /// Set cursor expectation
    #[must_use]
    pub fn cursor_at_end(mut self, expect: bool) -> Self {
        self.expect_cursor_at_end = expect;
        self
    }

    /// Add a field rule
    #[must_use]
    pub fn field(mut self, rule: FieldRule) -> Self {
        self.fields.push(rule);
        self
    }
}

/// Top-level layout of a pattern file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternFile {
    /// Compile every expression case-insensitively
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    /// Patterns in priority order
    #[serde(default)]
    pub patterns: Vec<PatternDecl>,
}

/// A compiled, immutable prompt pattern
#[derive(Debug, Clone)]
pub struct PromptPattern {
    id: String,
    regex: Regex,
    negative: Option<Regex>,
    input_kind: InputKind,
    expect_cursor_at_end: bool,
    fields: Vec<CompiledField>,
}

impl PromptPattern {
    fn compile(decl: PatternDecl, case_insensitive: bool) -> Result<Self, PatternError> {
        let build = |expr: &str| {
            RegexBuilder::new(expr)
                .case_insensitive(case_insensitive)
                .multi_line(true)
                .build()
                .map_err(|source| PatternError::Regex {
                    id: decl.id.clone(),
                    source,
                })
        };
        let regex = build(&decl.regex)?;
        let negative = decl.negative_regex.as_deref().map(build).transpose()?;
        let fields = decl
            .fields
            .iter()
            .cloned()
            .map(|rule| CompiledField::compile(rule, &decl.id, case_insensitive))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: decl.id,
            regex,
            negative,
            input_kind: decl.input_type,
            expect_cursor_at_end: decl.expect_cursor_at_end,
            fields,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input_kind(&self) -> InputKind {
        self.input_kind
    }

    pub fn expect_cursor_at_end(&self) -> bool {
        self.expect_cursor_at_end
    }

    pub fn fields(&self) -> &[CompiledField] {
        &self.fields
    }

    /// Positive matches and the negative expression does not.
    /// Cursor placement is checked by the detector.
    pub fn matches_text<'t>(&self, text: &'t str) -> Option<regex::Match<'t>> {
        let found = self.regex.find(text)?;
        if self.negative.as_ref().is_some_and(|neg| neg.is_match(text)) {
            return None;
        }
        Some(found)
    }
}

/// Ordered collection of compiled patterns
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<PromptPattern>,
}

impl PatternSet {
    /// Compile declarations case-insensitively
    pub fn new(decls: Vec<PatternDecl>) -> Result<Self, PatternError> {
        Self::compile(PatternFile {
            case_insensitive: true,
            patterns: decls,
        })
    }

    /// Compile a parsed pattern file
    pub fn compile(file: PatternFile) -> Result<Self, PatternError> {
        let mut seen = HashSet::new();
        let mut patterns = Vec::with_capacity(file.patterns.len());
        for decl in file.patterns {
            if !seen.insert(decl.id.clone()) {
                return Err(PatternError::DuplicateId(decl.id));
            }
            patterns.push(PromptPattern::compile(decl, file.case_insensitive)?);
        }
        tracing::debug!(count = patterns.len(), "compiled prompt patterns");
        Ok(Self { patterns })
    }

    /// Parse and compile YAML
    pub fn from_yaml_str(content: &str) -> Result<Self, PatternError> {
        let file: PatternFile =
            serde_yaml::from_str(content).map_err(|e| PatternError::Parse(e.to_string()))?;
        Self::compile(file)
    }

    /// Parse and compile TOML
    pub fn from_toml_str(content: &str) -> Result<Self, PatternError> {
        let file: PatternFile =
            toml::from_str(content).map_err(|e| PatternError::Parse(e.to_string()))?;
        Self::compile(file)
    }

    /// Load a `.toml`, `.yaml` or `.yml` file
    pub fn load(path: &Path) -> Result<Self, PatternError> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("yaml" | "yml") => Self::from_yaml_str(&content),
            other => Err(PatternError::Parse(format!(
                "unsupported pattern file extension: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// Patterns in priority order
    pub fn iter(&self) -> impl Iterator<Item = &PromptPattern> {
        self.patterns.iter()
    }

    /// Find a pattern by id
    pub fn get(&self, id: &str) -> Option<&PromptPattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
