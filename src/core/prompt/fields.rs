//! Structured field extraction from prompt screens
//!
//! Each rule is applied on its own: a field that fails to match or convert
//! is reported in the [`FieldVerdict`] while every other field is still
//! extracted.

use super::PatternError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Raw text
    #[default]
    #[serde(alias = "str")]
    String,
    /// Signed integer; thousands separators are accepted
    #[serde(alias = "integer")]
    Int,
    /// Floating point
    Float,
    /// yes/no, true/false, y/n, on/off, 1/0
    #[serde(alias = "boolean")]
    Bool,
}

/// One field-extraction rule as declared in a pattern file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    /// Output key
    pub name: String,
    /// Value type
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    /// Capturing expression; group 1 is the value, or the whole match
    /// when the expression has no group
    pub regex: String,
    /// Inclusive lower bound for numeric fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Accepted raw values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    /// Expression the raw value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Missing value is an error
    #[serde(default)]
    pub required: bool,
}

impl FieldRule {
    /// Create an optional string rule
    pub fn new(name: &str, regex: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::String,
            regex: regex.to_string(),
            min: None,
            max: None,
            allowed_values: None,
            pattern: None,
            required: false,
        }
    }

    /// Set type
    #[must_use]
    pub fn typed(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    /// Mark as required
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set numeric bounds
    #[must_use]
    pub fn bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Restrict raw values
    #[must_use]
    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed_values = Some(values.iter().map(|v| (*v).to_string()).collect());
        self
    }
}

/// An extracted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
        }
    }
}

/// Why a field failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    MissingRequired,
    TypeMismatch,
    OutOfBounds,
    DisallowedValue,
    PatternMismatch,
}

/// A field that did not satisfy its rule. Reported, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("field '{field}': {message}")]
pub struct ValidationError {
    /// Field name
    pub field: String,
    /// Category
    pub kind: ValidationErrorKind,
    /// Human readable detail
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, kind: ValidationErrorKind, message: String) -> Self {
        Self {
            field: field.to_string(),
            kind,
            message,
        }
    }
}

/// Aggregated result of validating every field of a match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVerdict {
    /// All errors, in rule order
    pub errors: Vec<ValidationError>,
}

impl FieldVerdict {
    /// No errors
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors of one kind
    pub fn count(&self, kind: ValidationErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }
}

/// A rule with its expressions compiled
#[derive(Debug, Clone)]
pub struct CompiledField {
    rule: FieldRule,
    regex: Regex,
    pattern: Option<Regex>,
}

impl CompiledField {
    /// Compile a rule; `owner` names the pattern in error messages
    pub fn compile(
        rule: FieldRule,
        owner: &str,
        case_insensitive: bool,
    ) -> Result<Self, PatternError> {
        let build = |expr: &str| {
            RegexBuilder::new(expr)
                .case_insensitive(case_insensitive)
                .multi_line(true)
                .build()
                .map_err(|source| PatternError::Regex {
                    id: format!("{owner}.{}", rule.name),
                    source,
                })
        };
        let regex = build(&rule.regex)?;
        let pattern = rule.pattern.as_deref().map(build).transpose()?;
        Ok(Self { rule, regex, pattern })
    }

    /// The declared rule
    pub fn rule(&self) -> &FieldRule {
        &self.rule
    }

    fn capture<'t>(&self, text: &'t str) -> Option<&'t str> {
        let caps = self.regex.captures(text)?;
        caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str().trim())
    }

    /// Extract and validate this field alone
    fn extract(&self, text: &str) -> (Option<FieldValue>, Vec<ValidationError>) {
        let name = self.rule.name.as_str();
        let mut errors = Vec::new();

        let Some(raw) = self.capture(text) else {
            if self.rule.required {
                errors.push(ValidationError::new(
                    name,
                    ValidationErrorKind::MissingRequired,
                    "required field not found".to_string(),
                ));
            }
            return (None, errors);
        };

        let value = match convert(raw, self.rule.field_type) {
            Some(value) => value,
            None => {
                errors.push(ValidationError::new(
                    name,
                    ValidationErrorKind::TypeMismatch,
                    format!("'{raw}' is not a valid {:?}", self.rule.field_type),
                ));
                return (None, errors);
            }
        };

        if let Some(n) = value.as_f64() {
            let below = self.rule.min.is_some_and(|min| n < min);
            let above = self.rule.max.is_some_and(|max| n > max);
            if below || above {
                errors.push(ValidationError::new(
                    name,
                    ValidationErrorKind::OutOfBounds,
                    format!("{n} outside [{:?}, {:?}]", self.rule.min, self.rule.max),
                ));
            }
        }

        if let Some(allowed) = &self.rule.allowed_values {
            if !allowed.iter().any(|a| a.eq_ignore_ascii_case(raw)) {
                errors.push(ValidationError::new(
                    name,
                    ValidationErrorKind::DisallowedValue,
                    format!("'{raw}' not in {allowed:?}"),
                ));
            }
        }

        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(raw) {
                errors.push(ValidationError::new(
                    name,
                    ValidationErrorKind::PatternMismatch,
                    format!("'{raw}' does not match /{}/", pattern.as_str()),
                ));
            }
        }

        (Some(value), errors)
    }
}

fn convert(raw: &str, field_type: FieldType) -> Option<FieldValue> {
    match field_type {
        FieldType::String => Some(FieldValue::String(raw.to_string())),
        FieldType::Int => {
            let cleaned: String = raw.chars().filter(|c| !matches!(c, ',' | '_')).collect();
            cleaned.parse().ok().map(FieldValue::Int)
        }
        FieldType::Float => {
            let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
            cleaned.parse().ok().map(FieldValue::Float)
        }
        FieldType::Bool => match raw.to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "on" | "1" => Some(FieldValue::Bool(true)),
            "no" | "n" | "false" | "off" | "0" => Some(FieldValue::Bool(false)),
            _ => None,
        },
    }
}

/// Apply every rule to `text`
pub fn extract_fields(
    fields: &[CompiledField],
    text: &str,
) -> (BTreeMap<String, FieldValue>, FieldVerdict) {
    let mut values = BTreeMap::new();
    let mut verdict = FieldVerdict::default();

    for field in fields {
        let (value, errors) = field.extract(text);
        if let Some(value) = value {
            values.insert(field.rule.name.clone(), value);
        }
        verdict.errors.extend(errors);
    }

    (values, verdict)
}
