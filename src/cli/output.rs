//! Output rendering for the command-line tool

use crate::core::prompt::{InputKind, PromptMatch};
use crate::core::session::ScreenRead;
use crate::core::wait::PromptResult;
use serde_json::json;
use std::fmt::Write as _;

/// How results are written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON document
    Json,
}

/// Screen after a plain read
pub fn format_screen(read: &ScreenRead, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(read).unwrap_or_default(),
        OutputFormat::Text => {
            let mut out: String = read
                .snapshot
                .trimmed_lines()
                .collect::<Vec<_>>()
                .join("\n");
            out.truncate(out.trim_end().len());
            if let Some(prompt) = &read.prompt {
                let _ = write!(out, "\n--\nprompt: {} ({})", prompt.prompt_id, prompt.input_kind);
            }
            out
        }
    }
}

/// Accepted prompt from a wait
pub fn format_prompt(result: &PromptResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
        OutputFormat::Text => {
            let mut out = format!(
                "prompt: {}\ninput: {}\nidle: {}\n",
                result.prompt_id, result.input_kind, result.idle
            );
            for (name, value) in &result.fields {
                let _ = writeln!(out, "  {name} = {value}");
            }
            for error in &result.verdict.errors {
                let _ = writeln!(out, "  ! {error}");
            }
            out.truncate(out.trim_end().len());
            out
        }
    }
}

/// Offline classification result
pub fn format_check(
    found: Option<&PromptMatch>,
    guessed: Option<InputKind>,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Json => json!({
            "matched": found.is_some(),
            "prompt": found,
            "guessed_input": guessed.map(|k| k.as_str()),
        })
        .to_string(),
        OutputFormat::Text => match found {
            Some(prompt) => {
                let mut out = format!(
                    "prompt: {}\ninput: {}\n",
                    prompt.prompt_id, prompt.input_kind
                );
                for (name, value) in &prompt.fields {
                    let _ = writeln!(out, "  {name} = {value}");
                }
                for error in &prompt.verdict.errors {
                    let _ = writeln!(out, "  ! {error}");
                }
                out.truncate(out.trim_end().len());
                out
            }
            None => match guessed {
                Some(kind) => format!("no pattern matched (looks like {kind} input)"),
                None => "no pattern matched".to_string(),
            },
        },
    }
}

/// Expand `\r`, `\n`, `\t`, `\e` and `\xNN` in user-supplied keys
pub fn unescape_keys(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('e') => out.push('\x1b'),
            Some('\\') => out.push('\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(b) => out.push(char::from(b)),
                    Err(_) => {
                        out.push_str("\\x");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prompt::{FieldValue, FieldVerdict};
    use std::collections::BTreeMap;

    fn prompt() -> PromptMatch {
        let mut fields = BTreeMap::new();
        fields.insert("sector".to_string(), FieldValue::Int(42));
        PromptMatch {
            prompt_id: "command".into(),
            input_kind: InputKind::SingleKey,
            matched_text: "Command".into(),
            fields,
            verdict: FieldVerdict::default(),
        }
    }

    #[test]
    fn test_check_text() {
        let p = prompt();
        let out = format_check(Some(&p), None, OutputFormat::Text);
        assert_eq!(out, "prompt: command\ninput: single_key\n  sector = 42");
        assert_eq!(
            format_check(None, Some(InputKind::AnyKey), OutputFormat::Text),
            "no pattern matched (looks like any_key input)"
        );
    }

    #[test]
    fn test_check_json() {
        let p = prompt();
        let value: serde_json::Value =
            serde_json::from_str(&format_check(Some(&p), None, OutputFormat::Json)).unwrap();
        assert_eq!(value["matched"], true);
        assert_eq!(value["prompt"]["fields"]["sector"], 42);
        assert_eq!(value["prompt"]["input_kind"], "single_key");
    }

    #[test]
    fn test_unescape_keys() {
        assert_eq!(unescape_keys(r"hello\r"), "hello\r");
        assert_eq!(unescape_keys(r"\e[A\x41"), "\x1b[AA");
        assert_eq!(unescape_keys(r"a\\b\q"), "a\\b\\q");
        assert_eq!(unescape_keys(r"\xZZ"), "\\xZZ");
    }
}
