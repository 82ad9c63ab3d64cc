//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Text and JSON rendering of screens and prompts

pub mod exit_codes;
pub mod output;

pub use exit_codes::{CliResult, ExitCodes};
pub use output::{format_check, format_prompt, format_screen, unescape_keys, OutputFormat};
