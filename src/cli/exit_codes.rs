//! Process exit codes
//!
//! Scripts driving `bbsbot` branch on these, so the numbers never change.

use crate::config::ConfigError;
use crate::core::prompt::PatternError;
use crate::core::session::SessionError;
use std::process::ExitCode;

/// Exit code table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    /// Bad or missing command-line input
    pub const INVALID_ARGS: u8 = 2;
    /// Connection refused, dropped or never established
    pub const CONNECTION_FAILED: u8 = 3;
    /// Nothing arrived in time
    pub const TIMEOUT: u8 = 4;
    /// Config or pattern file unreadable
    pub const CONFIG_ERROR: u8 = 8;
    /// No prompt pattern matched
    pub const PATTERN_NOT_FOUND: u8 = 16;
    /// A prompt matched but its fields failed validation
    pub const VALIDATION_FAILED: u8 = 17;

    /// Timeouts and lost links get separate codes
    pub fn for_session_error(err: &SessionError) -> u8 {
        match err {
            SessionError::Timeout { .. } => Self::TIMEOUT,
            SessionError::Connection(_) => Self::CONNECTION_FAILED,
            SessionError::Capacity { .. } | SessionError::NotFound(_) => Self::ERROR,
        }
    }

    /// Short human label for a code
    pub fn describe(code: u8) -> &'static str {
        match code {
            Self::SUCCESS => "ok",
            Self::ERROR => "failed",
            Self::INVALID_ARGS => "bad arguments",
            Self::CONNECTION_FAILED => "connection failed",
            Self::TIMEOUT => "timed out",
            Self::CONFIG_ERROR => "bad configuration",
            Self::PATTERN_NOT_FOUND => "no prompt matched",
            Self::VALIDATION_FAILED => "field validation failed",
            _ => "unknown",
        }
    }
}

/// Outcome of one command
#[derive(Debug)]
pub enum CliResult {
    Success(Option<String>),
    /// Exit code and message for stderr
    Error(u8, String),
}

impl CliResult {
    pub fn success() -> Self {
        Self::Success(None)
    }

    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    pub fn pattern_not_found(msg: impl Into<String>) -> Self {
        Self::error(ExitCodes::PATTERN_NOT_FOUND, msg)
    }

    pub fn validation_failed(msg: impl Into<String>) -> Self {
        Self::error(ExitCodes::VALIDATION_FAILED, msg)
    }

    pub fn code(&self) -> u8 {
        if let Self::Error(code, _) = self {
            *code
        } else {
            ExitCodes::SUCCESS
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(note) => note.as_deref(),
            Self::Error(_, msg) => Some(msg.as_str()),
        }
    }

    pub fn to_exit_code(&self) -> ExitCode {
        self.code().into()
    }

    pub fn is_success(&self) -> bool {
        self.code() == ExitCodes::SUCCESS
    }
}

impl From<SessionError> for CliResult {
    fn from(err: SessionError) -> Self {
        Self::error(ExitCodes::for_session_error(&err), err.to_string())
    }
}

impl From<PatternError> for CliResult {
    fn from(err: PatternError) -> Self {
        Self::error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::TransportError;
    use std::time::Duration;

    #[test]
    fn test_result_codes() {
        let ok = CliResult::success();
        assert!(ok.is_success());
        assert_eq!(ok.code(), 0);
        assert_eq!(ok.message(), None);

        let missing = CliResult::pattern_not_found("no prompt");
        assert!(!missing.is_success());
        assert_eq!(missing.code(), 16);
        assert_eq!(missing.message(), Some("no prompt"));
    }

    #[test]
    fn test_timeout_and_lost_link_differ() {
        let timeout = CliResult::from(SessionError::Timeout {
            elapsed: Duration::from_secs(1),
        });
        assert_eq!(timeout.code(), ExitCodes::TIMEOUT);

        let lost = CliResult::from(SessionError::Connection(TransportError::ConnectionLost(
            "eof".into(),
        )));
        assert_eq!(lost.code(), ExitCodes::CONNECTION_FAILED);
    }

    #[test]
    fn test_describe() {
        assert_eq!(ExitCodes::describe(ExitCodes::TIMEOUT), "timed out");
        assert_eq!(ExitCodes::describe(200), "unknown");
    }
}
