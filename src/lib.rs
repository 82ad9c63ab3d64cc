//! # bbsbot Core Library
//!
//! Terminal automation for Telnet bulletin board systems:
//! - Telnet transport with option negotiation and IAC handling
//! - ANSI/CP437 screen emulation with snapshots
//! - Screen history and idle detection
//! - Regex prompt detection with typed field extraction
//! - Bounded session pool, prompt waiting and input sending
//!
//! ## Example
//!
//! ```rust,no_run
//! use bbsbot_core::{
//!     send_input, wait_for_prompt, InputKind, PatternSet, PromptDetector, Session,
//!     SessionOptions, TelnetConfig, WaitCallbacks, WaitOptions,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let patterns = PatternSet::load("patterns.yaml".as_ref())?;
//!     let detector = Arc::new(PromptDetector::new(patterns));
//!     let session =
//!         Session::connect(TelnetConfig::new("bbs.example"), SessionOptions::default(), detector)
//!             .await?;
//!
//!     let options = WaitOptions::default();
//!     let prompt = wait_for_prompt(&session, &options, &WaitCallbacks::new()).await?;
//!     println!("{} wants {}", prompt.prompt_id, prompt.input_kind);
//!     send_input(&session, "guest", InputKind::Line, Duration::from_millis(250)).await?;
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::buffer::{BufferManager, BufferedSnapshot};
pub use crate::core::logger::{transcript_filename, LogEntry, LogFormat, SessionLogger};
pub use crate::core::manager::{SessionManager, SessionRequest};
pub use crate::core::prompt::{
    FieldRule, FieldType, FieldValue, FieldVerdict, InputKind, PatternDecl, PatternError,
    PatternSet, PromptDetector, PromptMatch, ValidationError, ValidationErrorKind,
};
pub use crate::core::session::{
    ScreenRead, Session, SessionError, SessionId, SessionOptions, SessionStats,
};
pub use crate::core::terminal::{CursorPos, Snapshot, Terminal, TerminalSize};
pub use crate::core::transport::{
    escape_iac, unescape_iac, TelnetConfig, TelnetDecoder, TelnetTransport, TransportError,
    TransportTrait,
};
pub use crate::core::wait::{
    send_input, wait_for_prompt, PromptResult, RejectReason, WaitCallbacks, WaitMachine,
    WaitOptions, WaitState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
