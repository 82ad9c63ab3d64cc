//! Core module containing the main functionality of bbsbot
//!
//! This module provides:
//! - Transport layer (Telnet over TCP)
//! - Terminal emulation (ANSI, CP437)
//! - Screen history with idle detection
//! - Prompt detection and field extraction
//! - Sessions and the session pool
//! - Prompt waiting and input sending
//! - Session transcripts

pub mod buffer;
pub mod logger;
pub mod manager;
pub mod prompt;
pub mod session;
pub mod terminal;
pub mod transport;
pub mod wait;
