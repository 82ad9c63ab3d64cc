//! Transport layer
//!
//! Supports:
//! - Telnet protocol with option negotiation
//! - IAC escaping / command stripping as standalone helpers

pub mod codec;
mod telnet;

pub use codec::{escape_iac, unescape_iac, TelnetCommand, TelnetDecoder};
pub use telnet::{naws_frame, NegotiatedOptions, TelnetConfig, TelnetTransport, DEFAULT_PORT};

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connect did not complete in time
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Link dropped mid-session
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Not connected
    #[error("Disconnected")]
    Disconnected,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TransportError {
    /// True for timeouts
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TransportStats {
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// Packets sent
    pub packets_sent: u64,
    /// Packets received
    pub packets_received: u64,
    /// Errors count
    pub errors: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Duplex byte stream to a character-terminal service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Connect to the target
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Disconnect from the target; calling twice is harmless
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send payload, escaping protocol bytes
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Wait up to `timeout` for payload. An expired timeout yields an empty
    /// buffer; a closed peer yields [`TransportError::ConnectionLost`].
    async fn receive(
        &mut self,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;

    /// Announce a new window size (best effort)
    async fn set_size(&mut self, cols: u16, rows: u16) -> Result<(), TransportError>;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}
