//! Telnet transport implementation
//!
//! Implements the client side of the Telnet protocol (RFC 854) with the
//! option negotiation BBS software expects: terminal type (RFC 1091), window
//! size (RFC 1073), remote echo and suppress-go-ahead.

use super::codec::{
    escape_iac, negotiation, subnegotiation, TelnetCommand, TelnetDecoder, DO, DONT,
    OPT_BINARY, OPT_ECHO, OPT_NAWS, OPT_SUPPRESS_GO_AHEAD, OPT_TERMINAL_TYPE, TTYPE_IS,
    TTYPE_SEND, WILL, WONT,
};
use super::{TransportError, TransportStats, TransportTrait};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Default Telnet port
pub const DEFAULT_PORT: u16 = 23;

/// Telnet connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelnetConfig {
    /// Host address
    pub host: String,
    /// Port number (default: 23)
    pub port: u16,
    /// Terminal type to announce
    pub terminal_type: String,
    /// Window width announced via NAWS
    pub cols: u16,
    /// Window height announced via NAWS
    pub rows: u16,
    /// Bound on the TCP connect
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl TelnetConfig {
    /// Create a new Telnet configuration
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: DEFAULT_PORT,
            terminal_type: "ANSI".to_string(),
            cols: 80,
            rows: 24,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set terminal type
    #[must_use]
    pub fn terminal_type(mut self, term_type: &str) -> Self {
        self.terminal_type = term_type.to_string();
        self
    }

    /// Set window size
    #[must_use]
    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Set connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `host:port` string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// Option state for both sides of the connection.
///
/// Replies are produced only when an option actually changes state, so two
/// well-behaved peers can never enter a negotiation loop.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedOptions {
    /// Options we perform (WILL acknowledged by the peer's DO)
    local: HashSet<u8>,
    /// Options the peer performs (its WILL acknowledged by our DO)
    remote: HashSet<u8>,
    /// Our WILL offers awaiting an answer
    pending_local: HashSet<u8>,
    /// Our DO requests awaiting an answer
    pending_remote: HashSet<u8>,
}

impl NegotiatedOptions {
    /// Options this client is willing to perform
    fn supports_local(option: u8) -> bool {
        matches!(
            option,
            OPT_TERMINAL_TYPE | OPT_NAWS | OPT_SUPPRESS_GO_AHEAD | OPT_BINARY
        )
    }

    /// Options this client lets the server perform
    fn supports_remote(option: u8) -> bool {
        matches!(option, OPT_ECHO | OPT_SUPPRESS_GO_AHEAD | OPT_BINARY)
    }

    /// Record a WILL offer we are about to send
    pub fn offer_local(&mut self, option: u8) -> Option<[u8; 3]> {
        if self.local.contains(&option) || !self.pending_local.insert(option) {
            return None;
        }
        Some(negotiation(WILL, option))
    }

    /// Record a DO request we are about to send
    pub fn request_remote(&mut self, option: u8) -> Option<[u8; 3]> {
        if self.remote.contains(&option) || !self.pending_remote.insert(option) {
            return None;
        }
        Some(negotiation(DO, option))
    }

    /// Apply a DO/DONT/WILL/WONT from the peer; returns our reply, if any,
    /// and whether the option just became enabled locally.
    pub fn handle(&mut self, command: u8, option: u8) -> (Option<[u8; 3]>, bool) {
        match command {
            DO => {
                let was_pending = self.pending_local.remove(&option);
                if !Self::supports_local(option) {
                    return (Some(negotiation(WONT, option)), false);
                }
                if !self.local.insert(option) {
                    return (None, false);
                }
                let reply = (!was_pending).then(|| negotiation(WILL, option));
                (reply, true)
            }
            DONT => {
                self.pending_local.remove(&option);
                if self.local.remove(&option) {
                    (Some(negotiation(WONT, option)), false)
                } else {
                    (None, false)
                }
            }
            WILL => {
                let was_pending = self.pending_remote.remove(&option);
                if !Self::supports_remote(option) {
                    return (Some(negotiation(DONT, option)), false);
                }
                if !self.remote.insert(option) {
                    return (None, false);
                }
                ((!was_pending).then(|| negotiation(DO, option)), false)
            }
            WONT => {
                self.pending_remote.remove(&option);
                if self.remote.remove(&option) {
                    (Some(negotiation(DONT, option)), false)
                } else {
                    (None, false)
                }
            }
            _ => (None, false),
        }
    }

    /// The server echoes our input
    pub fn remote_echo(&self) -> bool {
        self.remote.contains(&OPT_ECHO)
    }

    /// Go-ahead suppressed in either direction
    pub fn suppress_go_ahead(&self) -> bool {
        self.remote.contains(&OPT_SUPPRESS_GO_AHEAD) || self.local.contains(&OPT_SUPPRESS_GO_AHEAD)
    }

    /// Window size updates are accepted by the server
    pub fn naws(&self) -> bool {
        self.local.contains(&OPT_NAWS)
    }

    /// Terminal type negotiation is active
    pub fn terminal_type(&self) -> bool {
        self.local.contains(&OPT_TERMINAL_TYPE)
    }
}

/// Build the NAWS subnegotiation for a given size
pub fn naws_frame(cols: u16, rows: u16) -> Vec<u8> {
    let [cw, cl] = cols.to_be_bytes();
    let [rw, rl] = rows.to_be_bytes();
    subnegotiation(OPT_NAWS, &[cw, cl, rw, rl])
}

/// Telnet transport
pub struct TelnetTransport {
    config: TelnetConfig,
    stream: Option<TcpStream>,
    stats: TransportStats,
    connected_at: Option<Instant>,
    decoder: TelnetDecoder,
    options: NegotiatedOptions,
}

impl TelnetTransport {
    /// Create a new Telnet transport
    pub fn new(config: TelnetConfig) -> Self {
        Self {
            config,
            stream: None,
            stats: TransportStats::default(),
            connected_at: None,
            decoder: TelnetDecoder::new(),
            options: NegotiatedOptions::default(),
        }
    }

    /// Create and connect in one step
    pub async fn open(config: TelnetConfig) -> Result<Self, TransportError> {
        let mut transport = Self::new(config);
        transport.connect().await?;
        Ok(transport)
    }

    /// Negotiated option state
    pub fn options(&self) -> &NegotiatedOptions {
        &self.options
    }

    /// Connection configuration
    pub fn config(&self) -> &TelnetConfig {
        &self.config
    }

    /// Turn decoded commands into the bytes we owe the server
    fn respond(&mut self, commands: &[TelnetCommand]) -> Vec<u8> {
        let mut replies = Vec::new();

        for command in commands {
            match *command {
                TelnetCommand::Negotiate { command, option } => {
                    let (reply, enabled) = self.options.handle(command, option);
                    debug!(command, option, ?reply, "telnet negotiation");
                    if let Some(reply) = reply {
                        replies.extend_from_slice(&reply);
                    }
                    if enabled && option == OPT_NAWS {
                        replies.extend_from_slice(&naws_frame(self.config.cols, self.config.rows));
                    }
                }
                TelnetCommand::Subnegotiation { option, ref data } => {
                    if option == OPT_TERMINAL_TYPE && data.first() == Some(&TTYPE_SEND) {
                        let mut payload = vec![TTYPE_IS];
                        payload.extend_from_slice(self.config.terminal_type.as_bytes());
                        replies.extend_from_slice(&subnegotiation(OPT_TERMINAL_TYPE, &payload));
                        debug!(term = %self.config.terminal_type, "sent terminal type");
                    }
                }
                TelnetCommand::Other(_) => {}
            }
        }

        replies
    }

    fn mark_lost(&mut self) {
        self.stream = None;
        self.connected_at = None;
        self.decoder.reset();
    }
}

fn is_connection_lost(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

#[async_trait]
impl TransportTrait for TelnetTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let addr = self.config.address();
        let limit = self.config.connect_timeout;

        let stream = tokio::time::timeout(limit, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

        stream.set_nodelay(true).map_err(TransportError::IoError)?;

        self.stream = Some(stream);
        self.connected_at = Some(Instant::now());
        self.decoder.reset();
        self.options = NegotiatedOptions::default();
        self.stats = TransportStats::default();

        // Opening offers; anything the server ignores simply stays pending
        let mut offers = Vec::new();
        for option in [OPT_NAWS, OPT_TERMINAL_TYPE] {
            offers.extend(self.options.offer_local(option).into_iter().flatten());
        }
        for option in [OPT_SUPPRESS_GO_AHEAD, OPT_ECHO] {
            offers.extend(self.options.request_remote(option).into_iter().flatten());
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.write_all(&offers).await.map_err(TransportError::IoError)?;
        }

        info!(%addr, "telnet connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
            info!(addr = %self.config.address(), "telnet disconnected");
        }
        self.connected_at = None;
        self.decoder.reset();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;

        let escaped = escape_iac(data);
        let written: std::io::Result<()> = async {
            stream.write_all(&escaped).await?;
            stream.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.stats.bytes_sent += data.len() as u64;
                self.stats.packets_sent += 1;
                Ok(data.len())
            }
            Err(e) if is_connection_lost(e.kind()) => {
                self.mark_lost();
                Err(TransportError::ConnectionLost(e.to_string()))
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(TransportError::IoError(e))
            }
        }
    }

    async fn receive(
        &mut self,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;

        let mut buffer = vec![0u8; max_bytes.max(1)];
        let n = match tokio::time::timeout(timeout, stream.read(&mut buffer)).await {
            Err(_) => return Ok(Bytes::new()),
            Ok(Ok(0)) => {
                self.mark_lost();
                return Err(TransportError::ConnectionLost("closed by peer".to_string()));
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) if is_connection_lost(e.kind()) => {
                self.mark_lost();
                return Err(TransportError::ConnectionLost(e.to_string()));
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(TransportError::IoError(e));
            }
        };

        let decoded = self.decoder.decode(&buffer[..n]);
        let replies = self.respond(&decoded.commands);

        if !replies.is_empty() {
            if let Some(stream) = self.stream.as_mut() {
                if let Err(e) = stream.write_all(&replies).await {
                    self.mark_lost();
                    return Err(TransportError::ConnectionLost(e.to_string()));
                }
            }
        }

        if !decoded.data.is_empty() {
            self.stats.bytes_received += decoded.data.len() as u64;
            self.stats.packets_received += 1;
        }

        Ok(decoded.data.freeze())
    }

    async fn set_size(&mut self, cols: u16, rows: u16) -> Result<(), TransportError> {
        self.config.cols = cols;
        self.config.rows = rows;

        if !self.options.naws() {
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        if let Err(e) = stream.write_all(&naws_frame(cols, rows)).await {
            warn!(error = %e, "window size update failed");
            return Err(TransportError::IoError(e));
        }
        Ok(())
    }

    fn connection_info(&self) -> String {
        format!("telnet://{}:{}", self.config.host, self.config.port)
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}
