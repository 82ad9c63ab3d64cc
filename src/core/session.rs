//! Sessions
//!
//! A [`Session`] owns one transport, its terminal emulator and screen
//! history. Reads and sends serialize on the session's lock; different
//! sessions never contend.

use crate::core::buffer::{BufferManager, DEFAULT_CAPACITY};
use crate::core::logger::SessionLogger;
use crate::core::prompt::{PromptDetector, PromptMatch};
use crate::core::terminal::{Snapshot, Terminal, TerminalSize};
use crate::core::transport::{
    TelnetConfig, TelnetTransport, TransportError, TransportStats, TransportTrait,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default bytes read per call
pub const DEFAULT_READ_MAX_BYTES: usize = 4096;

/// Session error types
#[derive(Error, Debug)]
pub enum SessionError {
    /// The link failed or is gone
    #[error("Connection error: {0}")]
    Connection(#[source] TransportError),

    /// Nothing satisfying arrived in time
    #[error("Timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Session limit reached
    #[error("Session limit reached ({max})")]
    Capacity { max: usize },

    /// Unknown session id
    #[error("Session not found: {0}")]
    NotFound(SessionId),
}

impl SessionError {
    /// Deadline expired; the link may still be fine
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The link is gone or never came up
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(elapsed) => Self::Timeout { elapsed },
            other => Self::Connection(other),
        }
    }
}

/// Opaque session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Per-session tuning
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Snapshots kept in history
    pub buffer_capacity: usize,
    /// Bytes read per call when the caller does not say
    pub read_max_bytes: usize,
    /// Unchanged time after which a screen counts as idle
    pub idle_threshold: Duration,
    /// Run prompt detection on every read
    pub detect_prompts: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
            idle_threshold: Duration::from_secs(2),
            detect_prompts: true,
        }
    }
}

/// Result of one read cycle
#[derive(Debug, Clone, Serialize)]
pub struct ScreenRead {
    /// Screen after applying the received bytes
    pub snapshot: Snapshot,
    /// Detected prompt, if any
    pub prompt: Option<PromptMatch>,
    /// Screen unchanged for at least the session idle threshold
    pub idle: bool,
    /// Time the current content has been on screen
    #[serde(with = "duration_secs_f64")]
    pub since_change: Duration,
    /// Payload bytes consumed by this read
    pub bytes_read: usize,
}

mod duration_secs_f64 {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Callback run inside every read
pub type ReadHook = Arc<dyn Fn(&ScreenRead) + Send + Sync>;

/// Session counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub transport: TransportStats,
    pub reads: u64,
    pub sends: u64,
    pub prompts_detected: u64,
    pub screens_buffered: usize,
    pub connection_info: String,
}

struct SessionInner {
    transport: Box<dyn TransportTrait>,
    terminal: Terminal,
    buffer: BufferManager,
    logger: Option<SessionLogger>,
    reads: u64,
    sends: u64,
    prompts_detected: u64,
}

/// A live connection with terminal state
pub struct Session {
    id: SessionId,
    host: String,
    port: u16,
    options: SessionOptions,
    connected: AtomicBool,
    detector: Arc<PromptDetector>,
    hooks: RwLock<Vec<ReadHook>>,
    inner: Mutex<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a Telnet connection
    pub async fn connect(
        config: TelnetConfig,
        options: SessionOptions,
        detector: Arc<PromptDetector>,
    ) -> Result<Self, SessionError> {
        let (host, port) = (config.host.clone(), config.port);
        let size = TerminalSize::new(config.cols, config.rows);
        let transport = TelnetTransport::open(config).await?;
        tracing::info!(%host, port, "session connected");
        Ok(Self::with_transport(
            Box::new(transport),
            &host,
            port,
            size,
            options,
            detector,
        ))
    }

    /// Wrap an already connected transport
    pub fn with_transport(
        transport: Box<dyn TransportTrait>,
        host: &str,
        port: u16,
        size: TerminalSize,
        options: SessionOptions,
        detector: Arc<PromptDetector>,
    ) -> Self {
        let connected = transport.is_connected();
        Self {
            id: SessionId::new(),
            host: host.to_string(),
            port,
            connected: AtomicBool::new(connected),
            detector,
            hooks: RwLock::new(Vec::new()),
            inner: Mutex::new(SessionInner {
                transport,
                terminal: Terminal::with_size(size),
                buffer: BufferManager::new(options.buffer_capacity),
                logger: None,
                reads: 0,
                sends: 0,
                prompts_detected: 0,
            }),
            options,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn detector(&self) -> &PromptDetector {
        &self.detector
    }

    /// False once closed or the link dropped
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn check_connected(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::Connection(TransportError::Disconnected))
        }
    }

    fn absorb(&self, err: TransportError) -> SessionError {
        if matches!(
            err,
            TransportError::ConnectionLost(_) | TransportError::Disconnected
        ) {
            self.connected.store(false, Ordering::Release);
            tracing::info!(session = %self.id, error = %err, "session lost connection");
        }
        err.into()
    }

    /// Receive, render, buffer and classify.
    ///
    /// The whole cycle runs under the session lock, so a concurrent send
    /// waits for it.
    pub async fn read(
        &self,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<ScreenRead, SessionError> {
        self.check_connected()?;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let data = match inner.transport.receive(max_bytes, timeout).await {
            Ok(data) => data,
            Err(e) => return Err(self.absorb(e)),
        };
        if !data.is_empty() {
            if let Some(logger) = inner.logger.as_mut() {
                logger.log_rx(&data);
            }
            inner.terminal.process(&data);
        }
        inner.reads += 1;

        let snapshot = inner.terminal.get_snapshot();
        let since_change = inner.buffer.add_screen(snapshot.clone()).since_change;
        let prompt = if self.options.detect_prompts {
            self.detector.detect_prompt(&snapshot)
        } else {
            None
        };
        if prompt.is_some() {
            inner.prompts_detected += 1;
        }

        let read = ScreenRead {
            snapshot,
            prompt,
            idle: since_change >= self.options.idle_threshold,
            since_change,
            bytes_read: data.len(),
        };
        tracing::trace!(
            session = %self.id,
            bytes = read.bytes_read,
            idle = read.idle,
            prompt = read.prompt.as_ref().map(|p| p.prompt_id.as_str()),
            "read"
        );

        // Snapshot the list so a hook may register further hooks
        let hooks = self.hooks.read().clone();
        for hook in &hooks {
            hook(&read);
        }

        Ok(read)
    }

    /// Send raw bytes
    pub async fn send(&self, data: &[u8]) -> Result<usize, SessionError> {
        self.check_connected()?;
        let mut inner = self.inner.lock().await;
        if let Some(logger) = inner.logger.as_mut() {
            logger.log_tx(data);
        }
        match inner.transport.send(data).await {
            Ok(n) => {
                inner.sends += 1;
                Ok(n)
            }
            Err(e) => Err(self.absorb(e)),
        }
    }

    /// Send UTF-8 text
    pub async fn send_text(&self, text: &str) -> Result<usize, SessionError> {
        self.send(text.as_bytes()).await
    }

    /// Current screen
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.lock().await.terminal.get_snapshot()
    }

    /// Last `n` buffered screens, most recent last
    pub async fn recent_screens(&self, n: usize) -> Vec<Snapshot> {
        let inner = self.inner.lock().await;
        inner
            .buffer
            .get_recent(n)
            .into_iter()
            .map(|e| e.snapshot.clone())
            .collect()
    }

    /// Resize the emulator and tell the peer if it agreed to NAWS
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        inner.terminal.resize(TerminalSize::new(cols, rows));
        if self.is_connected() {
            if let Err(e) = inner.transport.set_size(cols, rows).await {
                return Err(self.absorb(e));
            }
        }
        Ok(())
    }

    /// Register a callback run after every read
    pub fn add_read_hook<F>(&self, hook: F)
    where
        F: Fn(&ScreenRead) + Send + Sync + 'static,
    {
        self.hooks.write().push(Arc::new(hook));
    }

    /// Record a transcript from now on
    pub async fn set_transcript(&self, logger: SessionLogger) {
        let mut inner = self.inner.lock().await;
        inner.logger = Some(logger);
    }

    /// Render the buffered transcript
    pub async fn transcript(&self, format: crate::core::logger::LogFormat) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.logger.as_ref().map(|l| l.export(format))
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = self.inner.lock().await;
        SessionStats {
            transport: inner.transport.stats(),
            reads: inner.reads,
            sends: inner.sends,
            prompts_detected: inner.prompts_detected,
            screens_buffered: inner.buffer.len(),
            connection_info: inner.transport.connection_info(),
        }
    }

    /// Disconnect; calling again does nothing.
    ///
    /// Waits for an in-flight read or send to finish first.
    pub async fn close(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        if let Some(logger) = inner.logger.as_mut() {
            logger.log_info("session closed");
            if let Err(e) = logger.flush() {
                tracing::warn!(session = %self.id, error = %e, "transcript flush failed");
            }
        }
        if inner.transport.is_connected() {
            inner.transport.disconnect().await?;
        }
        if was_connected {
            tracing::info!(session = %self.id, host = %self.host, "session closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prompt::{PatternDecl, PatternSet};
    use crate::core::transport::MockTransportTrait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    fn mock_transport() -> MockTransportTrait {
        let mut mock = MockTransportTrait::new();
        mock.expect_is_connected().return_const(true);
        mock.expect_stats().returning(TransportStats::default);
        mock.expect_connection_info()
            .return_const(String::from("mock"));
        mock
    }

    fn session(mock: MockTransportTrait, detector: PromptDetector) -> Session {
        Session::with_transport(
            Box::new(mock),
            "bbs.example",
            23,
            TerminalSize::new(40, 5),
            SessionOptions::default(),
            Arc::new(detector),
        )
    }

    fn command_detector() -> PromptDetector {
        let patterns = PatternSet::new(vec![PatternDecl::new("command", r"Command\?")]);
        PromptDetector::new(patterns.unwrap())
    }

    #[tokio::test]
    async fn test_read_renders_and_detects() {
        let mut mock = mock_transport();
        mock.expect_receive()
            .times(1)
            .returning(|_, _| Ok(Bytes::from_static(b"\x1b[2JSector 1\r\nCommand? ")));

        let session = session(mock, command_detector());
        let read = session.read(Duration::from_millis(10), 4096).await.unwrap();
        assert_eq!(read.bytes_read, 23);
        assert_eq!(read.snapshot.last_line(), "Command?");
        assert_eq!(read.prompt.unwrap().prompt_id, "command");
        assert!(!read.idle);
        assert_eq!(session.recent_screens(10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_connection_lost_marks_disconnected() {
        let mut mock = mock_transport();
        mock.expect_receive()
            .returning(|_, _| Err(TransportError::ConnectionLost("reset".into())));

        let session = session(mock, PromptDetector::default());
        let err = session.read(Duration::from_millis(10), 64).await.unwrap_err();
        assert!(err.is_connection());
        assert!(!session.is_connected());

        // Subsequent calls fail fast without touching the transport
        let err = session.send(b"x").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_send_logs_transcript() {
        let mut mock = mock_transport();
        mock.expect_send()
            .withf(|data: &[u8]| data == b"hello\r")
            .times(1)
            .returning(|data| Ok(data.len()));

        let session = session(mock, PromptDetector::default());
        session.set_transcript(SessionLogger::default()).await;
        assert_eq!(session.send_text("hello\r").await.unwrap(), 6);

        let transcript = session
            .transcript(crate::core::logger::LogFormat::Text)
            .await
            .unwrap();
        assert!(transcript.contains("TX hello\\r"));
        assert_eq!(session.stats().await.sends, 1);
    }

    #[tokio::test]
    async fn test_read_hooks_run() {
        let mut mock = mock_transport();
        mock.expect_receive().returning(|_, _| Ok(Bytes::new()));

        let session = session(mock, PromptDetector::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        session.add_read_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        session.read(Duration::ZERO, 64).await.unwrap();
        session.read(Duration::ZERO, 64).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.stats().await.reads, 2);
    }

    #[tokio::test]
    async fn test_hook_can_register_hooks() {
        let mut mock = mock_transport();
        mock.expect_receive().returning(|_, _| Ok(Bytes::new()));

        let session = Arc::new(session(mock, PromptDetector::default()));
        let nested = Arc::new(AtomicUsize::new(0));
        let weak = Arc::downgrade(&session);
        let counter = Arc::clone(&nested);
        session.add_read_hook(move |_| {
            if let Some(session) = weak.upgrade() {
                let counter = Arc::clone(&counter);
                session.add_read_hook(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        session.read(Duration::ZERO, 64).await.unwrap();
        assert_eq!(nested.load(Ordering::SeqCst), 0);
        session.read(Duration::ZERO, 64).await.unwrap();
        assert_eq!(nested.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let link = Arc::new(AtomicBool::new(true));
        let mut mock = MockTransportTrait::new();
        let state = Arc::clone(&link);
        mock.expect_is_connected()
            .returning(move || state.load(Ordering::SeqCst));
        let state = Arc::clone(&link);
        mock.expect_disconnect().times(1).returning(move || {
            state.store(false, Ordering::SeqCst);
            Ok(())
        });

        let session = session(mock, PromptDetector::default());
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(!session.is_connected());
        assert!(!link.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_resize_updates_snapshot_geometry() {
        let mut mock = mock_transport();
        mock.expect_set_size()
            .withf(|&cols, &rows| cols == 100 && rows == 30)
            .times(1)
            .returning(|_, _| Ok(()));

        let session = session(mock, PromptDetector::default());
        session.resize(100, 30).await.unwrap();
        let snap = session.snapshot().await;
        assert_eq!((snap.cols, snap.rows), (100, 30));
    }

    #[test]
    fn test_error_classification() {
        let timeout: SessionError = TransportError::Timeout(Duration::from_secs(1)).into();
        assert!(timeout.is_timeout() && !timeout.is_connection());
        let lost: SessionError = TransportError::ConnectionLost("eof".into()).into();
        assert!(lost.is_connection() && !lost.is_timeout());
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
    }
}
