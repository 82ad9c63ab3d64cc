//! Session transcripts
//!
//! Every byte a session sends or receives can be recorded with a timestamp,
//! kept in a bounded in-memory buffer and optionally appended to a file.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Default number of entries kept in memory
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Transcript line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Lossy UTF-8 text
    #[default]
    Text,
    /// Hex dump
    Hex,
    /// Text when printable, hex otherwise
    Mixed,
    /// One JSON object per line
    JsonLines,
}

impl LogFormat {
    /// File extension for the format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text | Self::Mixed => "log",
            Self::Hex => "hex",
            Self::JsonLines => "jsonl",
        }
    }
}

/// Data direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
    Info,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Self::Rx => "RX",
            Self::Tx => "TX",
            Self::Info => "##",
        }
    }
}

/// A single transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

fn is_printable(data: &[u8]) -> bool {
    data.iter()
        .all(|&b| (0x20..0x7F).contains(&b) || matches!(b, b'\r' | b'\n' | b'\t'))
}

impl LogEntry {
    pub fn new(direction: Direction, data: &[u8]) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            data: data.to_vec(),
        }
    }

    /// Render in `format`
    pub fn render(&self, format: LogFormat) -> String {
        let stamp = self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        match format {
            LogFormat::Text => format!(
                "[{stamp}] {} {}",
                self.direction.tag(),
                String::from_utf8_lossy(&self.data).escape_debug()
            ),
            LogFormat::Hex => {
                let hex: Vec<String> = self.data.iter().map(|b| format!("{b:02X}")).collect();
                format!("[{stamp}] {} {}", self.direction.tag(), hex.join(" "))
            }
            LogFormat::Mixed if is_printable(&self.data) => self.render(LogFormat::Text),
            LogFormat::Mixed => self.render(LogFormat::Hex),
            LogFormat::JsonLines => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

/// Per-session transcript recorder
#[derive(Debug)]
pub struct SessionLogger {
    file: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    format: LogFormat,
    buffer: VecDeque<LogEntry>,
    max_entries: usize,
    bytes_logged: u64,
}

impl Default for SessionLogger {
    fn default() -> Self {
        Self::new(LogFormat::default())
    }
}

impl SessionLogger {
    /// In-memory only logger
    pub fn new(format: LogFormat) -> Self {
        Self {
            file: None,
            path: None,
            format,
            buffer: VecDeque::new(),
            max_entries: DEFAULT_MAX_ENTRIES,
            bytes_logged: 0,
        }
    }

    /// Logger that also appends to `path`
    pub fn with_file(path: &Path, format: LogFormat) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut logger = Self::new(format);
        logger.file = Some(BufWriter::new(file));
        logger.path = Some(path.to_path_buf());
        Ok(logger)
    }

    /// Cap the in-memory buffer, dropping the oldest entries
    #[must_use]
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self.trim();
        self
    }

    pub fn log(&mut self, direction: Direction, data: &[u8]) {
        let entry = LogEntry::new(direction, data);

        if let Some(file) = self.file.as_mut() {
            let line = entry.render(self.format);
            if let Err(e) = writeln!(file, "{line}") {
                tracing::warn!(error = %e, "transcript write failed, disabling file output");
                self.file = None;
            }
        }

        self.bytes_logged += data.len() as u64;
        self.buffer.push_back(entry);
        self.trim();
    }

    pub fn log_rx(&mut self, data: &[u8]) {
        self.log(Direction::Rx, data);
    }

    pub fn log_tx(&mut self, data: &[u8]) {
        self.log(Direction::Tx, data);
    }

    pub fn log_info(&mut self, message: &str) {
        self.log(Direction::Info, message.as_bytes());
    }

    fn trim(&mut self) {
        while self.buffer.len() > self.max_entries {
            self.buffer.pop_front();
        }
    }

    /// Buffered entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn bytes_logged(&self) -> u64 {
        self.bytes_logged
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Render the whole buffer
    pub fn export(&self, format: LogFormat) -> String {
        self.buffer
            .iter()
            .map(|e| e.render(format) + "\n")
            .collect()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "transcript flush failed");
        }
    }
}

/// `<prefix>_<YYYYmmdd_HHMMSS>.<ext>`
pub fn transcript_filename(prefix: &str, format: LogFormat) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{prefix}_{timestamp}.{}", format.extension())
}
