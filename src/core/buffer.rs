//! Screen history and idle detection
//!
//! Idleness is measured as time since the screen *content* last changed, not
//! time since the last byte arrived: a remote that keeps re-rendering the
//! same screen is still idle.

use crate::core::terminal::Snapshot;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default number of snapshots kept per session
pub const DEFAULT_CAPACITY: usize = 50;

/// A snapshot with arrival timing
#[derive(Debug, Clone)]
pub struct BufferedSnapshot {
    /// The snapshot
    pub snapshot: Snapshot,
    /// When it was added
    pub received_at: Instant,
    /// When this content first appeared
    pub changed_at: Instant,
    /// `received_at - changed_at`
    pub since_change: Duration,
}

/// Bounded, oldest-evicted-first history of snapshots
#[derive(Debug)]
pub struct BufferManager {
    entries: VecDeque<BufferedSnapshot>,
    capacity: usize,
}

impl BufferManager {
    /// Create a buffer holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a snapshot stamped with the current time
    pub fn add_screen(&mut self, snapshot: Snapshot) -> &BufferedSnapshot {
        self.add_screen_at(snapshot, Instant::now())
    }

    /// Add a snapshot stamped with `at`
    pub fn add_screen_at(&mut self, snapshot: Snapshot, at: Instant) -> &BufferedSnapshot {
        let changed_at = match self.entries.back() {
            Some(prev) if prev.snapshot.hash == snapshot.hash => prev.changed_at,
            _ => at,
        };

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BufferedSnapshot {
            snapshot,
            received_at: at,
            changed_at,
            since_change: at.saturating_duration_since(changed_at),
        });

        // Just pushed
        &self.entries[self.entries.len() - 1]
    }

    /// True once the latest content has been unchanged for `threshold`
    pub fn detect_idle_state(&self, threshold: Duration) -> bool {
        self.entries
            .back()
            .is_some_and(|latest| latest.since_change >= threshold)
    }

    /// Last `n` entries, most recent last
    pub fn get_recent(&self, n: usize) -> Vec<&BufferedSnapshot> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&BufferedSnapshot> {
        self.entries.back()
    }

    /// When the current content first appeared
    pub fn last_change_at(&self) -> Option<Instant> {
        self.entries.back().map(|e| e.changed_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
