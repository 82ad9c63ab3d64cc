//! Point-in-time screen snapshots

use super::screen::Screen;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cursor position, 0-indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorPos {
    /// Row
    pub row: u16,
    /// Column
    pub col: u16,
}

/// Immutable rendering of the screen plus the metadata prompt detection
/// relies on.
///
/// `text` keeps every row padded to full width; use [`Snapshot::trimmed_lines`]
/// when padding gets in the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Rows joined by `\n`
    pub text: String,
    /// Hex SHA-256 of `text`
    pub hash: String,
    /// Cursor position
    pub cursor: CursorPos,
    /// Width
    pub cols: u16,
    /// Height
    pub rows: u16,
    /// Nothing non-blank follows the cursor and it sits on the last
    /// non-blank row
    pub cursor_at_end: bool,
    /// A space sits immediately left of the cursor after row content
    pub has_trailing_space: bool,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

/// Hex SHA-256 of screen text
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn content_len(row: &[char]) -> usize {
    row.iter().rposition(|c| !c.is_whitespace()).map_or(0, |i| i + 1)
}

/// Derive `(cursor_at_end, has_trailing_space)` from row content
fn cursor_flags(rows: &[&[char]], cursor: (usize, usize)) -> (bool, bool) {
    let (row, col) = cursor;
    let Some(last_row) = rows.iter().rposition(|r| content_len(r) > 0) else {
        return (false, false);
    };

    let cursor_at_end = row == last_row && col >= content_len(rows[row]);

    let has_trailing_space = rows.get(row).is_some_and(|r| {
        let before = &r[..col.min(r.len())];
        before.last() == Some(&' ') && content_len(before) > 0
    });

    (cursor_at_end, has_trailing_space)
}

impl Snapshot {
    /// Capture the current state of a screen
    pub fn capture(screen: &Screen) -> Self {
        let text = screen.content();
        let (row, col) = screen.cursor_pos();
        let rows: Vec<&[char]> = (0..screen.rows()).map(|r| screen.row(r)).collect();
        let (cursor_at_end, has_trailing_space) =
            cursor_flags(&rows, (usize::from(row), usize::from(col)));

        Self {
            hash: content_hash(&text),
            text,
            cursor: CursorPos {
                row,
                col: col.min(screen.cols().saturating_sub(1)),
            },
            cols: screen.cols(),
            rows: screen.rows(),
            cursor_at_end,
            has_trailing_space,
            captured_at: Utc::now(),
        }
    }

    /// Build a snapshot from plain text with the cursor placed right after
    /// the last non-blank character, or on a fresh line below it when
    /// `cursor_at_end` is false. Used for offline classification.
    pub fn from_text(text: &str, cursor_at_end: bool) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        let last = lines.iter().rposition(|l| !l.trim().is_empty()).unwrap_or(0);
        let cols = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0).max(1);
        let (cursor, rows) = if cursor_at_end {
            let col = lines.get(last).map_or(0, |l| l.chars().count());
            (CursorPos { row: last as u16, col: col as u16 }, lines.len().max(1))
        } else {
            (CursorPos { row: last as u16 + 1, col: 0 }, lines.len().max(last + 2))
        };
        let has_trailing_space = cursor_at_end
            && lines
                .get(last)
                .is_some_and(|l| l.ends_with(' ') && !l.trim().is_empty());

        Self {
            hash: content_hash(text),
            text: text.to_string(),
            cursor,
            cols: cols as u16,
            rows: rows as u16,
            cursor_at_end,
            has_trailing_space,
            captured_at: Utc::now(),
        }
    }

    /// Rows with padding removed
    pub fn trimmed_lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines().map(str::trim_end)
    }

    /// Last row with visible content, trimmed
    pub fn last_line(&self) -> &str {
        self.trimmed_lines().filter(|l| !l.is_empty()).last().unwrap_or("")
    }

    /// True if no row has visible content
    pub fn is_blank(&self) -> bool {
        self.text.chars().all(char::is_whitespace)
    }
}
