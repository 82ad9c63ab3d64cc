//! Terminal emulation module
//!
//! Provides the minimal VT100/ANSI emulation BBS screens need:
//! - CSI cursor movement and positioning
//! - Erase, insert/delete and scrolling regions
//! - SGR accepted and discarded (no colors are kept)
//! - Snapshots with prompt-relevant cursor metadata

mod parser;
mod screen;
mod snapshot;

pub use parser::{cp437_char, AnsiEvent, AnsiParser};
pub use screen::{Screen, ScreenMode};
pub use snapshot::{content_hash, CursorPos, Snapshot};

/// Terminal size
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TerminalSize {
    /// Columns (width)
    pub cols: u16,
    /// Rows (height)
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl TerminalSize {
    /// Create new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// Terminal emulator state
#[derive(Debug)]
pub struct Terminal {
    screen: Screen,
    parser: AnsiParser,
    size: TerminalSize,
}

impl Terminal {
    /// Create a new terminal with default size
    pub fn new() -> Self {
        Self::with_size(TerminalSize::default())
    }

    /// Create a terminal with specific size
    pub fn with_size(size: TerminalSize) -> Self {
        Self {
            screen: Screen::new(size.cols, size.rows),
            parser: AnsiParser::new(),
            size,
        }
    }

    /// Feed raw bytes into the screen
    pub fn process(&mut self, data: &[u8]) {
        for event in self.parser.parse(data) {
            match event {
                AnsiEvent::Print(c) => self.screen.put_char(c),
                AnsiEvent::Control(byte) => self.handle_control(byte),
                AnsiEvent::Csi { params, private, action, .. } => {
                    self.handle_csi(&params, private, action);
                }
                AnsiEvent::Esc { intermediates, action } => {
                    if intermediates.is_empty() {
                        self.handle_esc(action);
                    }
                }
            }
        }
    }

    fn handle_control(&mut self, byte: u8) {
        match byte {
            0x08 => self.screen.backspace(),
            0x09 => self.screen.tab(),
            0x0A | 0x0B => self.screen.linefeed(),
            // Form feed clears the screen on BBS software
            0x0C => {
                self.screen.erase_all();
                self.screen.set_cursor_pos(0, 0);
            }
            0x0D => self.screen.carriage_return(),
            _ => {}
        }
    }

    fn handle_csi(&mut self, params: &[u16], private: Option<u8>, action: u8) {
        // Parameters with defaults; an explicit 0 counts as the default
        let param = |idx: usize, default: u16| -> u16 {
            params.get(idx).copied().filter(|&p| p != 0).unwrap_or(default)
        };
        let mode = |idx: usize| params.get(idx).copied().unwrap_or(0);

        if private == Some(b'?') {
            if matches!(action, b'h' | b'l') {
                self.handle_dec_mode(params, action == b'h');
            }
            return;
        }

        let screen = &mut self.screen;
        match action {
            b'A' => screen.move_cursor_up(param(0, 1)),
            b'B' | b'e' => screen.move_cursor_down(param(0, 1)),
            b'C' | b'a' => screen.move_cursor_right(param(0, 1)),
            b'D' => screen.move_cursor_left(param(0, 1)),
            b'E' => {
                screen.move_cursor_down(param(0, 1));
                screen.carriage_return();
            }
            b'F' => {
                screen.move_cursor_up(param(0, 1));
                screen.carriage_return();
            }
            b'G' | b'`' => screen.set_cursor_col(param(0, 1) - 1),
            b'H' | b'f' => screen.set_cursor_pos(param(0, 1) - 1, param(1, 1) - 1),
            b'd' => screen.set_cursor_row(param(0, 1) - 1),
            b'J' => match mode(0) {
                0 => screen.erase_below(),
                1 => screen.erase_above(),
                2 | 3 => {
                    // ANSI.SYS homes the cursor on ED 2; BBS art relies on it
                    screen.erase_all();
                    screen.set_cursor_pos(0, 0);
                }
                _ => {}
            },
            b'K' => match mode(0) {
                0 => screen.erase_line_right(),
                1 => screen.erase_line_left(),
                2 => screen.erase_line(),
                _ => {}
            },
            b'L' => screen.insert_lines(param(0, 1)),
            b'M' => screen.delete_lines(param(0, 1)),
            b'P' => screen.delete_chars(param(0, 1)),
            b'@' => screen.insert_chars(param(0, 1)),
            b'X' => screen.erase_chars(param(0, 1)),
            b'S' => screen.scroll_up(param(0, 1)),
            b'T' => screen.scroll_down(param(0, 1)),
            b'r' => {
                let bottom = param(1, self.size.rows);
                screen.set_scroll_region(param(0, 1) - 1, bottom.saturating_sub(1));
            }
            b's' => screen.save_cursor(),
            b'u' => screen.restore_cursor(),
            b'h' | b'l' => {
                let set = action == b'h';
                for &p in params {
                    match p {
                        4 => screen.mode_mut().insert = set,
                        20 => screen.mode_mut().newline = set,
                        _ => {}
                    }
                }
            }
            // SGR and device queries carry nothing the grid keeps
            b'm' | b'n' | b'c' => {}
            _ => {
                tracing::trace!(?params, action = %char::from(action), "unhandled CSI");
            }
        }
    }

    fn handle_dec_mode(&mut self, params: &[u16], set: bool) {
        for &p in params {
            match p {
                7 => self.screen.mode_mut().auto_wrap = set,
                25 => self.screen.mode_mut().cursor_visible = set,
                _ => {}
            }
        }
    }

    fn handle_esc(&mut self, action: u8) {
        match action {
            b'7' => self.screen.save_cursor(),
            b'8' => self.screen.restore_cursor(),
            b'D' => self.screen.linefeed(),
            b'E' => {
                self.screen.carriage_return();
                self.screen.linefeed();
            }
            b'M' => self.screen.reverse_linefeed(),
            b'c' => self.reset(),
            _ => {}
        }
    }

    /// Reset terminal to initial state
    pub fn reset(&mut self) {
        self.screen = Screen::new(self.size.cols, self.size.rows);
        self.parser = AnsiParser::new();
    }

    /// Resize the terminal, truncating or padding content
    pub fn resize(&mut self, size: TerminalSize) {
        self.size = size;
        self.screen.resize(size.cols, size.rows);
    }

    /// Derive a snapshot of the current grid
    pub fn get_snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.screen)
    }

    /// Get the screen buffer
    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// Get terminal size
    pub fn size(&self) -> TerminalSize {
        self.size
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}
