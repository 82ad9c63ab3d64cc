//! Terminal screen buffer

/// Terminal mode flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScreenMode {
    /// Auto-wrap at the right margin (DECAWM)
    pub auto_wrap: bool,
    /// Newline mode (LF implies CR)
    pub newline: bool,
    /// Insert mode (IRM)
    pub insert: bool,
    /// Cursor visible (DECTCEM)
    pub cursor_visible: bool,
}

impl Default for ScreenMode {
    fn default() -> Self {
        Self {
            auto_wrap: true,
            newline: false,
            insert: false,
            cursor_visible: true,
        }
    }
}

/// Terminal screen buffer: a fixed grid of characters plus cursor
#[derive(Debug, Clone)]
pub struct Screen {
    cols: u16,
    rows: u16,
    /// Cell grid (row-major)
    cells: Vec<char>,
    cursor_row: u16,
    /// May equal `cols` while a wrap is pending
    cursor_col: u16,
    mode: ScreenMode,
    /// Scroll region, inclusive
    scroll_top: u16,
    scroll_bottom: u16,
    saved_cursor: (u16, u16),
}

impl Screen {
    /// Create a new screen buffer; zero dimensions are raised to 1
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            cells: vec![' '; usize::from(cols) * usize::from(rows)],
            cursor_row: 0,
            cursor_col: 0,
            mode: ScreenMode::default(),
            scroll_top: 0,
            scroll_bottom: rows - 1,
            saved_cursor: (0, 0),
        }
    }

    /// Resize, keeping the top-left content and a valid cursor
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let mut cells = vec![' '; usize::from(cols) * usize::from(rows)];

        let copy_cols = usize::from(self.cols.min(cols));
        for row in 0..usize::from(self.rows.min(rows)) {
            let old = row * usize::from(self.cols);
            let new = row * usize::from(cols);
            cells[new..new + copy_cols].copy_from_slice(&self.cells[old..old + copy_cols]);
        }

        self.cells = cells;
        self.cols = cols;
        self.rows = rows;
        self.cursor_row = self.cursor_row.min(rows - 1);
        self.cursor_col = self.cursor_col.min(cols - 1);
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.saved_cursor = (self.saved_cursor.0.min(rows - 1), self.saved_cursor.1.min(cols - 1));
    }

    fn index(&self, row: u16, col: u16) -> usize {
        usize::from(row) * usize::from(self.cols) + usize::from(col)
    }

    /// Character at position
    pub fn cell(&self, row: u16, col: u16) -> Option<char> {
        (row < self.rows && col < self.cols).then(|| self.cells[self.index(row, col)])
    }

    fn blank_range(&mut self, start: usize, end: usize) {
        self.cells[start..end].fill(' ');
    }

    /// Put a character at cursor position
    pub fn put_char(&mut self, c: char) {
        if self.cursor_col >= self.cols {
            if self.mode.auto_wrap {
                self.carriage_return();
                self.linefeed();
            } else {
                self.cursor_col = self.cols - 1;
            }
        }

        if self.mode.insert {
            self.insert_chars(1);
        }

        let idx = self.index(self.cursor_row, self.cursor_col);
        self.cells[idx] = c;
        self.cursor_col += 1;
    }

    /// Carriage return
    pub fn carriage_return(&mut self) {
        self.cursor_col = 0;
    }

    /// Line feed, scrolling at the bottom of the region
    pub fn linefeed(&mut self) {
        if self.mode.newline {
            self.carriage_return();
        }
        if self.cursor_row == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor_row < self.rows - 1 {
            self.cursor_row += 1;
        }
    }

    /// Reverse line feed
    pub fn reverse_linefeed(&mut self) {
        if self.cursor_row == self.scroll_top {
            self.scroll_down(1);
        } else {
            self.cursor_row = self.cursor_row.saturating_sub(1);
        }
    }

    /// Backspace (non-destructive)
    pub fn backspace(&mut self) {
        self.cursor_col = self.cursor_col.min(self.cols - 1).saturating_sub(1);
    }

    /// Move to next tab stop (every 8 columns)
    pub fn tab(&mut self) {
        let next = (self.cursor_col / 8 + 1) * 8;
        self.cursor_col = next.min(self.cols - 1);
    }

    /// Scroll the region up n lines (blank lines at bottom)
    pub fn scroll_up(&mut self, n: u16) {
        let height = self.scroll_bottom - self.scroll_top + 1;
        let n = usize::from(n.min(height));
        if n == 0 {
            return;
        }
        let cols = usize::from(self.cols);
        let top = usize::from(self.scroll_top) * cols;
        let bottom = (usize::from(self.scroll_bottom) + 1) * cols;
        self.cells.copy_within(top + n * cols..bottom, top);
        self.blank_range(bottom - n * cols, bottom);
    }

    /// Scroll the region down n lines (blank lines at top)
    pub fn scroll_down(&mut self, n: u16) {
        let height = self.scroll_bottom - self.scroll_top + 1;
        let n = usize::from(n.min(height));
        if n == 0 {
            return;
        }
        let cols = usize::from(self.cols);
        let top = usize::from(self.scroll_top) * cols;
        let bottom = (usize::from(self.scroll_bottom) + 1) * cols;
        self.cells.copy_within(top..bottom - n * cols, top + n * cols);
        self.blank_range(top, top + n * cols);
    }

    /// Cursor movement
    pub fn move_cursor_up(&mut self, n: u16) {
        self.cursor_row = self.cursor_row.saturating_sub(n);
    }

    pub fn move_cursor_down(&mut self, n: u16) {
        self.cursor_row = self.cursor_row.saturating_add(n).min(self.rows - 1);
    }

    pub fn move_cursor_left(&mut self, n: u16) {
        self.cursor_col = self.cursor_col.min(self.cols - 1).saturating_sub(n);
    }

    pub fn move_cursor_right(&mut self, n: u16) {
        self.cursor_col = self.cursor_col.saturating_add(n).min(self.cols - 1);
    }

    pub fn set_cursor_pos(&mut self, row: u16, col: u16) {
        self.cursor_row = row.min(self.rows - 1);
        self.cursor_col = col.min(self.cols - 1);
    }

    pub fn set_cursor_row(&mut self, row: u16) {
        self.cursor_row = row.min(self.rows - 1);
    }

    pub fn set_cursor_col(&mut self, col: u16) {
        self.cursor_col = col.min(self.cols - 1);
    }

    /// Erase from cursor to end of screen
    pub fn erase_below(&mut self) {
        let start = self.index(self.cursor_row, self.cursor_col.min(self.cols - 1));
        let end = self.cells.len();
        self.blank_range(start, end);
    }

    /// Erase from start of screen through cursor
    pub fn erase_above(&mut self) {
        let end = self.index(self.cursor_row, self.cursor_col.min(self.cols - 1)) + 1;
        self.blank_range(0, end);
    }

    pub fn erase_all(&mut self) {
        self.cells.fill(' ');
    }

    pub fn erase_line_right(&mut self) {
        let start = self.index(self.cursor_row, self.cursor_col.min(self.cols - 1));
        let end = self.index(self.cursor_row, 0) + usize::from(self.cols);
        self.blank_range(start, end);
    }

    pub fn erase_line_left(&mut self) {
        let start = self.index(self.cursor_row, 0);
        let end = self.index(self.cursor_row, self.cursor_col.min(self.cols - 1)) + 1;
        self.blank_range(start, end);
    }

    pub fn erase_line(&mut self) {
        let start = self.index(self.cursor_row, 0);
        self.blank_range(start, start + usize::from(self.cols));
    }

    pub fn erase_chars(&mut self, n: u16) {
        let col = self.cursor_col.min(self.cols - 1);
        let end_col = col.saturating_add(n).min(self.cols);
        let start = self.index(self.cursor_row, col);
        self.blank_range(start, start + usize::from(end_col - col));
    }

    /// Insert blank lines at the cursor, inside the scroll region
    pub fn insert_lines(&mut self, n: u16) {
        if self.cursor_row < self.scroll_top || self.cursor_row > self.scroll_bottom {
            return;
        }
        let old_top = self.scroll_top;
        self.scroll_top = self.cursor_row;
        self.scroll_down(n);
        self.scroll_top = old_top;
    }

    /// Delete lines at the cursor, inside the scroll region
    pub fn delete_lines(&mut self, n: u16) {
        if self.cursor_row < self.scroll_top || self.cursor_row > self.scroll_bottom {
            return;
        }
        let old_top = self.scroll_top;
        self.scroll_top = self.cursor_row;
        self.scroll_up(n);
        self.scroll_top = old_top;
    }

    pub fn insert_chars(&mut self, n: u16) {
        let col = usize::from(self.cursor_col.min(self.cols - 1));
        let cols = usize::from(self.cols);
        let n = usize::from(n).min(cols - col);
        let row = self.index(self.cursor_row, 0);
        self.cells.copy_within(row + col..row + cols - n, row + col + n);
        self.blank_range(row + col, row + col + n);
    }

    pub fn delete_chars(&mut self, n: u16) {
        let col = usize::from(self.cursor_col.min(self.cols - 1));
        let cols = usize::from(self.cols);
        let n = usize::from(n).min(cols - col);
        let row = self.index(self.cursor_row, 0);
        self.cells.copy_within(row + col + n..row + cols, row + col);
        self.blank_range(row + cols - n, row + cols);
    }

    /// Set scroll region (DECSTBM); homes the cursor
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let top = top.min(self.rows - 1);
        let bottom = bottom.min(self.rows - 1).max(top);
        self.scroll_top = top;
        self.scroll_bottom = bottom;
        self.cursor_row = 0;
        self.cursor_col = 0;
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = (self.cursor_row, self.cursor_col.min(self.cols - 1));
    }

    pub fn restore_cursor(&mut self) {
        let (row, col) = self.saved_cursor;
        self.set_cursor_pos(row, col);
    }

    /// Mutable mode flags
    pub fn mode_mut(&mut self) -> &mut ScreenMode {
        &mut self.mode
    }

    /// Getters
    pub fn mode(&self) -> ScreenMode {
        self.mode
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Cursor `(row, col)`; col equals `cols` while a wrap is pending
    pub fn cursor_pos(&self) -> (u16, u16) {
        (self.cursor_row, self.cursor_col)
    }

    /// Row characters, padded to full width
    pub fn row(&self, row: u16) -> &[char] {
        if row >= self.rows {
            return &[];
        }
        let start = self.index(row, 0);
        &self.cells[start..start + usize::from(self.cols)]
    }

    /// Row as string, padding kept
    pub fn line_text(&self, row: u16) -> String {
        self.row(row).iter().collect()
    }

    /// All rows joined by `\n`, padding kept
    pub fn content(&self) -> String {
        (0..self.rows)
            .map(|row| self.line_text(row))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(screen: &mut Screen, text: &str) {
        for c in text.chars() {
            screen.put_char(c);
        }
    }

    #[test]
    fn test_put_and_wrap() {
        let mut screen = Screen::new(4, 3);
        write(&mut screen, "abcdef");
        assert_eq!(screen.line_text(0), "abcd");
        assert_eq!(screen.line_text(1), "ef  ");
        assert_eq!(screen.cursor_pos(), (1, 2));
    }

    #[test]
    fn test_pending_wrap_keeps_cursor_past_margin() {
        let mut screen = Screen::new(4, 2);
        write(&mut screen, "abcd");
        assert_eq!(screen.cursor_pos(), (0, 4));
        screen.put_char('e');
        assert_eq!(screen.cursor_pos(), (1, 1));
    }

    #[test]
    fn test_scroll_at_bottom() {
        let mut screen = Screen::new(3, 2);
        write(&mut screen, "one");
        screen.carriage_return();
        screen.linefeed();
        write(&mut screen, "two");
        screen.carriage_return();
        screen.linefeed();
        write(&mut screen, "3");
        assert_eq!(screen.content(), "two\n3  ");
    }

    #[test]
    fn test_erase_line_right() {
        let mut screen = Screen::new(5, 1);
        write(&mut screen, "hello");
        screen.set_cursor_col(2);
        screen.erase_line_right();
        assert_eq!(screen.line_text(0), "he   ");
    }

    #[test]
    fn test_insert_delete_chars() {
        let mut screen = Screen::new(5, 1);
        write(&mut screen, "abcde");
        screen.set_cursor_col(1);
        screen.delete_chars(2);
        assert_eq!(screen.line_text(0), "ade  ");
        screen.insert_chars(10);
        assert_eq!(screen.line_text(0), "a    ");
    }

    #[test]
    fn test_resize_keeps_cursor_valid() {
        let mut screen = Screen::new(10, 5);
        screen.set_cursor_pos(4, 9);
        write(&mut screen, "x");
        screen.resize(4, 2);
        let (row, col) = screen.cursor_pos();
        assert!(row < 2 && col < 4);
        screen.resize(0, 0);
        assert_eq!((screen.cols(), screen.rows()), (1, 1));
    }

    #[test]
    fn test_scroll_region() {
        let mut screen = Screen::new(2, 3);
        for (row, text) in ["aa", "bb", "cc"].iter().enumerate() {
            screen.set_cursor_pos(row as u16, 0);
            write(&mut screen, text);
        }
        screen.set_scroll_region(1, 2);
        screen.scroll_up(1);
        assert_eq!(screen.content(), "aa\ncc\n  ");
    }
}
