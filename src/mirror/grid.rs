//! Minimal terminal grid: cursor, scrollback, soft-wrap flags and an
//! alternate screen. Colors and attributes are dropped; only text survives.

use std::collections::VecDeque;
use vte::{Params, Perform};

const TAB_WIDTH: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Row {
    cells: Vec<char>,
    /// Continuation of the previous row (soft wrap)
    pub(crate) wrapped: bool,
}

impl Row {
    fn set(&mut self, col: usize, c: char) {
        if self.cells.len() <= col {
            self.cells.resize(col + 1, ' ');
        }
        self.cells[col] = c;
    }

    fn erase(&mut self, from: usize, to: usize) {
        let to = to.min(self.cells.len());
        for cell in self.cells.iter_mut().take(to).skip(from) {
            *cell = ' ';
        }
    }

    pub(crate) fn cell(&self, col: usize) -> char {
        self.cells.get(col).copied().unwrap_or(' ')
    }

    pub(crate) fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| *c == ' ')
    }

    /// All cells, trailing blanks included
    pub(crate) fn full_text(&self) -> String {
        self.cells.iter().collect()
    }

    pub(crate) fn text(&self) -> String {
        self.full_text().trim_end().to_string()
    }
}

#[derive(Debug, Clone)]
struct SavedScreen {
    lines: VecDeque<Row>,
    cursor: (usize, usize),
    pending_wrap: bool,
}

/// Borrowed view of the main screen used for serialization
pub(crate) struct MainBuffer<'a> {
    pub(crate) lines: &'a VecDeque<Row>,
    pub(crate) cursor_row: usize,
    pub(crate) cursor_col: usize,
    /// The last print filled the final column; the next one wraps first
    pub(crate) pending_wrap: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Grid {
    cols: usize,
    rows: usize,
    scrollback: usize,
    /// Scrollback followed by the `rows` screen rows
    lines: VecDeque<Row>,
    row: usize,
    col: usize,
    pending_wrap: bool,
    saved_cursor: (usize, usize),
    scroll_top: usize,
    scroll_bottom: usize,
    /// Main screen while the alternate screen is active
    main: Option<SavedScreen>,
}

impl Grid {
    pub(crate) fn new(cols: u16, rows: u16, scrollback: usize) -> Self {
        let cols = usize::from(cols.max(1));
        let rows = usize::from(rows.max(1));
        Self {
            cols,
            rows,
            scrollback,
            lines: std::iter::repeat_with(Row::default).take(rows).collect(),
            row: 0,
            col: 0,
            pending_wrap: false,
            saved_cursor: (0, 0),
            scroll_top: 0,
            scroll_bottom: rows - 1,
            main: None,
        }
    }

    fn screen_start(&self) -> usize {
        self.lines.len() - self.rows
    }

    fn current(&mut self) -> &mut Row {
        let idx = self.screen_start() + self.row;
        &mut self.lines[idx]
    }

    /// Rows of the main buffer and its cursor, with the row made absolute
    pub(crate) fn main_buffer(&self) -> MainBuffer<'_> {
        match &self.main {
            Some(saved) => {
                let start = saved.lines.len() - self.rows.min(saved.lines.len());
                MainBuffer {
                    lines: &saved.lines,
                    cursor_row: start + saved.cursor.0,
                    cursor_col: saved.cursor.1,
                    pending_wrap: saved.pending_wrap,
                }
            }
            None => MainBuffer {
                lines: &self.lines,
                cursor_row: self.screen_start() + self.row,
                cursor_col: self.col,
                pending_wrap: self.pending_wrap,
            },
        }
    }

    pub(crate) fn active_lines(&self) -> &VecDeque<Row> {
        &self.lines
    }

    pub(crate) fn screen(&self) -> impl Iterator<Item = &Row> {
        self.lines.iter().skip(self.screen_start())
    }

    pub(crate) fn rows(&self) -> usize {
        self.rows
    }

    fn is_full_region(&self) -> bool {
        self.scroll_top == 0 && self.scroll_bottom == self.rows - 1
    }

    fn scroll_up(&mut self, n: usize) {
        for _ in 0..n {
            if self.is_full_region() {
                self.lines.push_back(Row::default());
                let cap = if self.main.is_some() {
                    self.rows
                } else {
                    self.rows + self.scrollback
                };
                while self.lines.len() > cap {
                    self.lines.pop_front();
                }
            } else {
                let start = self.screen_start();
                self.lines.remove(start + self.scroll_top);
                self.lines.insert(start + self.scroll_bottom, Row::default());
            }
        }
    }

    fn scroll_down(&mut self, n: usize) {
        let start = self.screen_start();
        for _ in 0..n {
            self.lines.remove(start + self.scroll_bottom);
            self.lines.insert(start + self.scroll_top, Row::default());
        }
    }

    fn linefeed(&mut self) {
        if self.row == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.row + 1 < self.rows {
            self.row += 1;
        }
    }

    fn reverse_index(&mut self) {
        if self.row == self.scroll_top {
            self.scroll_down(1);
        } else {
            self.row = self.row.saturating_sub(1);
        }
    }

    fn goto(&mut self, row: usize, col: usize) {
        self.row = row.min(self.rows - 1);
        self.col = col.min(self.cols - 1);
        self.pending_wrap = false;
    }

    fn erase_display(&mut self, mode: u16) {
        let start = self.screen_start();
        let (row, col) = (self.row, self.col);
        match mode {
            0 => {
                self.current().erase(col, usize::MAX);
                for r in (start + row + 1)..self.lines.len() {
                    self.lines[r] = Row::default();
                }
            }
            1 => {
                for r in start..(start + row) {
                    self.lines[r] = Row::default();
                }
                self.current().erase(0, col + 1);
            }
            2 => {
                for r in start..self.lines.len() {
                    self.lines[r] = Row::default();
                }
            }
            3 => {
                self.lines.drain(..start);
            }
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: u16) {
        let col = self.col;
        let row = self.current();
        match mode {
            0 => row.erase(col, usize::MAX),
            1 => row.erase(0, col + 1),
            2 => *row = Row::default(),
            _ => {}
        }
    }

    fn insert_lines(&mut self, n: usize) {
        if self.row < self.scroll_top || self.row > self.scroll_bottom {
            return;
        }
        let start = self.screen_start();
        for _ in 0..n.min(self.scroll_bottom - self.row + 1) {
            self.lines.remove(start + self.scroll_bottom);
            self.lines.insert(start + self.row, Row::default());
        }
    }

    fn delete_lines(&mut self, n: usize) {
        if self.row < self.scroll_top || self.row > self.scroll_bottom {
            return;
        }
        let start = self.screen_start();
        for _ in 0..n.min(self.scroll_bottom - self.row + 1) {
            self.lines.remove(start + self.row);
            self.lines.insert(start + self.scroll_bottom, Row::default());
        }
    }

    fn delete_chars(&mut self, n: usize) {
        let col = self.col;
        let row = self.current();
        if col < row.cells.len() {
            let end = (col + n).min(row.cells.len());
            row.cells.drain(col..end);
        }
    }

    fn insert_chars(&mut self, n: usize) {
        let col = self.col;
        let row = self.current();
        if col < row.cells.len() {
            for _ in 0..n {
                row.cells.insert(col, ' ');
            }
        }
    }

    fn set_alternate(&mut self, on: bool) {
        match (on, self.main.is_some()) {
            (true, false) => {
                let blank = std::iter::repeat_with(Row::default).take(self.rows).collect();
                let lines = std::mem::replace(&mut self.lines, blank);
                self.main = Some(SavedScreen {
                    lines,
                    cursor: (self.row, self.col),
                    pending_wrap: self.pending_wrap,
                });
                self.goto(0, 0);
            }
            (false, true) => {
                if let Some(saved) = self.main.take() {
                    self.lines = saved.lines;
                    self.fit_rows();
                    self.goto(saved.cursor.0, saved.cursor.1);
                    self.pending_wrap = saved.pending_wrap;
                }
            }
            _ => {}
        }
    }

    /// Keep at least `rows` rows so the screen slice is always valid
    fn fit_rows(&mut self) {
        while self.lines.len() < self.rows {
            self.lines.push_back(Row::default());
        }
    }

    fn reset(&mut self) {
        *self = Grid::new(self.cols as u16, self.rows as u16, self.scrollback);
    }

    pub(crate) fn resize(&mut self, cols: u16, rows: u16) {
        let cols = usize::from(cols.max(1));
        let rows = usize::from(rows.max(1));

        if self.main.is_some() {
            // The alternate screen is transient; rebuild it blank
            self.lines = std::iter::repeat_with(Row::default).take(rows).collect();
            self.rows = rows;
            self.cols = cols;
            self.scroll_top = 0;
            self.scroll_bottom = rows - 1;
            self.goto(0, 0);
            return;
        }

        let cursor_abs = self.screen_start() + self.row;
        if rows < self.rows {
            let mut excess = self.rows - rows;
            while excess > 0
                && self.lines.len() > cursor_abs + 1
                && self.lines.back().is_some_and(Row::is_blank)
            {
                self.lines.pop_back();
                excess -= 1;
            }
        } else {
            for _ in self.rows..rows {
                self.lines.push_back(Row::default());
            }
        }

        self.rows = rows;
        self.cols = cols;
        self.fit_rows();
        let start = self.screen_start();
        self.row = cursor_abs.saturating_sub(start).min(rows - 1);
        self.col = self.col.min(cols - 1);
        self.pending_wrap = false;
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
    }
}

fn arg(params: &[u16], idx: usize, default: usize) -> usize {
    match params.get(idx) {
        Some(&v) if v > 0 => usize::from(v),
        _ => default,
    }
}

impl Perform for Grid {
    fn print(&mut self, c: char) {
        if self.pending_wrap {
            self.pending_wrap = false;
            self.col = 0;
            self.linefeed();
            self.current().wrapped = true;
        }
        let col = self.col;
        self.current().set(col, c);
        if self.col + 1 >= self.cols {
            self.pending_wrap = true;
        } else {
            self.col += 1;
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | 0x0b | 0x0c => {
                self.pending_wrap = false;
                self.linefeed();
            }
            b'\r' => {
                self.col = 0;
                self.pending_wrap = false;
            }
            0x08 => {
                self.col = self.col.saturating_sub(1);
                self.pending_wrap = false;
            }
            b'\t' => {
                self.col = ((self.col / TAB_WIDTH + 1) * TAB_WIDTH).min(self.cols - 1);
            }
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if ignore {
            return;
        }
        let p: Vec<u16> = params.iter().map(|sub| sub.first().copied().unwrap_or(0)).collect();
        let private = intermediates.contains(&b'?');
        let n = arg(&p, 0, 1);

        match (action, private) {
            ('A', false) => self.goto(self.row.saturating_sub(n), self.col),
            ('B', false) | ('e', false) => self.goto(self.row + n, self.col),
            ('C', false) | ('a', false) => self.goto(self.row, self.col + n),
            ('D', false) => self.goto(self.row, self.col.saturating_sub(n)),
            ('E', false) => self.goto(self.row + n, 0),
            ('F', false) => self.goto(self.row.saturating_sub(n), 0),
            ('G', false) | ('`', false) => self.goto(self.row, n - 1),
            ('d', false) => self.goto(n - 1, self.col),
            ('H', false) | ('f', false) => self.goto(n - 1, arg(&p, 1, 1) - 1),
            ('J', false) => self.erase_display(p.first().copied().unwrap_or(0)),
            ('K', false) => self.erase_line(p.first().copied().unwrap_or(0)),
            ('L', false) => self.insert_lines(n),
            ('M', false) => self.delete_lines(n),
            ('P', false) => self.delete_chars(n),
            ('@', false) => self.insert_chars(n),
            ('X', false) => {
                let col = self.col;
                self.current().erase(col, col + n);
            }
            ('S', false) => self.scroll_up(n),
            ('T', false) => self.scroll_down(n),
            ('r', false) => {
                let top = arg(&p, 0, 1) - 1;
                let bottom = arg(&p, 1, self.rows).min(self.rows) - 1;
                if top < bottom {
                    self.scroll_top = top;
                    self.scroll_bottom = bottom;
                    self.goto(0, 0);
                }
            }
            ('s', false) => self.saved_cursor = (self.row, self.col),
            ('u', false) => self.goto(self.saved_cursor.0, self.saved_cursor.1),
            ('h', true) | ('l', true) => {
                if p.iter().any(|m| matches!(m, 47 | 1047 | 1049)) {
                    self.set_alternate(action == 'h');
                }
            }
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], ignore: bool, byte: u8) {
        if ignore || !intermediates.is_empty() {
            return;
        }
        match byte {
            b'7' => self.saved_cursor = (self.row, self.col),
            b'8' => self.goto(self.saved_cursor.0, self.saved_cursor.1),
            b'D' => self.linefeed(),
            b'E' => {
                self.linefeed();
                self.col = 0;
            }
            b'M' => self.reverse_index(),
            b'c' => self.reset(),
            _ => {}
        }
    }
}
