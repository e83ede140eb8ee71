//! Headless terminal mirror.
//!
//! Every byte a session emits is fed into a [`Mirror`] so the engine can
//! read back logical lines for question extraction and serialize the main
//! buffer for persistence. The mirror keeps text only.

mod grid;

use grid::{Grid, MainBuffer, Row};
use std::collections::VecDeque;

pub struct Mirror {
    parser: vte::Parser,
    grid: Grid,
}

impl Mirror {
    pub fn new(cols: u16, rows: u16, scrollback: usize) -> Self {
        Self {
            parser: vte::Parser::new(),
            grid: Grid::new(cols, rows, scrollback),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.parser.advance(&mut self.grid, data);
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.grid.resize(cols, rows);
    }

    /// Replay a blob produced by [`Mirror::serialize`]
    pub fn restore(&mut self, blob: &str) {
        self.write(blob.as_bytes());
    }

    /// Encode the main buffer (scrollback plus screen) as a byte stream that
    /// reproduces its text and cursor position when written to a fresh
    /// terminal of the same size.
    pub fn serialize(&self) -> String {
        let MainBuffer {
            lines,
            cursor_row,
            cursor_col,
            pending_wrap,
        } = self.grid.main_buffer();
        let end = content_end(lines).max(cursor_row + 1).min(lines.len());

        let mut out = String::new();
        for y in 0..end {
            let row = &lines[y];
            if y > 0 && !row.wrapped {
                out.push_str("\r\n");
            }
            // Rows that continue onto the next keep their trailing blanks so
            // replay wraps at the same place.
            if y + 1 < end && lines[y + 1].wrapped {
                out.push_str(&row.full_text());
            } else {
                out.push_str(&row.text());
            }
        }

        let screen_top = end.saturating_sub(self.grid.rows());
        out.push_str(&format!(
            "\x1b[{};{}H",
            cursor_row.saturating_sub(screen_top) + 1,
            cursor_col + 1
        ));
        // A cursor move clears the pending wrap, so reprint the last cell to
        // make the next byte wrap the way it would have live.
        if pending_wrap {
            out.push(lines[cursor_row].cell(cursor_col));
        }
        out
    }

    /// Last `count` logical lines of the active buffer ending at the last
    /// non-blank row. Soft-wrapped rows are joined, so a line is never cut
    /// at the window edge. Blank lines count toward `count` but are omitted.
    pub fn read_lines(&self, count: usize) -> Vec<String> {
        logical_lines(self.grid.active_lines(), count)
    }

    /// Visible screen rows, right-trimmed
    pub fn screen_lines(&self) -> Vec<String> {
        self.grid.screen().map(Row::text).collect()
    }
}

fn content_end(lines: &VecDeque<Row>) -> usize {
    lines
        .iter()
        .rposition(|row| !row.is_blank())
        .map(|idx| idx + 1)
        .unwrap_or(0)
}

fn logical_lines(lines: &VecDeque<Row>, count: usize) -> Vec<String> {
    let mut result = Vec::new();
    let mut taken = 0;
    let mut end = content_end(lines);

    while end > 0 && taken < count {
        let mut start = end - 1;
        while start > 0 && lines[start].wrapped {
            start -= 1;
        }
        let text = join_rows(lines, start, end);
        if !text.trim().is_empty() {
            result.push(text);
        }
        taken += 1;
        end = start;
    }
    result.reverse();
    result
}

/// Text of rows `start..end`, where every row after the first is a soft-wrap
/// continuation. Inner rows keep their trailing blanks.
fn join_rows(lines: &VecDeque<Row>, start: usize, end: usize) -> String {
    let mut text = String::new();
    for y in start..end {
        if y + 1 < end {
            text.push_str(&lines[y].full_text());
        } else {
            text.push_str(&lines[y].text());
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines() {
        let mut mirror = Mirror::new(40, 5, 100);
        mirror.write(b"hello\r\nworld\r\n$ ");
        assert_eq!(mirror.read_lines(10), vec!["hello", "world", "$"]);
    }

    #[test]
    fn test_soft_wrap_joins_rows() {
        let mut mirror = Mirror::new(10, 5, 100);
        mirror.write(b"Do you want to proceed?\r\nok");
        assert_eq!(mirror.read_lines(10), vec!["Do you want to proceed?", "ok"]);
    }

    #[test]
    fn test_cursor_movement_and_erase() {
        let mut mirror = Mirror::new(20, 4, 0);
        mirror.write(b"first\r\nsecond\x1b[1A\x1b[2K\rreplaced");
        assert_eq!(mirror.read_lines(10), vec!["replaced", "second"]);

        mirror.write(b"\x1b[H\x1b[2J");
        assert!(mirror.read_lines(10).is_empty());
    }

    #[test]
    fn test_scrollback_limit() {
        let mut mirror = Mirror::new(20, 3, 2);
        for i in 0..10 {
            mirror.write(format!("line {}\r\n", i).as_bytes());
        }
        // 2 scrollback rows + 3 screen rows, the last being blank
        assert_eq!(mirror.read_lines(100), vec!["line 6", "line 7", "line 8", "line 9"]);
    }

    #[test]
    fn test_alternate_screen_is_not_serialized() {
        let mut mirror = Mirror::new(20, 4, 100);
        mirror.write(b"shell output\r\n$ ");
        mirror.write(b"\x1b[?1049h\x1b[Hfull screen app");
        assert_eq!(mirror.read_lines(5), vec!["full screen app"]);

        let blob = mirror.serialize();
        assert!(blob.contains("shell output"));
        assert!(!blob.contains("full screen app"));

        mirror.write(b"\x1b[?1049l");
        assert_eq!(mirror.read_lines(5), vec!["shell output", "$"]);
    }

    #[test]
    fn test_serialize_restore_round_trip() {
        let mut source = Mirror::new(20, 5, 1000);
        source.write(b"line1\r\nline2\r\n");
        source.write(&[b'x'; 50]);
        source.write("\r\nDo you want to proceed?\r\n\x1b[32m❯ 1. Yes\x1b[0m\r\n  2. No\r\n$ ".as_bytes());

        let blob = source.serialize();
        let mut restored = Mirror::new(20, 5, 1000);
        restored.restore(&blob);

        assert_eq!(source.read_lines(30), restored.read_lines(30));
        assert_eq!(
            restored.read_lines(4),
            vec!["Do you want to proceed?", "❯ 1. Yes", "  2. No", "$"]
        );

        // Output after restore lands where the cursor was left
        source.write(b"ls");
        restored.write(b"ls");
        assert_eq!(source.read_lines(30), restored.read_lines(30));
    }

    #[test]
    fn test_window_starting_mid_wrap_keeps_whole_line() {
        let mut mirror = Mirror::new(10, 10, 100);
        mirror.write("Do you want to proceed?\r\n❯ 1. Yes\r\n".as_bytes());

        let lines = mirror.read_lines(2);
        assert_eq!(lines, vec!["Do you want to proceed?", "❯ 1. Yes"]);
        assert_eq!(
            crate::status::extract_question(&lines, ""),
            "Do you want to proceed?\n→ 1. Yes"
        );
        assert_eq!(mirror.read_lines(1), vec!["❯ 1. Yes"]);
    }

    #[test]
    fn test_restore_keeps_pending_wrap_on_full_row() {
        let mut source = Mirror::new(5, 3, 100);
        source.write(b"abcde");

        let mut restored = Mirror::new(5, 3, 100);
        restored.restore(&source.serialize());

        source.write(b"X");
        restored.write(b"X");
        assert_eq!(source.read_lines(10), vec!["abcdeX"]);
        assert_eq!(restored.read_lines(10), vec!["abcdeX"]);
    }

    #[test]
    fn test_pending_wrap_survives_alternate_screen() {
        let mut mirror = Mirror::new(5, 3, 100);
        mirror.write(b"abcde\x1b[?1049hvim\x1b[?1049l");
        mirror.write(b"X");
        assert_eq!(mirror.read_lines(10), vec!["abcdeX"]);
    }

    #[test]
    fn test_resize_keeps_content() {
        let mut mirror = Mirror::new(20, 6, 100);
        mirror.write(b"a\r\nb\r\nc");
        mirror.resize(30, 3);
        assert_eq!(mirror.read_lines(10), vec!["a", "b", "c"]);
        mirror.write(b"\r\nd");
        assert_eq!(mirror.read_lines(10), vec!["a", "b", "c", "d"]);
        assert_eq!(mirror.screen_lines().len(), 3);
    }
}
