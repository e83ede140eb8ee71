use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::actions::Action;
use crate::engine::{Session, COLOR_COUNT};
use crate::session::{SessionId, SessionStatus};

/// Theme colors
pub struct Theme {
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    /// Session colors, indexed by `color_index`
    pub palette: [Color; COLOR_COUNT],
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87),
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
            palette: [
                Color::Rgb(120, 120, 120),
                Color::Rgb(217, 119, 87),
                Color::Rgb(80, 200, 120),
                Color::Rgb(86, 156, 214),
                Color::Rgb(197, 134, 192),
                Color::Rgb(255, 193, 7),
                Color::Rgb(78, 201, 176),
                Color::Rgb(220, 53, 69),
            ],
        }
    }
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Renaming,
    Confirming,
    /// Keystrokes go to the session's PTY
    Attached(SessionId),
}

/// Main application state
pub struct App {
    /// Currently selected session index
    pub list_state: ListState,
    /// Current message to display (info or error)
    pub error_message: Option<String>,
    pub theme: Theme,
    pub input_mode: InputMode,
    /// Text input buffer
    pub input_buffer: String,
    /// Pending action queue
    pub pending_actions: Vec<Action>,
    /// Inner size of the terminal pane at the last render
    pane_size: Option<(u16, u16)>,
    reported_size: Option<(u16, u16)>,
}

impl App {
    pub fn new() -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            list_state,
            error_message: None,
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            pending_actions: Vec::new(),
            pane_size: None,
            reported_size: None,
        }
    }

    /// Get the currently selected session
    pub fn selected_session<'a>(&self, sessions: &'a [Session]) -> Option<&'a Session> {
        self.list_state.selected().and_then(|i| sessions.get(i))
    }

    pub fn selected_index(&self) -> usize {
        self.list_state.selected().unwrap_or(0)
    }

    pub fn select_session(&mut self, sessions: &[Session], session_id: &SessionId) {
        if let Some(idx) = sessions.iter().position(|s| s.id() == session_id) {
            self.list_state.select(Some(idx));
        }
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Pane geometry, once per change, for resizing every session
    pub fn take_resize(&mut self) -> Option<(u16, u16)> {
        let size = self.pane_size.filter(|(cols, rows)| *cols > 0 && *rows > 0)?;
        if self.reported_size == Some(size) {
            return None;
        }
        self.reported_size = Some(size);
        Some(size)
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action, sessions: &[Session]) -> Result<bool> {
        self.clamp_selection(sessions.len());
        match action {
            Action::KeyPress(key) => self.handle_key(key, sessions),
            _ => Ok(false),
        }
    }

    fn clamp_selection(&mut self, len: usize) {
        match self.list_state.selected() {
            Some(i) if len > 0 && i >= len => self.list_state.select(Some(len - 1)),
            None if len > 0 => self.list_state.select(Some(0)),
            _ => {}
        }
        if let InputMode::Attached(_) | InputMode::Renaming | InputMode::Confirming =
            self.input_mode
        {
            if len == 0 {
                self.input_mode = InputMode::Normal;
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent, sessions: &[Session]) -> Result<bool> {
        // Clear error message on any key press
        if self.error_message.is_some() && self.input_mode == InputMode::Normal {
            self.error_message = None;
        }

        match self.input_mode.clone() {
            InputMode::Normal => self.handle_normal_key(key, sessions),
            InputMode::Renaming => self.handle_renaming_key(key, sessions),
            InputMode::Confirming => self.handle_confirming_key(key, sessions),
            InputMode::Attached(id) => {
                self.handle_attached_key(key, id);
                Ok(false)
            }
        }
    }

    fn selected_id(&self, sessions: &[Session]) -> Option<SessionId> {
        self.selected_session(sessions).map(|s| s.id().clone())
    }

    fn handle_normal_key(&mut self, key: KeyEvent, sessions: &[Session]) -> Result<bool> {
        let selected = self.selected_id(sessions);
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            KeyCode::Char('j') | KeyCode::Down => self.next_session(sessions.len()),
            KeyCode::Char('k') | KeyCode::Up => self.previous_session(sessions.len()),
            KeyCode::Char('n') => self.pending_actions.push(Action::CreateSession),
            KeyCode::Char('a') => self.pending_actions.push(Action::DiscoverTerminals),
            KeyCode::Enter => {
                if let Some(id) = selected {
                    self.input_mode = InputMode::Attached(id);
                }
            }
            KeyCode::Char('d') => {
                if selected.is_some() {
                    self.input_mode = InputMode::Confirming;
                }
            }
            KeyCode::Char('r') => {
                if let Some(session) = self.selected_session(sessions) {
                    self.input_buffer = if session.custom_title() {
                        session.title().to_string()
                    } else {
                        String::new()
                    };
                    self.input_mode = InputMode::Renaming;
                }
            }
            KeyCode::Char('b') => {
                if let Some(id) = selected {
                    self.pending_actions.push(Action::ToggleBacklog(id));
                }
            }
            KeyCode::Char('c') => {
                if let Some(id) = selected {
                    self.pending_actions.push(Action::CycleColor(id));
                }
            }
            KeyCode::Char('x') => {
                if let Some(id) = selected {
                    self.pending_actions.push(Action::ClearTerminal(id));
                }
            }
            KeyCode::Char('y') => {
                if let Some(id) = selected {
                    self.pending_actions.push(Action::CopyToClipboard(id));
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_renaming_key(&mut self, key: KeyEvent, sessions: &[Session]) -> Result<bool> {
        match key.code {
            KeyCode::Enter => {
                if let Some(id) = self.selected_id(sessions) {
                    let title = std::mem::take(&mut self.input_buffer);
                    self.pending_actions.push(Action::RenameSession(id, title));
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char(c) => self.input_buffer.push(c),
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_confirming_key(&mut self, key: KeyEvent, sessions: &[Session]) -> Result<bool> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some(id) = self.selected_id(sessions) {
                    self.pending_actions.push(Action::CloseSession(id));
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_attached_key(&mut self, key: KeyEvent, session_id: SessionId) {
        if is_detach(&key) {
            self.input_mode = InputMode::Normal;
            return;
        }
        if let Some(bytes) = key_to_bytes(&key) {
            self.pending_actions.push(Action::Input(session_id, bytes));
        }
    }

    /// Leave attached mode if its session went away
    pub fn session_closed(&mut self, session_id: &SessionId) {
        if self.input_mode == InputMode::Attached(session_id.clone()) {
            self.input_mode = InputMode::Normal;
        }
    }

    fn next_session(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.list_state.select(Some(i));
    }

    fn previous_session(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(i));
    }

    pub fn render(&mut self, frame: &mut Frame, sessions: &[Session]) {
        self.clamp_selection(sessions.len());

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0], sessions);
        self.render_main(frame, chunks[1], sessions);
        self.render_footer(frame, chunks[2]);

        // Render modal dialogs on top
        match self.input_mode {
            InputMode::Renaming => self.render_rename_dialog(frame),
            InputMode::Confirming => self.render_confirm_dialog(frame, sessions),
            InputMode::Normal | InputMode::Attached(_) => {}
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect, sessions: &[Session]) {
        let waiting = sessions
            .iter()
            .filter(|s| s.status() == SessionStatus::WaitingForInput)
            .count();
        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " Airdeck ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("│ {} sessions, {} waiting", sessions.len(), waiting),
                Style::default().fg(self.theme.dim),
            ),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect, sessions: &[Session]) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(30), // Session list
                Constraint::Percentage(70), // Detail pane
            ])
            .split(area);

        self.render_session_list(frame, chunks[0], sessions);
        self.render_detail_pane(frame, chunks[1], sessions);
    }

    fn status_span(&self, status: SessionStatus) -> Span<'static> {
        match status {
            SessionStatus::Active => Span::styled("● ", Style::default().fg(self.theme.warning)),
            SessionStatus::Idle => Span::styled("○ ", Style::default().fg(self.theme.success)),
            SessionStatus::WaitingForInput => {
                Span::styled("? ", Style::default().fg(self.theme.accent))
            }
        }
    }

    fn render_session_list(&mut self, frame: &mut Frame, area: Rect, sessions: &[Session]) {
        let items: Vec<ListItem> = if sessions.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No sessions. Press 'n' to create one.",
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            sessions
                .iter()
                .map(|session| {
                    let swatch = Span::styled(
                        "▍",
                        Style::default().fg(self.theme.palette[session.color_index()]),
                    );
                    let name_style = if session.backlog() {
                        Style::default().fg(self.theme.dim)
                    } else {
                        Style::default().fg(self.theme.fg)
                    };
                    let mut spans = vec![
                        swatch,
                        self.status_span(session.status()),
                        Span::styled(session.title().to_string(), name_style),
                    ];
                    if session.backlog() {
                        spans.push(Span::styled(" [backlog]", Style::default().fg(self.theme.dim)));
                    }
                    ListItem::new(Line::from(spans))
                })
                .collect()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .title(" Sessions ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn field<'a>(&self, name: &'a str, value: String) -> Line<'a> {
        Line::from(vec![
            Span::styled(name, Style::default().fg(self.theme.dim)),
            Span::styled(value, Style::default().fg(self.theme.fg)),
        ])
    }

    fn render_detail_pane(&mut self, frame: &mut Frame, area: Rect, sessions: &[Session]) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(8), Constraint::Min(3)])
            .split(area);

        let attached = matches!(self.input_mode, InputMode::Attached(_));
        let terminal_block = Block::default()
            .title(if attached { " Terminal (attached) " } else { " Terminal " })
            .borders(Borders::ALL)
            .border_style(Style::default().fg(if attached {
                self.theme.accent
            } else {
                self.theme.dim
            }));
        let inner = terminal_block.inner(chunks[1]);
        self.pane_size = Some((inner.width, inner.height));

        let Some(session) = self.selected_session(sessions) else {
            let hint = Paragraph::new(vec![
                Line::from(Span::styled(
                    "No session selected",
                    Style::default().fg(self.theme.dim),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "Press 'n' to create a session or 'a' to adopt running terminals",
                    Style::default().fg(self.theme.dim),
                )),
            ])
            .block(
                Block::default()
                    .title(" Details ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            );
            frame.render_widget(hint, chunks[0]);
            frame.render_widget(terminal_block, chunks[1]);
            return;
        };

        let info = session.info();
        let repo = if info.git_repo.is_empty() {
            "-".to_string()
        } else {
            format!("{} ({})", info.git_repo, info.git_branch)
        };
        let waiting = if !session.waiting_question().is_empty() {
            session.waiting_question().replace('\n', "  ")
        } else if session.hook_done() {
            "Waiting for input".to_string()
        } else {
            String::new()
        };

        let status_color = match session.status() {
            SessionStatus::Active => self.theme.warning,
            SessionStatus::Idle => self.theme.success,
            SessionStatus::WaitingForInput => self.theme.accent,
        };
        let details = vec![
            Line::from(vec![
                Span::styled("Status: ", Style::default().fg(self.theme.dim)),
                Span::styled(
                    format!("{:?}", session.status()),
                    Style::default().fg(status_color),
                ),
                Span::styled(
                    if session.is_standby() { "  standby" } else { "" },
                    Style::default().fg(self.theme.dim),
                ),
            ]),
            self.field("Doing: ", session.label()),
            self.field("Process: ", session.process_name().to_string()),
            self.field("Cwd: ", info.cwd.clone()),
            self.field("Repo: ", repo),
            Line::from(Span::styled(
                waiting,
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )),
        ];
        let detail = Paragraph::new(details).wrap(Wrap { trim: true }).block(
            Block::default()
                .title(format!(" {} ", session.title()))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.palette[session.color_index()])),
        );
        frame.render_widget(detail, chunks[0]);

        let height = usize::from(inner.height);
        let lines = session.screen_lines();
        let skip = lines.len().saturating_sub(height);
        let screen: Vec<Line> = lines.into_iter().skip(skip).map(Line::from).collect();
        frame.render_widget(Paragraph::new(screen).block(terminal_block), chunks[1]);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text = if matches!(self.input_mode, InputMode::Attached(_)) {
            " ATTACHED │ Ctrl-]: Detach "
        } else {
            " q: Quit │ j/k: Navigate │ Enter: Attach │ n: New │ d: Close │ r: Rename │ b: Backlog │ c: Color │ a: Adopt │ x: Clear │ y: Copy "
        };

        let content = if let Some(ref msg) = self.error_message {
            let style = if msg.contains("copied") || msg.contains("Adopted") {
                Style::default().fg(self.theme.success)
            } else {
                Style::default().fg(self.theme.error)
            };
            Line::from(Span::styled(format!(" {} ", msg), style))
        } else {
            Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim)))
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }

    fn render_rename_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Rename Session ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.accent));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                "Enter a title (empty restores automatic titles):",
                Style::default().fg(self.theme.fg),
            )),
            Line::from(""),
            Line::from(Span::styled(
                format!("▶ {}_", self.input_buffer),
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press Enter to save, Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }

    fn render_confirm_dialog(&self, frame: &mut Frame, sessions: &[Session]) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Confirm Close ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.error));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let title = self
            .selected_session(sessions)
            .map(|s| s.title())
            .unwrap_or("unknown");

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("Close session '{}'?", title),
                Style::default().fg(self.theme.fg),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "The shell and everything running in it will be terminated.",
                Style::default().fg(self.theme.warning),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'y' to confirm, 'n' or Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }
}

/// Ctrl-] leaves attached mode; some terminals report it as Ctrl-5
fn is_detach(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
}

/// Encode a key press the way a terminal would send it to the PTY
fn key_to_bytes(key: &KeyEvent) -> Option<Vec<u8>> {
    let seq: &[u8] = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            return c
                .is_ascii_alphabetic()
                .then(|| vec![c.to_ascii_lowercase() as u8 - b'a' + 1]);
        }
        KeyCode::Char(c) => {
            let mut bytes = Vec::with_capacity(5);
            if key.modifiers.contains(KeyModifiers::ALT) {
                bytes.push(0x1b);
            }
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            return Some(bytes);
        }
        KeyCode::Enter => b"\r",
        KeyCode::Backspace => &[0x7f],
        KeyCode::Tab => b"\t",
        KeyCode::BackTab => b"\x1b[Z",
        KeyCode::Esc => &[0x1b],
        KeyCode::Up => b"\x1b[A",
        KeyCode::Down => b"\x1b[B",
        KeyCode::Right => b"\x1b[C",
        KeyCode::Left => b"\x1b[D",
        KeyCode::Home => b"\x1b[H",
        KeyCode::End => b"\x1b[F",
        KeyCode::PageUp => b"\x1b[5~",
        KeyCode::PageDown => b"\x1b[6~",
        KeyCode::Delete => b"\x1b[3~",
        KeyCode::Insert => b"\x1b[2~",
        _ => return None,
    };
    Some(seq.to_vec())
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_key_encoding() {
        assert_eq!(key_to_bytes(&key(KeyCode::Char('a'), KeyModifiers::NONE)), Some(b"a".to_vec()));
        assert_eq!(key_to_bytes(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)), Some(vec![3]));
        assert_eq!(key_to_bytes(&key(KeyCode::Char('x'), KeyModifiers::ALT)), Some(b"\x1bx".to_vec()));
        assert_eq!(key_to_bytes(&key(KeyCode::Char('❯'), KeyModifiers::NONE)), Some("❯".as_bytes().to_vec()));
        assert_eq!(key_to_bytes(&key(KeyCode::Enter, KeyModifiers::NONE)), Some(b"\r".to_vec()));
        assert_eq!(key_to_bytes(&key(KeyCode::Up, KeyModifiers::NONE)), Some(b"\x1b[A".to_vec()));
        assert_eq!(key_to_bytes(&key(KeyCode::F(5), KeyModifiers::NONE)), None);
    }

    #[test]
    fn test_attached_keys_forward_until_detach() {
        let mut app = App::new();
        let id = SessionId::new(4);
        app.input_mode = InputMode::Attached(id.clone());

        app.handle_attached_key(key(KeyCode::Char('l'), KeyModifiers::NONE), id.clone());
        app.handle_attached_key(key(KeyCode::Char('s'), KeyModifiers::NONE), id.clone());
        let pending = app.take_pending_actions();
        assert_eq!(pending.len(), 2);
        assert!(matches!(&pending[0], Action::Input(target, bytes) if target == &id && bytes == b"l"));

        app.handle_attached_key(key(KeyCode::Char(']'), KeyModifiers::CONTROL), id);
        assert_eq!(app.input_mode, InputMode::Normal);
        assert!(app.take_pending_actions().is_empty());
    }

    #[test]
    fn test_resize_reported_once_per_change() {
        let mut app = App::new();
        assert_eq!(app.take_resize(), None);
        app.pane_size = Some((100, 30));
        assert_eq!(app.take_resize(), Some((100, 30)));
        assert_eq!(app.take_resize(), None);
        app.pane_size = Some((0, 30));
        assert_eq!(app.take_resize(), None);
        app.pane_size = Some((90, 30));
        assert_eq!(app.take_resize(), Some((90, 30)));
    }
}
