use crossterm::event::KeyEvent;

use crate::session::{ExternalTerminal, SessionId};

/// Actions that can be dispatched through the application
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// Spawn a fresh session
    CreateSession,
    /// Close a session
    CloseSession(SessionId),
    /// Set (or with an empty string, clear) a custom title
    RenameSession(SessionId, String),
    ToggleBacklog(SessionId),
    CycleColor(SessionId),
    ClearTerminal(SessionId),
    /// Copy the waiting question, or the buffer tail, to the clipboard
    CopyToClipboard(SessionId),
    /// Raw bytes for an attached session
    Input(SessionId, Vec<u8>),
    /// Look for shells running outside the deck
    DiscoverTerminals,
    /// Discovery finished
    TerminalsDiscovered(Vec<ExternalTerminal>),
}
