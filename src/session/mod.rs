mod introspect;
mod pty;

pub use introspect::{base_name, discover_terminals, process_name, session_info};
pub use pty::{PtyEvent, PtyManager, PtyOptions};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session identifier, unique for the lifetime of the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(seq: u64) -> Self {
        Self(format!("session-{}", seq))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Merged status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Producing output or told busy by a hook
    #[default]
    Active,
    /// Recently produced output, nothing recognised
    Idle,
    /// Blocked on the user
    WaitingForInput,
}

/// Working directory and repository identity of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub cwd: String,
    pub git_repo: String,
    pub git_branch: String,
}

/// An interactive shell running outside the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTerminal {
    pub pid: u32,
    pub tty: String,
    pub shell: String,
    pub cwd: String,
}
