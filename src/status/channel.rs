//! File-based status channel.
//!
//! Hook scripts write `<state>;<message>` to the file named by
//! `AIRDECK_STATUS_FILE`. One file per session, all inside an
//! instance-scoped directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::session::SessionId;

pub const STATUS_SUFFIX: &str = ".status";

/// State reported by a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookState {
    Busy,
    Done,
}

/// Normalized hook status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookEvent {
    pub session_id: SessionId,
    pub state: HookState,
    pub message: String,
}

/// Status directory for the engine running as `pid`
pub fn status_dir_for(pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!("airdeck-{}", pid))
}

pub fn status_file_path(dir: &Path, session_id: &SessionId) -> PathBuf {
    dir.join(format!("{}{}", session_id, STATUS_SUFFIX))
}

/// Session id encoded in a status file name
pub fn session_id_from_path(path: &Path) -> Option<SessionId> {
    let name = path.file_name()?.to_str()?;
    let id = name.strip_suffix(STATUS_SUFFIX)?;
    (!id.is_empty()).then(|| SessionId::from(id))
}

/// Parse a status record; the last non-empty line wins.
///
/// Returns `None` for empty content or an unrecognised state.
pub fn parse_record(content: &str) -> Option<(HookState, String)> {
    let line = content.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    let (state, message) = line.split_once(';').unwrap_or((line, ""));
    let state = match state.trim() {
        "busy" => HookState::Busy,
        "done" => HookState::Done,
        _ => return None,
    };
    Some((state, message.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        assert_eq!(
            parse_record("busy;Running tests\n"),
            Some((HookState::Busy, "Running tests".to_string()))
        );
        assert_eq!(parse_record("done"), Some((HookState::Done, String::new())));
        assert_eq!(
            parse_record("done;a;b"),
            Some((HookState::Done, "a;b".to_string()))
        );
    }

    #[test]
    fn test_parse_record_rejects_garbage() {
        assert_eq!(parse_record(""), None);
        assert_eq!(parse_record("  \n"), None);
        assert_eq!(parse_record("sleeping;zzz"), None);
    }

    #[test]
    fn test_parse_record_takes_last_line() {
        let content = "busy;Editing\ndone;Finished\n\n";
        assert_eq!(
            parse_record(content),
            Some((HookState::Done, "Finished".to_string()))
        );
    }

    #[test]
    fn test_path_round_trip() {
        let dir = status_dir_for(42);
        assert!(dir.ends_with("airdeck-42"));
        let id = SessionId::new(7);
        let path = status_file_path(&dir, &id);
        assert_eq!(session_id_from_path(&path), Some(id));
        assert_eq!(session_id_from_path(Path::new("/tmp/readme.txt")), None);
        assert_eq!(session_id_from_path(Path::new("/tmp/.status")), None);
    }
}
