use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;

/// One session as persisted across restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SavedSession {
    pub title: String,
    pub custom_title: bool,
    pub cwd: String,
    /// Serialized mirror buffer, replayed on restore
    pub buffer: String,
    pub color_index: usize,
    pub backlog: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedState {
    pub sessions: Vec<SavedSession>,
    #[serde(default)]
    pub active_index: usize,
}

/// JSON document holding the saved session list
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the state through a temp file and rename so a crash mid-write
    /// never leaves a truncated document behind.
    pub fn save(&self, state: &SavedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_vec(state)?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = ?self.path, sessions = state.sessions.len(), "Saved session state");
        Ok(())
    }

    /// Read the saved state. Anything unreadable or whose `sessions` field is
    /// not a list counts as no saved state.
    pub fn load(&self) -> Option<SavedState> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = ?self.path, error = %e, "Session state unreadable");
                }
                return None;
            }
        };

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| warn!(path = ?self.path, error = %e, "Session state malformed"))
            .ok()?;
        if !value.get("sessions").is_some_and(serde_json::Value::is_array) {
            debug!(path = ?self.path, "Session state has no session list");
            return None;
        }

        serde_json::from_value(value)
            .map_err(|e| warn!(path = ?self.path, error = %e, "Session state has unexpected shape"))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("session-state.json"));
        (dir, store)
    }

    #[test]
    fn test_save_then_load() {
        let (_dir, store) = store();
        let state = SavedState {
            sessions: vec![
                SavedSession {
                    title: "airdeck/main".to_string(),
                    cwd: "/tmp".to_string(),
                    buffer: "hello\r\n$ \x1b[2;3H".to_string(),
                    ..Default::default()
                },
                SavedSession {
                    title: "notes".to_string(),
                    custom_title: true,
                    color_index: 3,
                    backlog: true,
                    ..Default::default()
                },
            ],
            active_index: 1,
        };

        store.save(&state).unwrap();
        assert_eq!(store.load(), Some(state));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_no_state() {
        let (_dir, store) = store();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_bad_shapes_are_no_state() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();

        for doc in [
            r#"{"activeIndex": 0}"#,
            r#"{"sessions": {"title": "x"}, "activeIndex": 0}"#,
            r#"{"sessions": "nope"}"#,
            r#"[1, 2, 3]"#,
            "not json",
        ] {
            std::fs::write(store.path(), doc).unwrap();
            assert_eq!(store.load(), None, "{}", doc);
        }
    }

    #[test]
    fn test_older_documents_fill_defaults() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"sessions":[{"title":"t","customTitle":false,"cwd":"/","buffer":""}],"activeIndex":0}"#,
        )
        .unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].color_index, 0);
        assert!(!state.sessions[0].backlog);
    }
}
