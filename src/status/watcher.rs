//! Hook watcher.
//!
//! Two producers feed one consumer: directory notifications name the file
//! that changed, and a fixed-interval poll re-reads every tracked file to
//! cover missed notifications. The consumer keeps the last raw content per
//! session and emits an event only when it changes.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::{parse_record, session_id_from_path, HookEvent};
use crate::session::SessionId;

enum WatchCommand {
    Track(SessionId, PathBuf),
    Untrack(SessionId),
}

/// Last-seen content per session; repeats and malformed records yield nothing
#[derive(Debug, Default)]
pub struct HookDeduper {
    last_seen: HashMap<SessionId, String>,
}

impl HookDeduper {
    pub fn observe(&mut self, session_id: &SessionId, raw: &str) -> Option<HookEvent> {
        let content = raw.trim();
        if content.is_empty() || self.last_seen.get(session_id).map(String::as_str) == Some(content)
        {
            return None;
        }
        self.last_seen
            .insert(session_id.clone(), content.to_string());

        let (state, message) = parse_record(content)?;
        Some(HookEvent {
            session_id: session_id.clone(),
            state,
            message,
        })
    }

    pub fn forget(&mut self, session_id: &SessionId) {
        self.last_seen.remove(session_id);
    }
}

/// Handle to the running watcher task
pub struct HookWatcher {
    commands: mpsc::UnboundedSender<WatchCommand>,
    task: JoinHandle<()>,
    _watcher: Option<RecommendedWatcher>,
}

impl HookWatcher {
    /// Start watching `dir`, emitting deduplicated events on `events`
    pub fn start(
        dir: &Path,
        poll_interval: Duration,
        events: mpsc::UnboundedSender<HookEvent>,
    ) -> Self {
        let (change_tx, change_rx) = mpsc::unbounded_channel::<Option<PathBuf>>();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let watcher = match watch_dir(dir, change_tx) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Directory watch unavailable, polling only");
                None
            }
        };

        let task = tokio::spawn(consume(change_rx, command_rx, poll_interval, events));
        info!(dir = ?dir, "Hook watcher started");

        Self {
            commands,
            task,
            _watcher: watcher,
        }
    }

    pub fn track(&self, session_id: SessionId, status_file: PathBuf) {
        let _ = self
            .commands
            .send(WatchCommand::Track(session_id, status_file));
    }

    pub fn untrack(&self, session_id: SessionId) {
        let _ = self.commands.send(WatchCommand::Untrack(session_id));
    }

    pub fn stop(&mut self) {
        self.task.abort();
        self._watcher = None;
    }
}

impl Drop for HookWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn watch_dir(
    dir: &Path,
    changes: mpsc::UnboundedSender<Option<PathBuf>>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if event.paths.is_empty() => {
                let _ = changes.send(None);
            }
            Ok(event) => {
                for path in event.paths {
                    let _ = changes.send(Some(path));
                }
            }
            Err(e) => debug!(error = %e, "Watch error ignored"),
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

async fn consume(
    mut changes: mpsc::UnboundedReceiver<Option<PathBuf>>,
    mut commands: mpsc::UnboundedReceiver<WatchCommand>,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<HookEvent>,
) {
    let mut tracked: HashMap<SessionId, PathBuf> = HashMap::new();
    let mut deduper = HookDeduper::default();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(WatchCommand::Track(id, path)) => {
                    tracked.insert(id, path);
                }
                Some(WatchCommand::Untrack(id)) => {
                    tracked.remove(&id);
                    deduper.forget(&id);
                }
                None => break,
            },
            Some(change) = changes.recv() => {
                let targets: Vec<SessionId> = match change.as_deref().and_then(session_id_from_path) {
                    Some(id) => vec![id],
                    None => tracked.keys().cloned().collect(),
                };
                for id in targets {
                    check(&id, &tracked, &mut deduper, &events).await;
                }
            }
            _ = ticker.tick() => {
                let ids: Vec<SessionId> = tracked.keys().cloned().collect();
                for id in ids {
                    check(&id, &tracked, &mut deduper, &events).await;
                }
            }
        }
    }
}

async fn check(
    session_id: &SessionId,
    tracked: &HashMap<SessionId, PathBuf>,
    deduper: &mut HookDeduper,
    events: &mpsc::UnboundedSender<HookEvent>,
) {
    let Some(path) = tracked.get(session_id) else {
        return;
    };
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return;
    };
    if let Some(event) = deduper.observe(session_id, &content) {
        debug!(session_id = %session_id, state = ?event.state, "Hook status changed");
        let _ = events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::channel::{status_file_path, HookState};

    #[test]
    fn test_repeated_content_is_dropped() {
        let mut deduper = HookDeduper::default();
        let id = SessionId::new(0);

        let first = deduper.observe(&id, "busy;Reading\n").unwrap();
        assert_eq!(first.state, HookState::Busy);
        assert_eq!(first.message, "Reading");
        assert!(deduper.observe(&id, "busy;Reading").is_none());

        let done = deduper.observe(&id, "done;").unwrap();
        assert_eq!(done.state, HookState::Done);
        assert!(deduper.observe(&id, "busy;Reading").is_some());
    }

    #[test]
    fn test_malformed_and_empty_ignored() {
        let mut deduper = HookDeduper::default();
        let id = SessionId::new(1);
        assert!(deduper.observe(&id, "").is_none());
        assert!(deduper.observe(&id, "garbage").is_none());
        assert!(deduper.observe(&id, "busy;ok").is_some());
    }

    #[test]
    fn test_forget_allows_reemit() {
        let mut deduper = HookDeduper::default();
        let id = SessionId::new(2);
        assert!(deduper.observe(&id, "done;x").is_some());
        deduper.forget(&id);
        assert!(deduper.observe(&id, "done;x").is_some());
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<HookEvent>) -> Option<HookEvent> {
        tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_watcher_emits_once_per_change() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = HookWatcher::start(dir.path(), Duration::from_millis(50), tx);

        let id = SessionId::new(3);
        let path = status_file_path(dir.path(), &id);
        watcher.track(id.clone(), path.clone());

        std::fs::write(&path, "busy;Thinking").unwrap();
        let event = next_event(&mut rx).await.unwrap();
        assert_eq!(event.session_id, id);
        assert_eq!(event.state, HookState::Busy);

        std::fs::write(&path, "busy;Thinking").unwrap();
        let repeat = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(repeat.is_err(), "duplicate content must not re-emit");

        std::fs::write(&path, "done;All set").unwrap();
        let event = next_event(&mut rx).await.unwrap();
        assert_eq!(event.state, HookState::Done);
        assert_eq!(event.message, "All set");

        watcher.stop();
    }

    #[tokio::test]
    async fn test_polling_alone_delivers_events() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("later");
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Watching a missing directory fails, leaving only the interval
        let watcher = HookWatcher::start(&dir, Duration::from_millis(50), tx);
        assert!(watcher._watcher.is_none());

        std::fs::create_dir_all(&dir).unwrap();
        let id = SessionId::new(4);
        let path = status_file_path(&dir, &id);
        watcher.track(id.clone(), path.clone());

        std::fs::write(&path, "done;Ready").unwrap();
        let event = next_event(&mut rx).await.unwrap();
        assert_eq!(event.session_id, id);
        assert_eq!(event.state, HookState::Done);
        assert_eq!(event.message, "Ready");
    }

    #[tokio::test]
    async fn test_unknown_session_file_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = HookWatcher::start(dir.path(), Duration::from_millis(50), tx);

        std::fs::write(dir.path().join("session-99.status"), "busy;x").unwrap();
        let got = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(got.is_err());
    }
}
