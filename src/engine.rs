//! Session orchestration.
//!
//! The [`Engine`] owns the live session set. Process output, hook events,
//! deferred question timers and identity probes all arrive as
//! [`EngineEvent`]s and are applied by [`Engine::handle`] on one event loop,
//! so no session state is shared across tasks.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::mirror::Mirror;
use crate::persistence::{SavedSession, SavedState, StateStore};
use crate::session::{
    base_name, process_name, session_info, ExternalTerminal, PtyEvent, PtyManager, PtyOptions,
    SessionId, SessionInfo, SessionStatus,
};
use crate::status::{
    extract_question, HookEvent, HookWatcher, OutputSignals, QuestionTicket, StatusClassifier,
    StatusState,
};

/// Number of selectable session colors
pub const COLOR_COUNT: usize = 8;

/// Ceiling on one session's identity probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Form feed, asks the shell to clear the screen
const CLEAR_SCREEN: &[u8] = &[0x0c];

/// Everything the engine reacts to
#[derive(Debug)]
pub enum EngineEvent {
    Pty(PtyEvent),
    Hook(HookEvent),
    /// Settle delay after a `done` hook elapsed
    QuestionDue {
        session_id: SessionId,
        ticket: QuestionTicket,
    },
    /// Result of a background identity probe; `None` when it timed out
    Identity {
        session_id: SessionId,
        probe: Option<(String, SessionInfo)>,
    },
    Refresh,
    ShutdownDeadline,
}

/// Upward event surface for the front end
#[derive(Debug, Clone)]
pub enum Notification {
    Output { session_id: SessionId, data: Vec<u8> },
    Exit { session_id: SessionId, exit_code: u32 },
    HookStatus(HookEvent),
    /// Persist state now; the engine terminates sessions after the grace window
    SaveRequested,
}

/// Options for creating a session, fresh or restored
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub cwd: Option<PathBuf>,
    pub title: Option<String>,
    pub custom_title: bool,
    /// Serialized mirror content replayed before any live output
    pub buffer: Option<String>,
    pub color_index: usize,
    pub backlog: bool,
}

impl From<SavedSession> for CreateOptions {
    fn from(saved: SavedSession) -> Self {
        Self {
            cwd: (!saved.cwd.is_empty()).then(|| PathBuf::from(saved.cwd)),
            title: (!saved.title.is_empty()).then_some(saved.title),
            custom_title: saved.custom_title,
            buffer: (!saved.buffer.is_empty()).then_some(saved.buffer),
            color_index: saved.color_index,
            backlog: saved.backlog,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownPhase {
    Running,
    /// Save requested, waiting for it or for the grace deadline
    Saving,
    Done,
}

/// One live session and everything derived from its output
pub struct Session {
    id: SessionId,
    title: String,
    custom_title: bool,
    color_index: usize,
    backlog: bool,
    status: StatusState,
    mirror: Mirror,
    signals: OutputSignals,
    process_name: String,
    info: SessionInfo,
    pending_question: Option<JoinHandle<()>>,
    probing: bool,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn custom_title(&self) -> bool {
        self.custom_title
    }

    pub fn color_index(&self) -> usize {
        self.color_index
    }

    pub fn backlog(&self) -> bool {
        self.backlog
    }

    pub fn status(&self) -> SessionStatus {
        self.status.status()
    }

    pub fn is_standby(&self) -> bool {
        self.status.is_standby()
    }

    pub fn hook_done(&self) -> bool {
        self.status.hook_done()
    }

    pub fn hook_message(&self) -> &str {
        self.status.hook_message()
    }

    pub fn waiting_question(&self) -> &str {
        self.status.waiting_question()
    }

    pub fn label(&self) -> String {
        self.status.label()
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Most recent logical lines of the mirrored buffer
    pub fn tail(&self, count: usize) -> Vec<String> {
        self.mirror.read_lines(count)
    }

    pub fn screen_lines(&self) -> Vec<String> {
        self.mirror.screen_lines()
    }

    fn cancel_question(&mut self) {
        if let Some(task) = self.pending_question.take() {
            task.abort();
        }
    }

    fn apply_identity(&mut self, name: String, info: SessionInfo) {
        self.process_name = name;
        if !info.cwd.is_empty() {
            self.info.cwd = info.cwd;
        }
        if !info.git_repo.is_empty() && !info.git_branch.is_empty() {
            if !self.custom_title {
                self.title = format!("{}/{}", info.git_repo, info.git_branch);
            }
            self.info.git_repo = info.git_repo;
            self.info.git_branch = info.git_branch;
        } else {
            self.info.git_repo.clear();
            self.info.git_branch.clear();
        }
    }

    fn to_saved(&self) -> SavedSession {
        SavedSession {
            title: self.title.clone(),
            custom_title: self.custom_title,
            cwd: self.info.cwd.clone(),
            buffer: self.mirror.serialize(),
            color_index: self.color_index,
            backlog: self.backlog,
        }
    }
}

/// Receivers feeding the engine's event loop
pub struct EngineEvents {
    pty: mpsc::UnboundedReceiver<PtyEvent>,
    hooks: mpsc::UnboundedReceiver<HookEvent>,
    internal: mpsc::UnboundedReceiver<EngineEvent>,
    refresh: tokio::time::Interval,
}

impl EngineEvents {
    pub async fn next(&mut self) -> EngineEvent {
        tokio::select! {
            Some(event) = self.internal.recv() => event,
            Some(event) = self.hooks.recv() => EngineEvent::Hook(event),
            Some(event) = self.pty.recv() => EngineEvent::Pty(event),
            _ = self.refresh.tick() => EngineEvent::Refresh,
        }
    }
}

pub struct Engine {
    config: Config,
    manager: PtyManager,
    sessions: Vec<Session>,
    watcher: HookWatcher,
    classifier: StatusClassifier,
    store: StateStore,
    internal: mpsc::UnboundedSender<EngineEvent>,
    notifications: mpsc::UnboundedSender<Notification>,
    cols: u16,
    rows: u16,
    shutdown: ShutdownPhase,
}

impl Engine {
    /// Start the engine with its status files under `status_dir`
    pub fn start(
        config: Config,
        status_dir: PathBuf,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Result<(Self, EngineEvents)> {
        let (pty_tx, pty_rx) = mpsc::unbounded_channel();
        let (hook_tx, hook_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let manager = PtyManager::new(config.shell.clone(), status_dir, pty_tx)?;
        let watcher = HookWatcher::start(manager.status_dir(), config.hook_poll_interval(), hook_tx);

        let mut refresh = tokio::time::interval(config.refresh_interval());
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(status_dir = ?manager.status_dir(), shell = %config.shell, "Engine started");

        let engine = Self {
            classifier: StatusClassifier::new(config.silence_threshold()),
            store: StateStore::new(config.state_file.clone()),
            cols: config.default_cols,
            rows: config.default_rows,
            config,
            manager,
            sessions: Vec::new(),
            watcher,
            internal: internal_tx,
            notifications,
            shutdown: ShutdownPhase::Running,
        };
        let events = EngineEvents {
            pty: pty_rx,
            hooks: hook_rx,
            internal: internal_rx,
            refresh,
        };
        Ok((engine, events))
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == session_id)
    }

    fn session_mut(&mut self, session_id: &SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| &s.id == session_id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown == ShutdownPhase::Done
    }

    /// Shell pids owned by this engine, excluded from external discovery
    pub fn owned_pids(&self) -> Vec<u32> {
        self.manager.owned_pids()
    }

    /// Spawn a session at the shared geometry. Spawn failures are returned.
    pub fn create(&mut self, options: CreateOptions) -> Result<SessionId> {
        let id = self.manager.create(PtyOptions {
            cols: self.cols,
            rows: self.rows,
            cwd: options.cwd.clone(),
        })?;

        let mut mirror = Mirror::new(self.cols, self.rows, self.config.scrollback);
        if let Some(buffer) = &options.buffer {
            mirror.restore(buffer);
        }
        if let Some(path) = self.manager.status_file(&id) {
            self.watcher.track(id.clone(), path.to_path_buf());
        }

        let title = options
            .title
            .unwrap_or_else(|| format!("Terminal {}", self.sessions.len() + 1));
        let cwd = options
            .cwd
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.sessions.push(Session {
            id: id.clone(),
            title,
            custom_title: options.custom_title,
            color_index: options.color_index % COLOR_COUNT,
            backlog: options.backlog,
            status: StatusState::default(),
            mirror,
            signals: OutputSignals::new(Instant::now()),
            process_name: String::new(),
            info: SessionInfo {
                cwd,
                ..Default::default()
            },
            pending_question: None,
            probing: false,
        });
        Ok(id)
    }

    /// Open an external terminal's directory as a new session
    pub fn adopt(&mut self, terminal: &ExternalTerminal) -> Result<SessionId> {
        let title = match base_name(&terminal.cwd) {
            name if name.is_empty() => terminal.shell.clone(),
            name => name,
        };
        info!(pid = terminal.pid, cwd = %terminal.cwd, "Adopting external terminal");
        self.create(CreateOptions {
            cwd: Some(PathBuf::from(&terminal.cwd)),
            title: Some(title),
            ..Default::default()
        })
    }

    pub fn write(&mut self, session_id: &SessionId, data: &[u8]) {
        self.manager.write(session_id, data);
    }

    pub fn clear(&mut self, session_id: &SessionId) {
        self.manager.write(session_id, CLEAR_SCREEN);
    }

    /// Apply one geometry to every process and mirror
    pub fn resize_all(&mut self, cols: u16, rows: u16) {
        let (cols, rows) = (cols.max(1), rows.max(1));
        if (cols, rows) == (self.cols, self.rows) {
            return;
        }
        self.cols = cols;
        self.rows = rows;
        for session in &mut self.sessions {
            session.mirror.resize(cols, rows);
            self.manager.resize(&session.id, cols, rows);
        }
        debug!(cols, rows, "Resized sessions");
    }

    /// A non-empty title pins it; an empty one returns to automatic titles
    pub fn rename(&mut self, session_id: &SessionId, title: &str) {
        let title = title.trim();
        let fallback = self
            .sessions
            .iter()
            .position(|s| &s.id == session_id)
            .map(|idx| format!("Terminal {}", idx + 1));
        if let Some(session) = self.session_mut(session_id) {
            if title.is_empty() {
                session.custom_title = false;
                if let Some(fallback) = fallback {
                    session.title = fallback;
                }
            } else {
                session.custom_title = true;
                session.title = title.to_string();
            }
        }
    }

    pub fn toggle_backlog(&mut self, session_id: &SessionId) {
        if let Some(session) = self.session_mut(session_id) {
            session.backlog = !session.backlog;
        }
    }

    pub fn cycle_color(&mut self, session_id: &SessionId) {
        if let Some(session) = self.session_mut(session_id) {
            session.color_index = (session.color_index + 1) % COLOR_COUNT;
        }
    }

    /// Terminate a session. Returns false if it was already gone.
    pub fn close(&mut self, session_id: &SessionId) -> bool {
        let closed = self.manager.close(session_id);
        self.release(session_id);
        closed
    }

    /// Drop engine-side state for a session whose process is gone
    fn release(&mut self, session_id: &SessionId) -> bool {
        self.watcher.untrack(session_id.clone());
        match self.sessions.iter().position(|s| &s.id == session_id) {
            Some(idx) => {
                let mut session = self.sessions.remove(idx);
                session.cancel_question();
                true
            }
            None => false,
        }
    }

    /// Terminate every session and remove the status directory
    pub fn close_all(&mut self) {
        for session in &mut self.sessions {
            session.cancel_question();
        }
        self.sessions.clear();
        self.manager.close_all();
        self.watcher.stop();
    }

    /// Snapshot every session in display order
    pub fn saved_state(&self, active_index: usize) -> SavedState {
        SavedState {
            sessions: self.sessions.iter().map(Session::to_saved).collect(),
            active_index,
        }
    }

    /// Persist the session list. During shutdown this also completes the
    /// save phase so sessions are terminated without waiting out the grace.
    pub fn save_state(&mut self, active_index: usize) -> Result<()> {
        let result = self.store.save(&self.saved_state(active_index));
        if self.shutdown == ShutdownPhase::Saving {
            self.finish_shutdown();
        }
        result
    }

    /// Recreate saved sessions. Returns the previously active session when
    /// its index is still in range.
    pub fn restore(&mut self) -> Result<Option<SessionId>> {
        let Some(state) = self.store.load() else {
            return Ok(None);
        };
        let mut ids = Vec::with_capacity(state.sessions.len());
        for saved in state.sessions {
            ids.push(self.create(saved.into())?);
        }
        info!(path = ?self.store.path(), sessions = ids.len(), "Restored saved sessions");
        Ok(ids.get(state.active_index).cloned())
    }

    /// Begin the shutdown protocol. Repeated requests while a save is
    /// pending are ignored.
    pub fn request_shutdown(&mut self) {
        if self.shutdown != ShutdownPhase::Running {
            debug!(phase = ?self.shutdown, "Shutdown already in progress");
            return;
        }
        self.shutdown = ShutdownPhase::Saving;
        let _ = self.notifications.send(Notification::SaveRequested);

        let internal = self.internal.clone();
        let grace = self.config.shutdown_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = internal.send(EngineEvent::ShutdownDeadline);
        });
        info!(grace_ms = grace.as_millis() as u64, "Shutdown requested");
    }

    fn finish_shutdown(&mut self) {
        if self.shutdown == ShutdownPhase::Done {
            return;
        }
        self.shutdown = ShutdownPhase::Done;
        self.close_all();
        info!("Engine shut down");
    }

    pub fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Pty(PtyEvent::Data { session_id, data }) => {
                self.on_output(session_id, data)
            }
            EngineEvent::Pty(PtyEvent::Exit {
                session_id,
                exit_code,
            }) => {
                self.manager.reap(&session_id);
                if self.release(&session_id) {
                    info!(session_id = %session_id, exit_code, "Session exited");
                    let _ = self.notifications.send(Notification::Exit {
                        session_id,
                        exit_code,
                    });
                }
            }
            EngineEvent::Hook(event) => self.on_hook(event),
            EngineEvent::QuestionDue { session_id, ticket } => {
                self.on_question_due(&session_id, ticket)
            }
            EngineEvent::Identity { session_id, probe } => {
                if let Some(session) = self.session_mut(&session_id) {
                    session.probing = false;
                    match probe {
                        Some((name, info)) => session.apply_identity(name, info),
                        None => debug!(session_id = %session_id, "Identity probe timed out"),
                    }
                }
            }
            EngineEvent::Refresh => self.refresh(),
            EngineEvent::ShutdownDeadline => self.finish_shutdown(),
        }
    }

    fn on_output(&mut self, session_id: SessionId, data: Vec<u8>) {
        let Some(session) = self.session_mut(&session_id) else {
            return;
        };
        session.mirror.write(&data);
        session.signals.ingest(&data, Instant::now());
        let _ = self
            .notifications
            .send(Notification::Output { session_id, data });
    }

    fn on_hook(&mut self, event: HookEvent) {
        let settle = self.config.question_settle();
        let internal = self.internal.clone();
        let Some(session) = self.session_mut(&event.session_id) else {
            debug!(session_id = %event.session_id, "Hook event for unknown session ignored");
            return;
        };

        let ticket = session.status.apply_hook(&event);
        session.cancel_question();
        if let Some(ticket) = ticket {
            let session_id = event.session_id.clone();
            session.pending_question = Some(tokio::spawn(async move {
                tokio::time::sleep(settle).await;
                let _ = internal.send(EngineEvent::QuestionDue { session_id, ticket });
            }));
        }

        debug!(session_id = %event.session_id, state = ?event.state, message = %event.message, "Hook status applied");
        let _ = self.notifications.send(Notification::HookStatus(event));
    }

    fn on_question_due(&mut self, session_id: &SessionId, ticket: QuestionTicket) {
        let lines = self.config.question_lines;
        let Some(session) = self.session_mut(session_id) else {
            return;
        };
        session.pending_question = None;
        if !session.status.hook_done() {
            return;
        }
        let recent = session.mirror.read_lines(lines);
        let question = extract_question(&recent, session.status.hook_message());
        if session.status.resolve_question(ticket, question) && !session.waiting_question().is_empty()
        {
            debug!(session_id = %session_id, question = %session.waiting_question(), "Waiting question extracted");
        }
    }

    /// Reclassify sessions without hook coverage and start identity probes.
    /// Each probe runs on its own task so a slow one only delays itself.
    fn refresh(&mut self) {
        let now = Instant::now();
        for session in &mut self.sessions {
            let classification = self
                .classifier
                .classify(&session.signals.observe(&session.process_name, now));
            session.status.apply_heuristic(classification);
            session.signals.clear_bell();

            if session.probing {
                continue;
            }
            let Some(root) = self.manager.pid(&session.id) else {
                continue;
            };
            let foreground = self.manager.foreground_pid(&session.id).unwrap_or(root);
            session.probing = true;

            let session_id = session.id.clone();
            let internal = self.internal.clone();
            tokio::spawn(async move {
                let probe = async {
                    let name = process_name(foreground).await.unwrap_or_default();
                    (base_name(&name), session_info(root).await)
                };
                let probe = tokio::time::timeout(PROBE_TIMEOUT, probe).await.ok();
                let _ = internal.send(EngineEvent::Identity { session_id, probe });
            });
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.shutdown != ShutdownPhase::Done {
            warn!("Engine dropped without shutdown, closing sessions");
            self.close_all();
        }
    }
}
