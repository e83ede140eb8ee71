use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::SessionId;
use crate::error::{EngineError, Result};
use crate::status::status_file_path;

/// Variables that make a child believe it already runs inside an agent session
const NESTED_SESSION_VARS: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

/// Variable carrying the per-session status file path to hook scripts
pub const STATUS_FILE_ENV: &str = "AIRDECK_STATUS_FILE";

/// How long an exited session waits for its remaining output. Background
/// jobs that inherited the terminal can keep the reader open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Options for spawning a session
#[derive(Debug, Clone, Default)]
pub struct PtyOptions {
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<PathBuf>,
}

/// Raw events produced by session processes
#[derive(Debug, Clone)]
pub enum PtyEvent {
    Data { session_id: SessionId, data: Vec<u8> },
    Exit { session_id: SessionId, exit_code: u32 },
}

struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    status_file: PathBuf,
}

/// Owns one interactive shell per session
pub struct PtyManager {
    sessions: HashMap<SessionId, PtyProcess>,
    next_id: u64,
    shell: String,
    status_dir: PathBuf,
    events: mpsc::UnboundedSender<PtyEvent>,
}

impl PtyManager {
    /// Create a manager whose status files live in `status_dir`
    pub fn new(
        shell: impl Into<String>,
        status_dir: PathBuf,
        events: mpsc::UnboundedSender<PtyEvent>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&status_dir)?;
        Ok(Self {
            sessions: HashMap::new(),
            next_id: 0,
            shell: shell.into(),
            status_dir,
            events,
        })
    }

    pub fn status_dir(&self) -> &Path {
        &self.status_dir
    }

    /// Spawn a shell and start forwarding its output
    pub fn create(&mut self, options: PtyOptions) -> Result<SessionId> {
        let id = SessionId::new(self.next_id);
        self.next_id += 1;
        let status_file = status_file_path(&self.status_dir, &id);

        let spawn_err = |e: anyhow::Error| EngineError::Spawn {
            shell: self.shell.clone(),
            source: e.into(),
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(spawn_err)?;

        let cwd = resolve_cwd(options.cwd.as_deref());
        let cmd = self.build_command(&cwd, &status_file, std::env::vars());
        let mut child = pair.slave.spawn_command(cmd).map_err(spawn_err)?;
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair.master.try_clone_reader().map_err(spawn_err)?;
        let writer = pair.master.take_writer().map_err(spawn_err)?;

        if let Err(e) = std::fs::File::create(&status_file) {
            warn!(session_id = %id, error = %e, "Could not create status file");
        }

        let drained = spawn_reader(id.clone(), reader, self.events.clone());

        let exit_tx = self.events.clone();
        let exit_id = id.clone();
        std::thread::Builder::new()
            .name(format!("{}-wait", id))
            .spawn(move || {
                let exit_code = child.wait().map(|s| s.exit_code()).unwrap_or(1);
                // Exit must follow the last Data chunk
                if let Some(drained) = drained {
                    if drained.recv_timeout(DRAIN_TIMEOUT).is_err() {
                        debug!(session_id = %exit_id, "Output still open after exit");
                    }
                }
                let _ = exit_tx.send(PtyEvent::Exit {
                    session_id: exit_id,
                    exit_code,
                });
            })?;

        info!(session_id = %id, pid = ?pid, cwd = ?cwd, "Session spawned");
        self.sessions.insert(
            id.clone(),
            PtyProcess {
                master: pair.master,
                writer,
                killer,
                pid,
                status_file,
            },
        );
        Ok(id)
    }

    fn build_command(
        &self,
        cwd: &Path,
        status_file: &Path,
        ambient: impl IntoIterator<Item = (String, String)>,
    ) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.cwd(cwd);
        for (key, value) in ambient {
            cmd.env(key, value);
        }
        for key in NESTED_SESSION_VARS {
            cmd.env_remove(key);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("AIRDECK", "1");
        cmd.env(STATUS_FILE_ENV, status_file);
        cmd
    }

    pub fn write(&mut self, session_id: &SessionId, data: &[u8]) {
        if let Some(process) = self.sessions.get_mut(session_id) {
            let result = process
                .writer
                .write_all(data)
                .and_then(|_| process.writer.flush());
            if let Err(e) = result {
                debug!(session_id = %session_id, error = %e, "Write to session failed");
            }
        }
    }

    /// Resize the PTY; failures on a closing process are swallowed
    pub fn resize(&self, session_id: &SessionId, cols: u16, rows: u16) {
        if let Some(process) = self.sessions.get(session_id) {
            let size = PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            };
            if let Err(e) = process.master.resize(size) {
                debug!(session_id = %session_id, error = %e, "Resize ignored");
            }
        }
    }

    /// Kill the process and remove its status file. Closing twice is a no-op.
    pub fn close(&mut self, session_id: &SessionId) -> bool {
        match self.sessions.remove(session_id) {
            Some(mut process) => {
                if let Err(e) = process.killer.kill() {
                    debug!(session_id = %session_id, error = %e, "Kill failed, process likely gone");
                }
                remove_status_file(&process.status_file);
                info!(session_id = %session_id, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Forget a session whose process already exited
    pub fn reap(&mut self, session_id: &SessionId) -> bool {
        match self.sessions.remove(session_id) {
            Some(process) => {
                remove_status_file(&process.status_file);
                true
            }
            None => false,
        }
    }

    /// Close every session and remove the status directory
    pub fn close_all(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.close(&id);
        }
        if let Err(e) = std::fs::remove_dir_all(&self.status_dir) {
            debug!(path = ?self.status_dir, error = %e, "Status directory cleanup failed");
        }
    }

    pub fn pid(&self, session_id: &SessionId) -> Option<u32> {
        self.sessions.get(session_id).and_then(|p| p.pid)
    }

    /// Process group leader of the terminal's foreground job, else the shell
    pub fn foreground_pid(&self, session_id: &SessionId) -> Option<u32> {
        let process = self.sessions.get(session_id)?;
        #[cfg(unix)]
        if let Some(leader) = process.master.process_group_leader() {
            if leader > 0 {
                return Some(leader as u32);
            }
        }
        process.pid
    }

    pub fn status_file(&self, session_id: &SessionId) -> Option<&Path> {
        self.sessions
            .get(session_id)
            .map(|p| p.status_file.as_path())
    }

    pub fn owned_pids(&self) -> Vec<u32> {
        self.sessions.values().filter_map(|p| p.pid).collect()
    }
}

/// Forward output until EOF. The returned receiver fires once the reader
/// has sent its last chunk.
fn spawn_reader(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    events: mpsc::UnboundedSender<PtyEvent>,
) -> Option<std_mpsc::Receiver<()>> {
    let (done_tx, done_rx) = std_mpsc::channel();
    let name = format!("{}-read", session_id);
    let result = std::thread::Builder::new().name(name).spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let event = PtyEvent::Data {
                        session_id: session_id.clone(),
                        data: buf[..n].to_vec(),
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(session_id = %session_id, error = %e, "PTY read ended");
                    break;
                }
            }
        }
        let _ = done_tx.send(());
    });
    match result {
        Ok(_) => Some(done_rx),
        Err(e) => {
            warn!(error = %e, "Could not start PTY reader thread");
            None
        }
    }
}

fn resolve_cwd(requested: Option<&Path>) -> PathBuf {
    if let Some(dir) = requested.filter(|d| !d.as_os_str().is_empty()) {
        if dir.is_dir() {
            return dir.to_path_buf();
        }
        debug!(cwd = ?dir, "Requested cwd missing, using home");
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

fn remove_status_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = ?path, error = %e, "Status file removal failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path) -> (PtyManager, mpsc::UnboundedReceiver<PtyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = PtyManager::new("/bin/sh", dir.join("status"), tx).unwrap();
        (manager, rx)
    }

    fn options(cwd: &Path) -> PtyOptions {
        PtyOptions {
            cols: 80,
            rows: 24,
            cwd: Some(cwd.to_path_buf()),
        }
    }

    #[test]
    fn test_command_strips_nested_session_vars() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _rx) = manager(dir.path());
        let ambient = vec![
            ("CLAUDECODE".to_string(), "1".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ];
        let status_file = dir.path().join("x.status");
        let cmd = manager.build_command(dir.path(), &status_file, ambient);

        assert!(cmd.get_env("CLAUDECODE").is_none());
        assert_eq!(cmd.get_env("PATH").unwrap(), "/usr/bin");
        assert_eq!(
            cmd.get_env(STATUS_FILE_ENV).unwrap(),
            status_file.as_os_str()
        );
    }

    #[tokio::test]
    async fn test_status_file_reaches_child() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, mut rx) = manager(dir.path());
        let id = manager.create(options(dir.path())).unwrap();
        let status_file = manager.status_file(&id).unwrap().to_path_buf();
        assert!(status_file.exists());

        manager.write(&id, b"echo \"path=$AIRDECK_STATUS_FILE\"\n");
        let expected = format!("path={}", status_file.display());
        let mut seen = String::new();
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if let PtyEvent::Data { data, .. } = event {
                    seen.push_str(&String::from_utf8_lossy(&data));
                    if seen.contains(&expected) {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(found, "child output: {}", seen);
        manager.close_all();
    }

    #[tokio::test]
    async fn test_exit_follows_final_output() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, mut rx) = manager(dir.path());
        let id = manager.create(options(dir.path())).unwrap();

        manager.write(&id, b"seq 1 5000; printf 'end-%s\\n' marker; exit\n");
        let mut seen = String::new();
        let exited = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = rx.recv().await {
                match event {
                    PtyEvent::Data { data, .. } => seen.push_str(&String::from_utf8_lossy(&data)),
                    PtyEvent::Exit { session_id, .. } => return Some(session_id),
                }
            }
            None
        })
        .await
        .unwrap();

        assert_eq!(exited, Some(id.clone()));
        assert!(seen.contains("end-marker"), "output before exit: {}", seen);
        assert!(rx.try_recv().is_err(), "no output may trail the exit event");
        manager.reap(&id);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, _rx) = manager(dir.path());
        let id = manager.create(options(dir.path())).unwrap();
        let status_file = manager.status_file(&id).unwrap().to_path_buf();

        assert!(manager.close(&id));
        assert!(!status_file.exists());
        assert!(manager.pid(&id).is_none());
        assert!(!manager.close(&id));
    }

    #[tokio::test]
    async fn test_ids_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, _rx) = manager(dir.path());
        let first = manager.create(options(dir.path())).unwrap();
        manager.close(&first);
        let second = manager.create(options(dir.path())).unwrap();
        assert_ne!(first, second);
        assert_ne!(
            status_file_path(manager.status_dir(), &first),
            manager.status_file(&second).unwrap()
        );
        manager.close_all();
        assert!(!dir.path().join("status").exists());
    }
}
