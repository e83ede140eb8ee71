use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

mod actions;
mod app;
mod config;
mod engine;
mod error;
mod mirror;
mod persistence;
mod session;
mod status;

use actions::Action;
use app::App;
use config::Config;
use engine::{CreateOptions, Engine, Notification};

/// Logical lines copied when a session has no waiting question
const COPY_TAIL_LINES: usize = 40;

fn init_logging() -> Result<()> {
    let dir = config::data_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("airdeck.log"))
        .context("opening log file")?;

    // The TUI owns the terminal, so logs go to a file
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new().context("opening clipboard")?;
    clipboard.set_text(text).context("writing clipboard")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let config = Config::load();

    // Create event channels
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
    let (note_tx, mut notes) = mpsc::unbounded_channel::<Notification>();

    let status_dir = status::status_dir_for(std::process::id());
    let (mut engine, mut engine_events) =
        Engine::start(config, status_dir, note_tx).context("starting session engine")?;

    let mut app = App::new();
    match engine.restore() {
        Ok(Some(active)) => app.select_session(engine.sessions(), &active),
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "Restoring sessions failed");
            app.error_message = Some(format!("Restore failed: {}", e));
        }
    }
    if engine.sessions().is_empty() {
        engine
            .create(CreateOptions::default())
            .context("spawning first session")?;
    }

    // Initialize terminal
    let mut terminal = ratatui::init();

    // Spawn input handler
    let input_tx = tx.clone();
    std::thread::spawn(move || loop {
        if event::poll(Duration::from_millis(100)).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == KeyEventKind::Press && input_tx.send(Action::KeyPress(key)).is_err()
                {
                    break;
                }
            }
        }
    });

    // Main event loop
    let result: Result<()> = loop {
        // Render
        if let Err(e) = terminal.draw(|f| app.render(f, engine.sessions())) {
            break Err(e.into());
        }

        // The terminal pane's size is the geometry of every session
        if let Some((cols, rows)) = app.take_resize() {
            engine.resize_all(cols, rows);
        }

        // Process any pending actions from the app
        for pending_action in app.take_pending_actions() {
            match pending_action {
                Action::CreateSession => match engine.create(CreateOptions::default()) {
                    Ok(id) => app.select_session(engine.sessions(), &id),
                    Err(e) => app.error_message = Some(format!("Failed to create: {}", e)),
                },
                Action::CloseSession(ref id) => {
                    engine.close(id);
                    app.session_closed(id);
                }
                Action::RenameSession(ref id, ref title) => engine.rename(id, title),
                Action::ToggleBacklog(ref id) => engine.toggle_backlog(id),
                Action::CycleColor(ref id) => engine.cycle_color(id),
                Action::ClearTerminal(ref id) => engine.clear(id),
                Action::Input(ref id, ref bytes) => engine.write(id, bytes),
                Action::CopyToClipboard(ref id) => {
                    let Some(session) = engine.session(id) else {
                        continue;
                    };
                    let text = if session.waiting_question().is_empty() {
                        session.tail(COPY_TAIL_LINES).join("\n")
                    } else {
                        session.waiting_question().to_string()
                    };
                    app.error_message = Some(match copy_to_clipboard(&text) {
                        Ok(()) => "Session text copied to clipboard!".to_string(),
                        Err(e) => format!("Clipboard error: {:#}", e),
                    });
                }
                Action::DiscoverTerminals => {
                    let owned = engine.owned_pids();
                    let discover_tx = tx.clone();
                    tokio::spawn(async move {
                        let found = session::discover_terminals(&owned).await;
                        let _ = discover_tx.send(Action::TerminalsDiscovered(found));
                    });
                }
                _ => {}
            }
        }

        if engine.is_shut_down() {
            break Ok(());
        }

        // Handle events from channels
        tokio::select! {
            Some(action) = rx.recv() => match action {
                Action::TerminalsDiscovered(terminals) => {
                    let mut adopted = Vec::new();
                    for terminal in &terminals {
                        match engine.adopt(terminal) {
                            Ok(id) => adopted.push(id),
                            Err(e) => warn!(pid = terminal.pid, error = %e, "Adopt failed"),
                        }
                    }
                    if let Some(first) = adopted.first() {
                        app.select_session(engine.sessions(), first);
                    }
                    app.error_message = Some(format!("Adopted {} terminal(s)", adopted.len()));
                }
                action => match app.handle_action(action, engine.sessions()) {
                    Ok(true) => engine.request_shutdown(),
                    Ok(false) => {}
                    Err(e) => break Err(e),
                },
            },
            event = engine_events.next() => engine.handle(event),
            Some(note) = notes.recv() => match note {
                Notification::SaveRequested => {
                    if let Err(e) = engine.save_state(app.selected_index()) {
                        warn!(error = %e, "Saving session state failed");
                    }
                }
                Notification::Exit { session_id, exit_code } => {
                    app.session_closed(&session_id);
                    info!(session_id = %session_id, exit_code, "Session ended");
                }
                Notification::Output { .. } | Notification::HookStatus(_) => {}
            },
        }
    };

    // Restore terminal
    ratatui::restore();
    result
}
