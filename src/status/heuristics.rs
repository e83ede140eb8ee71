use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::session::{base_name, SessionStatus};

/// Complete lines retained per session
const MAX_TRACKED_LINES: usize = 20;

const BELL: u8 = 0x07;

/// Foreground processes treated as AI coding CLIs
const AI_CLI_PROCESSES: &[&str] = &["claude", "aider", "cursor", "codex", "gemini"];

const SHELL_PROCESSES: &[&str] = &["zsh", "bash", "fish", "sh", "tcsh", "csh"];

/// Escape sequences and carriage returns, stripped before pattern matching
static RE_ANSI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b\[[0-9;?!>=]*[ -/]*[@-~]|\x1b[()][0-9A-Za-z]|\x1b[=>78c]|[\r\x07]").unwrap()
});

/// Leftover private-mode fragments echoed while typing (e.g. "[?2004h")
static RE_MODE_ECHO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[[?!][0-9;]*[a-zA-Z]$").unwrap());

static BUSY_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Thinking|thinking", "Thinking..."),
        (r"Reading|reading", "Reading..."),
        (r"Writing|writing", "Writing..."),
        (r"Editing|editing", "Editing..."),
        (r"Running|running", "Running..."),
        (r"Searching|searching", "Searching..."),
        (r"Installing|installing", "Installing..."),
        (r"Compiling|compiling", "Compiling..."),
        (r"Analyzing|analyzing", "Analyzing..."),
        (r"Updating|updating", "Updating..."),
    ]
    .into_iter()
    .map(|(p, label)| (Regex::new(p).unwrap(), label))
    .collect()
});

static WAITING_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\(y/n\)|\[y/n\]|yes/no", "Confirm"),
        (r"(?i)waiting for input|press enter", "Waiting for input"),
        (r"\?\s*$", "Waiting for input"),
        (r"[>❯]\s*$", "Ready"),
    ]
    .into_iter()
    .map(|(p, label)| (Regex::new(p).unwrap(), label))
    .collect()
});

static RE_SHELL_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[$❯>\]%#]\s*$").unwrap());

static RE_AI_WAITING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)>\s*$|\?\s*$|waiting for input|press enter|\(y/n\)|\[y/n\]").unwrap()
});

/// Remove escape sequences, carriage returns and bells, then trim
pub fn strip_ansi(s: &str) -> String {
    RE_ANSI.replace_all(s, "").trim().to_string()
}

/// Rolling output signals for one session
#[derive(Debug, Clone)]
pub struct OutputSignals {
    lines: VecDeque<String>,
    last_chunk: String,
    bell: bool,
    last_output_at: Instant,
}

impl OutputSignals {
    pub fn new(now: Instant) -> Self {
        Self {
            lines: VecDeque::with_capacity(MAX_TRACKED_LINES),
            last_chunk: String::new(),
            bell: false,
            last_output_at: now,
        }
    }

    /// Record a raw output chunk
    pub fn ingest(&mut self, data: &[u8], now: Instant) {
        self.last_output_at = now;
        if data.contains(&BELL) {
            self.bell = true;
        }

        let text = String::from_utf8_lossy(data);
        let cleaned = strip_ansi(&text);
        if !cleaned.is_empty() {
            self.last_chunk = cleaned;
        }

        // Only newline-terminated segments count as complete lines
        let mut parts: Vec<&str> = text.split('\n').collect();
        parts.pop();
        for part in parts {
            let line = strip_ansi(part);
            if line.is_empty() || RE_MODE_ECHO.is_match(&line) {
                continue;
            }
            if self.lines.len() == MAX_TRACKED_LINES {
                self.lines.pop_front();
            }
            self.lines.push_back(line);
        }
    }

    pub fn last_line(&self) -> &str {
        self.lines.back().map(String::as_str).unwrap_or("")
    }

    pub fn last_chunk(&self) -> &str {
        &self.last_chunk
    }

    pub fn bell(&self) -> bool {
        self.bell
    }

    pub fn clear_bell(&mut self) {
        self.bell = false;
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_output_at)
    }

    pub fn observe<'a>(&'a self, process_name: &'a str, now: Instant) -> Observation<'a> {
        Observation {
            process_name,
            last_line: self.last_line(),
            last_chunk: &self.last_chunk,
            bell: self.bell,
            silence: self.silence(now),
        }
    }
}

/// Inputs to one heuristic evaluation
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub process_name: &'a str,
    pub last_line: &'a str,
    /// Newest chunk; status lines redrawn with `\r` only show up here
    pub last_chunk: &'a str,
    pub bell: bool,
    pub silence: Duration,
}

/// Why a session counts as standby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StandbyReason {
    Bell,
    ShellIdle,
    AiWaiting,
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeuristicStatus {
    Busy,
    Waiting,
    Standby(StandbyReason),
    Idle,
}

/// Result of a heuristic evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: HeuristicStatus,
    pub label: String,
    /// Rule that decided it
    pub rule: &'static str,
}

impl Classification {
    pub fn session_status(&self) -> SessionStatus {
        match self.status {
            HeuristicStatus::Busy => SessionStatus::Active,
            HeuristicStatus::Waiting | HeuristicStatus::Standby(_) => SessionStatus::WaitingForInput,
            HeuristicStatus::Idle => SessionStatus::Idle,
        }
    }

    pub fn is_standby(&self) -> bool {
        matches!(
            self.status,
            HeuristicStatus::Waiting | HeuristicStatus::Standby(_)
        )
    }
}

type Verdict = Option<(HeuristicStatus, String)>;

/// A named predicate in the ordered rule list
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&Observation, Duration) -> Verdict,
}

fn is_ai_cli(obs: &Observation) -> bool {
    AI_CLI_PROCESSES.contains(&base_name(obs.process_name).as_str())
}

fn is_shell(obs: &Observation) -> bool {
    SHELL_PROCESSES.contains(&base_name(obs.process_name).as_str())
}

/// Label for output that matched nothing: the process name, or "Terminal"
fn neutral_label(obs: &Observation) -> String {
    let base = base_name(obs.process_name);
    if base.is_empty() {
        "Terminal".to_string()
    } else {
        base
    }
}

fn first_match(obs: &Observation, patterns: &[(Regex, &'static str)]) -> Option<&'static str> {
    [obs.last_chunk, obs.last_line].iter().find_map(|text| {
        patterns
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, label)| *label)
    })
}

fn ai_busy(obs: &Observation, _silence_threshold: Duration) -> Verdict {
    if !is_ai_cli(obs) {
        return None;
    }
    first_match(obs, &BUSY_PATTERNS).map(|label| (HeuristicStatus::Busy, label.to_string()))
}

fn ai_waiting(obs: &Observation, _silence_threshold: Duration) -> Verdict {
    if !is_ai_cli(obs) {
        return None;
    }
    first_match(obs, &WAITING_PATTERNS).map(|label| (HeuristicStatus::Waiting, label.to_string()))
}

fn standby(obs: &Observation, silence_threshold: Duration) -> Verdict {
    let silent = obs.silence >= silence_threshold;
    if !silent && !obs.bell {
        return None;
    }

    let reason = if obs.bell {
        StandbyReason::Bell
    } else if is_shell(obs) && (RE_SHELL_PROMPT.is_match(obs.last_line) || silent) {
        StandbyReason::ShellIdle
    } else if is_ai_cli(obs) && RE_AI_WAITING.is_match(obs.last_line) {
        StandbyReason::AiWaiting
    } else {
        StandbyReason::Silence
    };
    Some((HeuristicStatus::Standby(reason), neutral_label(obs)))
}

fn idle(obs: &Observation, _silence_threshold: Duration) -> Verdict {
    Some((HeuristicStatus::Idle, neutral_label(obs)))
}

/// Evaluated top to bottom, first match wins
pub static RULES: &[Rule] = &[
    Rule { name: "ai-busy", apply: ai_busy },
    Rule { name: "ai-waiting", apply: ai_waiting },
    Rule { name: "standby", apply: standby },
    Rule { name: "idle", apply: idle },
];

/// Classifier for sessions without hook coverage
pub struct StatusClassifier {
    silence_threshold: Duration,
}

impl StatusClassifier {
    pub fn new(silence_threshold: Duration) -> Self {
        Self { silence_threshold }
    }

    pub fn classify(&self, obs: &Observation) -> Classification {
        RULES
            .iter()
            .find_map(|rule| {
                (rule.apply)(obs, self.silence_threshold).map(|(status, label)| Classification {
                    status,
                    label,
                    rule: rule.name,
                })
            })
            .unwrap_or_else(|| Classification {
                status: HeuristicStatus::Idle,
                label: neutral_label(obs),
                rule: "idle",
            })
    }
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self::new(Duration::from_millis(3000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs<'a>(process: &'a str, line: &'a str, chunk: &'a str) -> Observation<'a> {
        Observation {
            process_name: process,
            last_line: line,
            last_chunk: chunk,
            bell: false,
            silence: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_detect_busy_from_chunk() {
        let classifier = StatusClassifier::default();
        let result = classifier.classify(&obs("claude", "", "Reading file.ts"));
        assert_eq!(result.status, HeuristicStatus::Busy);
        assert!(result.label.contains("Reading"));
        assert_eq!(result.session_status(), SessionStatus::Active);
    }

    #[test]
    fn test_detect_waiting_for_input() {
        let classifier = StatusClassifier::default();
        let result = classifier.classify(&obs("claude", "Continue? (y/n)", ""));
        assert_eq!(result.status, HeuristicStatus::Waiting);
        assert_eq!(result.session_status(), SessionStatus::WaitingForInput);

        let result = classifier.classify(&obs("/usr/local/bin/claude", "Do it?", ""));
        assert_eq!(result.status, HeuristicStatus::Waiting);
    }

    #[test]
    fn test_busy_outranks_waiting() {
        let classifier = StatusClassifier::default();
        let result = classifier.classify(&obs("claude", "Proceed?", "Thinking"));
        assert_eq!(result.rule, "ai-busy");
        assert_eq!(result.label, "Thinking...");
    }

    #[test]
    fn test_silence_is_standby_for_unknown_process() {
        let classifier = StatusClassifier::default();
        let mut o = obs("weird-tool", "", "");
        o.silence = Duration::from_millis(5000);
        let result = classifier.classify(&o);
        assert_eq!(result.status, HeuristicStatus::Standby(StandbyReason::Silence));
        assert!(result.is_standby());
    }

    #[test]
    fn test_bell_alone_is_standby() {
        let classifier = StatusClassifier::default();
        let mut o = obs("zsh", "", "");
        o.bell = true;
        let result = classifier.classify(&o);
        assert_eq!(result.status, HeuristicStatus::Standby(StandbyReason::Bell));
    }

    #[test]
    fn test_silent_shell_and_ai() {
        let classifier = StatusClassifier::default();
        let mut shell = obs("bash", "user@host:~$ ", "");
        shell.silence = Duration::from_secs(4);
        assert_eq!(
            classifier.classify(&shell).status,
            HeuristicStatus::Standby(StandbyReason::ShellIdle)
        );

        // AI CLIs matching a waiting line are caught earlier by ai-waiting
        let mut ai = obs("aider", "done.", "done.");
        ai.silence = Duration::from_secs(4);
        assert_eq!(
            classifier.classify(&ai).status,
            HeuristicStatus::Standby(StandbyReason::Silence)
        );
    }

    #[test]
    fn test_unknown_process_is_neutral() {
        let classifier = StatusClassifier::default();
        let result = classifier.classify(&obs("vim", "Reading the docs?", ""));
        assert_eq!(result.status, HeuristicStatus::Idle);
        assert_eq!(result.label, "vim");

        let result = classifier.classify(&obs("", "", ""));
        assert_eq!(result.label, "Terminal");
    }

    #[test]
    fn test_signals_track_lines_chunk_and_bell() {
        let start = Instant::now();
        let mut signals = OutputSignals::new(start);
        signals.ingest(b"\x1b[32mfirst line\x1b[0m\r\nsecond", start);
        assert_eq!(signals.last_line(), "first line");
        assert_eq!(signals.last_chunk(), "first line\nsecond");

        signals.ingest(b"\r\x1b[2K\xe2\xa0\x8b Thinking", start);
        assert_eq!(signals.last_chunk(), "\u{280b} Thinking");
        assert_eq!(signals.last_line(), "first line");
        assert!(!signals.bell());

        signals.ingest(b"\x07", start);
        assert!(signals.bell());
        signals.clear_bell();
        assert!(!signals.bell());

        let later = start + Duration::from_secs(4);
        assert_eq!(signals.silence(later), Duration::from_secs(4));
    }

    #[test]
    fn test_signals_skip_mode_echo_and_cap_history() {
        let now = Instant::now();
        let mut signals = OutputSignals::new(now);
        signals.ingest(b"[?2004h\n", now);
        assert_eq!(signals.last_line(), "");

        for i in 0..30 {
            signals.ingest(format!("line {}\n", i).as_bytes(), now);
        }
        assert_eq!(signals.lines.len(), MAX_TRACKED_LINES);
        assert_eq!(signals.last_line(), "line 29");
    }

    #[test]
    fn test_strip_ansi_handles_osc_title() {
        assert_eq!(strip_ansi("\x1b]0;my title\x07$ ls\r"), "$ ls");
    }
}
