use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable pointing at an alternate config file
pub const CONFIG_ENV: &str = "AIRDECK_CONFIG";

/// Runtime configuration, loaded from JSON with every field optional
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell spawned for each session
    pub shell: String,
    /// Safety-net poll of status files
    pub hook_poll_interval_ms: u64,
    /// Cadence of heuristic classification and identity refresh
    pub refresh_interval_ms: u64,
    /// Output silence after which a session counts as standby
    pub silence_threshold_ms: u64,
    /// Delay between a `done` hook and question extraction
    pub question_settle_ms: u64,
    /// Logical lines scanned for a waiting question
    pub question_lines: usize,
    /// Grace window for saving state before sessions are killed
    pub shutdown_grace_ms: u64,
    /// Mirror scrollback rows
    pub scrollback: usize,
    /// Where session state is persisted
    pub state_file: PathBuf,
    pub default_cols: u16,
    pub default_rows: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/zsh".to_string()),
            hook_poll_interval_ms: 2000,
            refresh_interval_ms: 1000,
            silence_threshold_ms: 3000,
            question_settle_ms: 100,
            question_lines: 30,
            shutdown_grace_ms: 500,
            scrollback: 5000,
            state_file: data_dir().join("session-state.json"),
            default_cols: 80,
            default_rows: 24,
        }
    }
}

impl Config {
    /// Load from `$AIRDECK_CONFIG` or the user config dir, falling back to defaults
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|d| d.join("airdeck").join("config.json")));

        match path {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Self::default(),
        }
    }

    fn from_file(path: &std::path::Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = ?path, error = %e, "Config unreadable, using defaults");
                return Self::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = ?path, error = %e, "Config malformed, using defaults");
            Self::default()
        })
    }

    pub fn hook_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hook_poll_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    pub fn question_settle(&self) -> Duration {
        Duration::from_millis(self.question_settle_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Per-user data directory (state file, log file)
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("airdeck")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{"silence_threshold_ms": 5000}"#).unwrap();
        assert_eq!(config.silence_threshold(), Duration::from_millis(5000));
        assert_eq!(config.hook_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.question_lines, 30);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = Config::from_file(&path);
        assert_eq!(config.shutdown_grace(), Duration::from_millis(500));
    }
}
