use thiserror::Error;

/// Errors surfaced by the session engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The shell could not be started; the caller has no session to work with
    #[error("failed to spawn {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
