use thiserror::Error;

/// Expected failures at the runner boundary. These are recorded on the job
/// and shown to the user; they are never retried automatically.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Network or backend failure.
    #[error("{0}")]
    Transport(String),

    /// The backend answered in a shape the runner does not understand.
    #[error("Unexpected response format: {0}")]
    Format(String),

    /// The backend answered successfully but with no series.
    #[error("{0}")]
    EmptyResult(String),

    /// The backend rejected the statement.
    #[error("{0}")]
    Query(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RunnerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RunnerError::Format(e.to_string())
        } else {
            RunnerError::Transport(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RunnerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RunnerError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(e: serde_json::Error) -> Self {
        RunnerError::Format(e.to_string())
    }
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Query runner \"{0}\" is already registered")]
    Duplicate(String),

    #[error("Unknown query runner type \"{0}\"")]
    UnknownType(String),

    #[error("Failed to build query runner: {0}")]
    Build(#[from] RunnerError),
}
