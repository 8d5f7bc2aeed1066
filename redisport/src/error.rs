use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Rejected before any work started; retry with corrected input.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Another export/import is already running against this target.
    #[error("Operation already in progress: {0}")]
    Busy(String),

    /// The store rejected a command (wrong type, bad arguments, ...).
    #[error("Store error: {0}")]
    Store(String),

    /// A replay line could not be parsed back into command arguments.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors that abort a whole session rather than a single record.
    ///
    /// Per-record failures (type mismatches, malformed lines) are counted
    /// and the session continues; a dead connection or an unwritable file
    /// escalates to `failed` immediately.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Transport(e) => e.is_io_error() || e.is_connection_refusal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
