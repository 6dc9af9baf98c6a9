use thiserror::Error;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, LensError>;

/// Enum representing all possible errors in the wordlens library.
#[derive(Error, Debug)]
pub enum LensError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Data directory not found or could not be determined")]
    DataDirNotFound,

    #[error("Required data file not found: {0}")]
    DataFileNotFound(String),

    #[error("Failed to parse corpus: {0}")]
    ParseError(String),

    #[error("Corpus contains markup but no word entries")]
    EmptyLexicon,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Recognition loop is no longer running")]
    LoopClosed,

    #[error("Internal error: {0}")]
    Internal(String), // For unexpected situations
}
