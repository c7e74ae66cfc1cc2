use thiserror::Error;

#[derive(Error, Debug)]
pub enum MneError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse {0}")]
    ParseError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Data must be preloaded for {0}")]
    NotPreloaded(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("MNE-C binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Expected {package} version {expected} but found {found}")]
    VersionMismatch {
        package: String,
        expected: String,
        found: String,
    },
}

pub type Result<T> = std::result::Result<T, MneError>;
