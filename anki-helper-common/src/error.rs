//! Common error types for anki-helper

use thiserror::Error;

/// Common result type for anki-helper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the workspace crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed textual input (config file syntax, durations)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid user input or parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Prefix the error message with context, keeping the variant.
    ///
    /// `Io` errors are converted into `Config` errors since the context
    /// usually names the file being loaded.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Error::Io(e) => Error::Config(format!("{}: {}", context, e)),
            Error::Config(msg) => Error::Config(format!("{}: {}", context, msg)),
            Error::Parse(msg) => Error::Parse(format!("{}: {}", context, msg)),
            Error::InvalidInput(msg) => Error::InvalidInput(format!("{}: {}", context, msg)),
            Error::Internal(msg) => Error::Internal(format!("{}: {}", context, msg)),
        }
    }
}
