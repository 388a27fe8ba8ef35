use thiserror::Error;

/// Errors that can stop the tool outside of request dispatch.
/// Request failures never show up here, they become `Outcome`s.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP client could not be built for a batch
    #[error("HTTP client error: {0}")]
    Client(String),

    /// File or terminal I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Export serialization
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<isahc::Error> for Error {
    fn from(err: isahc::Error) -> Self {
        Error::Client(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
