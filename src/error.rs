//! Agent error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("mount error: {0}")]
    Mount(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("external command `{command}` timed out after {seconds}s")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
