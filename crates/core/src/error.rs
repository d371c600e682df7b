//! Error types shared by the platform and application layers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or event loop failures
    #[error("Window error: {0}")]
    Window(String),

    /// Surface creation or surface extension queries
    #[error("Surface error: {0}")]
    Surface(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected configuration values
    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
