use std::io;
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Event loop error: {0}")]
    EventLoop(String),

    #[error("Thread pool error: {0}")]
    Pool(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logger error: {0}")]
    Logger(#[from] log::SetLoggerError),
}

pub type ServerResult<T> = Result<T, ServerError>;
