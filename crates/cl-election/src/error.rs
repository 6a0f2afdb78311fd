//! Error types for the election crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("Lease store error: {0}")]
    Store(String),

    #[error("Lease store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Broadcast bus error: {0}")]
    Bus(String),

    #[error("Message encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ElectionError>;
