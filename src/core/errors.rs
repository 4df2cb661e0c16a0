// src/core/errors.rs

//! Defines the primary error type for the entire application.

use crate::client::ClientError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the daemon.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations. `std::io::Error` is wrapped in an `Arc` so the enum
/// stays cheaply cloneable.
#[derive(Error, Debug, Clone)]
pub enum PalisadeError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Unparseable policy event {event_id}: {message}")]
    InvalidRuleEvent { event_id: String, message: String },

    #[error("Room {0} is not a watched policy room")]
    NotWatched(String),

    #[error("Room {0} is not protected")]
    NotProtected(String),

    #[error("Unknown protection '{0}'")]
    UnknownProtection(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for PalisadeError {
    fn from(e: std::io::Error) -> Self {
        PalisadeError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for PalisadeError {
    fn from(e: reqwest::Error) -> Self {
        PalisadeError::HttpClientError(e.to_string())
    }
}

impl From<serde_json::Error> for PalisadeError {
    fn from(e: serde_json::Error) -> Self {
        PalisadeError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
