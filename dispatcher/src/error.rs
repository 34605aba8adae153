//! Error types for sessions and order storage

use shared::FrameError;
use std::io;
use thiserror::Error;

/// Coarse classification used for history and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Authentication,
    Protocol,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("server {0} is misconfigured")]
    Misconfigured(String),

    #[error("{addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}: connection timed out")]
    ConnectTimeout(String),

    #[error("authentication rejected (wrong secret)")]
    AuthRejected,

    #[error("timeout reading {0}")]
    ReadTimeout(&'static str),

    #[error("timeout writing packet")]
    WriteTimeout,

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("malformed frame: {0}")]
    Protocol(#[from] FrameError),

    #[error("session is {actual}, expected {expected}")]
    InvalidState {
        actual: &'static str,
        expected: &'static str,
    },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Misconfigured(_) | SessionError::InvalidState { .. } => {
                ErrorKind::Configuration
            }
            SessionError::AuthRejected => ErrorKind::Authentication,
            SessionError::Protocol(_) => ErrorKind::Protocol,
            _ => ErrorKind::Connection,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata {key} is not valid: {source}")]
    Metadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot IO failed: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot JSON invalid: {0}")]
    Json(#[from] serde_json::Error),
}
