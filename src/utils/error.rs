//! Error types for valkey-conn

use std::io;
use thiserror::Error;

/// Top-level client error
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}

impl ClientError {
    /// True when the failure was a transport fault on an established
    /// connection, the only class the dispatcher's retry policy covers.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Command(CommandError::Transient(_)))
    }
}

/// Errors raised while establishing a connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {target}: {source}")]
    ConnectFailed { target: String, source: io::Error },

    #[error("TLS handshake failed: {0}")]
    TlsFailed(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("SELECT {database} failed: {reason}")]
    SelectFailed { database: u32, reason: String },

    #[error("Connection closed unexpectedly")]
    Closed,
}

/// Errors raised while executing a command on an established connection
#[derive(Error, Debug)]
pub enum CommandError {
    /// The transport failed mid-command (broken pipe, reset, timeout on an
    /// established session).
    #[error("Transient transport failure: {0}")]
    Transient(#[source] io::Error),

    /// The server answered with an error reply (bad arguments, wrong type
    /// for key). Never retried.
    #[error("Server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
