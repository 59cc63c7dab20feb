//! Transport driver seam
//!
//! The connection manager talks to the server exclusively through these
//! traits. The built-in driver is [`RawConnection`] dialed by
//! [`ValkeyConnector`]; tests substitute mock implementations.
//!
//! [`RawConnection`]: super::raw_connection::RawConnection
//! [`ValkeyConnector`]: super::raw_connection::ValkeyConnector

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::utils::{ConnectionError, RespValue};

/// Physical endpoint to dial, parsed from the resolved target string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl DialTarget {
    /// Canonical connection string; doubles as the pool key.
    pub fn connection_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialTarget::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            DialTarget::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

/// One live connection to the server.
///
/// A handle held by the manager's pool is already authenticated and
/// database-selected; nothing on the dispatch path re-runs setup.
pub trait Transport {
    /// Send one command and read its reply. Transport-level failures come
    /// back as `io::Error`; server error replies come back as
    /// [`RespValue::Error`] and are classified by the caller.
    fn invoke(&mut self, args: &[&[u8]]) -> io::Result<RespValue>;

    /// Best-effort teardown. Dropping the handle afterwards must be safe.
    fn shutdown(&mut self);

    /// AUTH step run while opening.
    fn authenticate(&mut self, password: &str) -> Result<(), ConnectionError> {
        match self.invoke(&[b"AUTH", password.as_bytes()]) {
            Ok(RespValue::SimpleString(s)) if s == "OK" => Ok(()),
            Ok(RespValue::Error(e)) => Err(ConnectionError::AuthFailed(e)),
            Ok(other) => Err(ConnectionError::AuthFailed(format!(
                "unexpected reply: {:?}",
                other
            ))),
            Err(e) => Err(ConnectionError::AuthFailed(e.to_string())),
        }
    }

    /// SELECT step run while opening.
    fn select_db(&mut self, database: u32) -> Result<(), ConnectionError> {
        let index = database.to_string();
        match self.invoke(&[b"SELECT", index.as_bytes()]) {
            Ok(RespValue::SimpleString(s)) if s == "OK" => Ok(()),
            Ok(RespValue::Error(reason)) => Err(ConnectionError::SelectFailed { database, reason }),
            Ok(other) => Err(ConnectionError::SelectFailed {
                database,
                reason: format!("unexpected reply: {:?}", other),
            }),
            Err(e) => Err(ConnectionError::SelectFailed {
                database,
                reason: e.to_string(),
            }),
        }
    }

    /// Liveness probe.
    fn ping(&mut self) -> io::Result<bool> {
        match self.invoke(&[b"PING"])? {
            RespValue::SimpleString(s) => Ok(s == "PONG"),
            _ => Ok(false),
        }
    }
}

/// Dials a [`DialTarget`] into a live [`Transport`].
pub trait Connector {
    type Conn: Transport;

    fn dial(&self, target: &DialTarget) -> Result<Self::Conn, ConnectionError>;
}
