//! Endpoint and retry-policy configuration
//!
//! The manager consumes resolved values only; loading them from files or
//! the environment is the host application's concern.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::tls_config::TlsConfig;

/// Socket flags forwarded to the dial step.
///
/// The manager attaches no semantics to these; drivers honor what their
/// socket layer supports and ignore the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketFlags(u32);

impl SocketFlags {
    /// Plain blocking connect.
    pub const CONNECT: SocketFlags = SocketFlags(1);
    /// Ask the driver for a non-blocking connect.
    pub const ASYNC_CONNECT: SocketFlags = SocketFlags(2);
    /// Ask the driver for a persistent (reused) socket.
    pub const PERSISTENT: SocketFlags = SocketFlags(4);

    /// Raw bitmask value.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether all flags in `other` are set.
    pub fn contains(self, other: SocketFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for SocketFlags {
    fn default() -> Self {
        SocketFlags::CONNECT
    }
}

impl std::ops::BitOr for SocketFlags {
    type Output = SocketFlags;

    fn bitor(self, rhs: SocketFlags) -> SocketFlags {
        SocketFlags(self.0 | rhs.0)
    }
}

/// Static configuration of a managed connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Hostname or IP of the server. Ignored when `unix_socket` is set.
    pub hostname: String,
    /// Server port. Ignored when `unix_socket` is set.
    pub port: u16,
    /// Unix socket path; takes precedence over hostname/port.
    pub unix_socket: Option<PathBuf>,
    /// Password for the AUTH step. `None` skips AUTH.
    pub password: Option<String>,
    /// Database index for the SELECT step. `None` skips SELECT.
    pub database: Option<u32>,
    /// Timeout for establishing the connection. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
    /// Read/write timeout on the established socket. `None` blocks.
    pub data_timeout: Option<Duration>,
    /// TLS parameters. `None` dials plain TCP.
    pub tls: Option<TlsConfig>,
    /// Flags forwarded to the dial step.
    pub socket_flags: SocketFlags,
    /// Guarded retry attempts for transiently failed commands.
    pub retries: u32,
    /// Sleep between teardown and reopen during a retry cycle.
    pub retry_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 6379,
            unix_socket: None,
            password: None,
            database: Some(0),
            connect_timeout: None,
            data_timeout: None,
            tls: None,
            socket_flags: SocketFlags::default(),
            retries: 0,
            retry_interval: Duration::ZERO,
        }
    }
}
