//! Configuration module

pub mod connection_config;
pub mod tls_config;

pub use connection_config::{ConnectionConfig, SocketFlags};
pub use tls_config::TlsConfig;
