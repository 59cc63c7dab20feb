//! valkey-conn
//!
//! Managed client connection to a single Valkey/Redis endpoint: lazy
//! connection pooling keyed by resolved target, runtime redirects for
//! cluster topologies, and transparent retry of transiently failed
//! commands.

pub mod client;
pub mod config;
pub mod utils;
