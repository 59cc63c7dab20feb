//! Client connection layer

pub mod commands;
pub mod manager;
pub mod raw_connection;
pub mod transport;

pub use commands::{CommandDispatch, Commands};
pub use manager::ConnectionManager;
pub use raw_connection::{RawConnection, ValkeyConnector};
pub use transport::{Connector, DialTarget, Transport};
