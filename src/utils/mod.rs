//! Utility modules

pub mod error;
pub mod resp;

pub use error::{ClientError, CommandError, ConnectionError, Result};
pub use resp::{RespDecoder, RespEncoder, RespValue};
