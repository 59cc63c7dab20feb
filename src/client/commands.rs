//! Typed command surface
//!
//! Convenience methods over the generic dispatcher. Every method funnels
//! through the same retry-wrapped execute path, so transient-failure
//! handling is uniform whether a caller dispatches by name or through a
//! typed method.

use crate::utils::{ClientError, CommandError, RespValue, Result};

use super::manager::ConnectionManager;
use super::transport::Connector;

/// Generic dispatch entry point.
///
/// Implementations route the command through their connection handling;
/// the typed methods of [`Commands`] are built on top.
pub trait CommandDispatch {
    /// Execute one command; the first argument is the command name.
    fn execute_command(&mut self, args: &[&[u8]]) -> Result<RespValue>;
}

impl<C: Connector> CommandDispatch for ConnectionManager<C> {
    fn execute_command(&mut self, args: &[&[u8]]) -> Result<RespValue> {
        self.execute_binary(args)
    }
}

/// Typed operations built on [`CommandDispatch`].
pub trait Commands: CommandDispatch {
    /// Send PING and verify the PONG reply.
    fn ping(&mut self) -> Result<bool> {
        match self.execute_command(&[b"PING"])? {
            RespValue::SimpleString(s) => Ok(s == "PONG"),
            _ => Ok(false),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        match self.execute_command(&[b"SET".as_slice(), key.as_bytes(), value])? {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            other => Err(unexpected_reply("SET", &other)),
        }
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.execute_command(&[b"GET".as_slice(), key.as_bytes()])? {
            RespValue::BulkString(data) => Ok(Some(data)),
            RespValue::Null => Ok(None),
            other => Err(unexpected_reply("GET", &other)),
        }
    }

    /// Delete keys; returns the number removed.
    fn del(&mut self, keys: &[&str]) -> Result<i64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(keys.iter().map(|k| k.as_bytes()));
        integer_reply("DEL", self.execute_command(&args)?)
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        integer_reply("EXISTS", self.execute_command(&[b"EXISTS".as_slice(), key.as_bytes()])?)
            .map(|n| n > 0)
    }

    /// Set a hash field; returns the number of fields added.
    fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> Result<i64> {
        integer_reply(
            "HSET",
            self.execute_command(&[b"HSET".as_slice(), key.as_bytes(), field.as_bytes(), value])?,
        )
    }

    fn hget(&mut self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        match self.execute_command(&[b"HGET".as_slice(), key.as_bytes(), field.as_bytes()])? {
            RespValue::BulkString(data) => Ok(Some(data)),
            RespValue::Null => Ok(None),
            other => Err(unexpected_reply("HGET", &other)),
        }
    }

    /// Delete hash fields; returns the number removed.
    fn hdel(&mut self, key: &str, fields: &[&str]) -> Result<i64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(fields.len() + 2);
        args.push(b"HDEL");
        args.push(key.as_bytes());
        args.extend(fields.iter().map(|f| f.as_bytes()));
        integer_reply("HDEL", self.execute_command(&args)?)
    }

    /// Add set members; returns the number newly added.
    fn sadd(&mut self, key: &str, members: &[&str]) -> Result<i64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(members.len() + 2);
        args.push(b"SADD");
        args.push(key.as_bytes());
        args.extend(members.iter().map(|m| m.as_bytes()));
        integer_reply("SADD", self.execute_command(&args)?)
    }

    /// Remove set members; returns the number removed.
    fn srem(&mut self, key: &str, members: &[&str]) -> Result<i64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(members.len() + 2);
        args.push(b"SREM");
        args.push(key.as_bytes());
        args.extend(members.iter().map(|m| m.as_bytes()));
        integer_reply("SREM", self.execute_command(&args)?)
    }

    fn smembers(&mut self, key: &str) -> Result<Vec<Vec<u8>>> {
        match self.execute_command(&[b"SMEMBERS".as_slice(), key.as_bytes()])? {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::BulkString(data) => Ok(data),
                    other => Err(unexpected_reply("SMEMBERS", &other)),
                })
                .collect(),
            other => Err(unexpected_reply("SMEMBERS", &other)),
        }
    }

    fn flushdb(&mut self) -> Result<()> {
        self.execute_command(&[b"FLUSHDB"])?;
        Ok(())
    }

    fn dbsize(&mut self) -> Result<i64> {
        integer_reply("DBSIZE", self.execute_command(&[b"DBSIZE"])?)
    }
}

// Any dispatcher gets the typed surface.
impl<T: CommandDispatch> Commands for T {}

fn integer_reply(command: &str, reply: RespValue) -> Result<i64> {
    match reply {
        RespValue::Integer(n) => Ok(n),
        other => Err(unexpected_reply(command, &other)),
    }
}

fn unexpected_reply(command: &str, reply: &RespValue) -> ClientError {
    ClientError::Command(CommandError::Server(format!(
        "unexpected {} reply: {:?}",
        command, reply
    )))
}
