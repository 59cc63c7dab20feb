//! RESP (Redis Serialization Protocol) encoder and decoder
//!
//! Command encoding and streaming reply decoding for the raw transport.
//! Replies are decoded into [`RespValue`]; error replies stay values here
//! and are classified by the dispatcher.

use std::io::{self, BufRead};

/// RESP value types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string (+OK\r\n)
    SimpleString(String),
    /// Error reply (-ERR message\r\n)
    Error(String),
    /// Integer (:1000\r\n)
    Integer(i64),
    /// Bulk string ($6\r\nfoobar\r\n)
    BulkString(Vec<u8>),
    /// Null bulk string or null array ($-1\r\n, *-1\r\n)
    Null,
    /// Array (*2\r\n...)
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Whether this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// String view of a simple or bulk string reply.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Integer view of an integer reply.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Target of a MOVED/ASK redirect error reply, if this is one.
    pub fn redirect_target(&self) -> Option<(String, u16)> {
        match self {
            RespValue::Error(message) => parse_redirect(message),
            _ => None,
        }
    }
}

/// Parse the `host:port` target out of a `MOVED <slot> <host>:<port>` or
/// `ASK <slot> <host>:<port>` error message.
pub fn parse_redirect(message: &str) -> Option<(String, u16)> {
    let mut parts = message.split_whitespace();
    match parts.next() {
        Some("MOVED") | Some("ASK") => {}
        _ => return None,
    }
    let _slot: u16 = parts.next()?.parse().ok()?;
    let (host, port) = parts.next()?.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

/// Command encoder producing RESP arrays of bulk strings
pub struct RespEncoder {
    buf: Vec<u8>,
}

impl RespEncoder {
    /// Create an encoder with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Clear the buffer for reuse.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encode one command; each argument becomes a bulk string.
    pub fn encode_command(&mut self, args: &[&[u8]]) {
        self.buf.push(b'*');
        self.push_int(args.len() as i64);
        self.buf.extend_from_slice(b"\r\n");

        for arg in args {
            self.buf.push(b'$');
            self.push_int(arg.len() as i64);
            self.buf.extend_from_slice(b"\r\n");
            self.buf.extend_from_slice(arg);
            self.buf.extend_from_slice(b"\r\n");
        }
    }

    /// Encode one command from string arguments.
    pub fn encode_command_str(&mut self, args: &[&str]) {
        let raw: Vec<&[u8]> = args.iter().map(|a| a.as_bytes()).collect();
        self.encode_command(&raw);
    }

    #[inline]
    fn push_int(&mut self, value: i64) {
        let mut scratch = itoa::Buffer::new();
        self.buf.extend_from_slice(scratch.format(value).as_bytes());
    }
}

/// Streaming reply decoder
pub struct RespDecoder<R> {
    reader: R,
}

impl<R: BufRead> RespDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Decode the next reply from the stream.
    pub fn decode(&mut self) -> io::Result<RespValue> {
        let line = self.read_line()?;
        let payload = line.get(1..).unwrap_or_default();

        match line.as_bytes()[0] {
            b'+' => Ok(RespValue::SimpleString(payload.to_string())),
            b'-' => Ok(RespValue::Error(payload.to_string())),
            b':' => Ok(RespValue::Integer(parse_int(payload)?)),
            b'$' => self.decode_bulk(parse_int(payload)?),
            b'*' => self.decode_array(parse_int(payload)?),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid RESP type byte: 0x{:02x}", other),
            )),
        }
    }

    fn decode_bulk(&mut self, len: i64) -> io::Result<RespValue> {
        if len < 0 {
            return Ok(RespValue::Null);
        }

        let mut data = vec![0u8; len as usize];
        self.reader.read_exact(&mut data)?;

        // trailing \r\n
        let mut crlf = [0u8; 2];
        self.reader.read_exact(&mut crlf)?;

        Ok(RespValue::BulkString(data))
    }

    fn decode_array(&mut self, count: i64) -> io::Result<RespValue> {
        if count < 0 {
            return Ok(RespValue::Null);
        }

        let mut elements = Vec::with_capacity(count as usize);
        for _ in 0..count {
            elements.push(self.decode()?);
        }
        Ok(RespValue::Array(elements))
    }

    /// Read one header line, without the trailing CRLF. An empty line means
    /// the peer closed mid-reply.
    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::with_capacity(32);
        self.reader.read_line(&mut line)?;

        let trimmed = line.trim_end_matches(&['\r', '\n'][..]);
        if trimmed.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-reply",
            ));
        }
        Ok(trimmed.to_string())
    }
}

fn parse_int(s: &str) -> io::Result<i64> {
    s.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid RESP integer: {:?}", s),
        )
    })
}
