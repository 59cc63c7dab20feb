//! Built-in transport driver
//!
//! Synchronous TCP, Unix-socket, and TLS connections with buffered I/O.
//! [`ValkeyConnector`] carries the dial parameters and turns a
//! [`DialTarget`] into a live [`RawConnection`].

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::config::{ConnectionConfig, SocketFlags, TlsConfig};
use crate::utils::{ConnectionError, RespDecoder, RespEncoder, RespValue};

use super::transport::{Connector, DialTarget, Transport};

const STREAM_BUF_SIZE: usize = 16 * 1024;

/// One live connection, TCP, Unix socket, or TLS.
pub struct RawConnection {
    stream: Stream,
    encoder: RespEncoder,
}

enum Stream {
    Tcp {
        reader: BufReader<TcpStream>,
        writer: BufWriter<TcpStream>,
    },
    #[cfg(unix)]
    Unix {
        reader: BufReader<UnixStream>,
        writer: BufWriter<UnixStream>,
    },
    #[cfg(feature = "native-tls-backend")]
    Tls {
        stream: BufReader<native_tls::TlsStream<TcpStream>>,
    },
}

impl Stream {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Stream::Tcp { writer, .. } => writer.write_all(buf),
            #[cfg(unix)]
            Stream::Unix { writer, .. } => writer.write_all(buf),
            #[cfg(feature = "native-tls-backend")]
            Stream::Tls { stream } => stream.get_mut().write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp { writer, .. } => writer.flush(),
            #[cfg(unix)]
            Stream::Unix { writer, .. } => writer.flush(),
            #[cfg(feature = "native-tls-backend")]
            Stream::Tls { stream } => stream.get_mut().flush(),
        }
    }

    fn read_reply(&mut self) -> io::Result<RespValue> {
        match self {
            Stream::Tcp { reader, .. } => RespDecoder::new(reader).decode(),
            #[cfg(unix)]
            Stream::Unix { reader, .. } => RespDecoder::new(reader).decode(),
            #[cfg(feature = "native-tls-backend")]
            Stream::Tls { stream } => RespDecoder::new(stream).decode(),
        }
    }
}

impl Transport for RawConnection {
    fn invoke(&mut self, args: &[&[u8]]) -> io::Result<RespValue> {
        self.encoder.clear();
        self.encoder.encode_command(args);
        self.stream.write_all(self.encoder.as_bytes())?;
        self.stream.flush()?;
        self.stream.read_reply()
    }

    fn shutdown(&mut self) {
        match &mut self.stream {
            Stream::Tcp { writer, .. } => {
                let _ = writer.flush();
                let _ = writer.get_ref().shutdown(Shutdown::Both);
            }
            #[cfg(unix)]
            Stream::Unix { writer, .. } => {
                let _ = writer.flush();
                let _ = writer.get_ref().shutdown(Shutdown::Both);
            }
            #[cfg(feature = "native-tls-backend")]
            Stream::Tls { stream } => {
                let _ = stream.get_mut().shutdown();
            }
        }
    }
}

/// Connector carrying the dial parameters of a [`ConnectionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ValkeyConnector {
    pub connect_timeout: Option<Duration>,
    pub data_timeout: Option<Duration>,
    pub socket_flags: SocketFlags,
    pub tls: Option<TlsConfig>,
}

impl ValkeyConnector {
    /// Extract the dial parameters from a connection configuration.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            data_timeout: config.data_timeout,
            socket_flags: config.socket_flags,
            tls: config.tls.clone(),
        }
    }

    fn dial_tcp(&self, target: &DialTarget, host: &str, port: u16) -> Result<TcpStream, ConnectionError> {
        let stream = match self.connect_timeout {
            Some(timeout) => {
                let addr = (host, port)
                    .to_socket_addrs()
                    .map_err(|e| connect_failed(target, e))?
                    .next()
                    .ok_or_else(|| {
                        connect_failed(
                            target,
                            io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
                        )
                    })?;
                TcpStream::connect_timeout(&addr, timeout)
            }
            None => TcpStream::connect((host, port)),
        }
        .map_err(|e| connect_failed(target, e))?;

        stream.set_nodelay(true).ok();
        stream.set_read_timeout(self.data_timeout).ok();
        stream.set_write_timeout(self.data_timeout).ok();

        if self.socket_flags.contains(SocketFlags::ASYNC_CONNECT)
            || self.socket_flags.contains(SocketFlags::PERSISTENT)
        {
            // std sockets have no async or persistent connect modes
            debug!(flags = self.socket_flags.bits(), "socket flags not supported by this driver");
        }

        Ok(stream)
    }

    #[cfg(unix)]
    fn dial_unix(&self, target: &DialTarget, path: &Path) -> Result<Stream, ConnectionError> {
        let stream = UnixStream::connect(path).map_err(|e| connect_failed(target, e))?;
        stream.set_read_timeout(self.data_timeout).ok();
        stream.set_write_timeout(self.data_timeout).ok();

        let reader = BufReader::with_capacity(
            STREAM_BUF_SIZE,
            stream.try_clone().map_err(|e| connect_failed(target, e))?,
        );
        let writer = BufWriter::with_capacity(STREAM_BUF_SIZE, stream);
        Ok(Stream::Unix { reader, writer })
    }

    #[cfg(not(unix))]
    fn dial_unix(&self, target: &DialTarget, _path: &Path) -> Result<Stream, ConnectionError> {
        Err(connect_failed(
            target,
            io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            ),
        ))
    }

    #[cfg(feature = "native-tls-backend")]
    fn wrap_tls(
        &self,
        host: &str,
        tcp: TcpStream,
        tls: &TlsConfig,
    ) -> Result<Stream, ConnectionError> {
        use native_tls::{Certificate, Identity, TlsConnector};

        let mut builder = TlsConnector::builder();

        if tls.skip_verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }

        if let Some(ref ca_path) = tls.ca_cert {
            let ca = std::fs::read(ca_path)
                .map_err(|e| ConnectionError::TlsFailed(format!("failed to read CA cert: {}", e)))?;
            let cert = Certificate::from_pem(&ca)
                .map_err(|e| ConnectionError::TlsFailed(format!("invalid CA cert: {}", e)))?;
            builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) = (&tls.client_cert, &tls.client_key) {
            let cert = std::fs::read(cert_path).map_err(|e| {
                ConnectionError::TlsFailed(format!("failed to read client cert: {}", e))
            })?;
            let key = std::fs::read(key_path).map_err(|e| {
                ConnectionError::TlsFailed(format!("failed to read client key: {}", e))
            })?;
            let identity = Identity::from_pkcs8(&cert, &key)
                .map_err(|e| ConnectionError::TlsFailed(format!("invalid client identity: {}", e)))?;
            builder.identity(identity);
        }

        let connector = builder
            .build()
            .map_err(|e| ConnectionError::TlsFailed(e.to_string()))?;

        let sni = tls.sni.as_deref().unwrap_or(host);
        let stream = connector
            .connect(sni, tcp)
            .map_err(|e| ConnectionError::TlsFailed(format!("handshake failed: {}", e)))?;

        Ok(Stream::Tls {
            stream: BufReader::with_capacity(STREAM_BUF_SIZE, stream),
        })
    }

    #[cfg(not(feature = "native-tls-backend"))]
    fn wrap_tls(
        &self,
        _host: &str,
        _tcp: TcpStream,
        _tls: &TlsConfig,
    ) -> Result<Stream, ConnectionError> {
        Err(ConnectionError::TlsFailed(
            "TLS support not compiled in".to_string(),
        ))
    }
}

impl Connector for ValkeyConnector {
    type Conn = RawConnection;

    fn dial(&self, target: &DialTarget) -> Result<RawConnection, ConnectionError> {
        let stream = match target {
            DialTarget::Tcp { host, port } => {
                let tcp = self.dial_tcp(target, host, *port)?;
                match &self.tls {
                    Some(tls) => self.wrap_tls(host, tcp, tls)?,
                    None => {
                        let reader = BufReader::with_capacity(
                            STREAM_BUF_SIZE,
                            tcp.try_clone().map_err(|e| connect_failed(target, e))?,
                        );
                        let writer = BufWriter::with_capacity(STREAM_BUF_SIZE, tcp);
                        Stream::Tcp { reader, writer }
                    }
                }
            }
            DialTarget::Unix { path } => self.dial_unix(target, path)?,
        };

        Ok(RawConnection {
            stream,
            encoder: RespEncoder::with_capacity(256),
        })
    }
}

fn connect_failed(target: &DialTarget, source: io::Error) -> ConnectionError {
    ConnectionError::ConnectFailed {
        target: target.connection_string(),
        source,
    }
}
