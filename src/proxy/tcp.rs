//! Outbound TCP connections.

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::net::{ConnectionInfo, Endpoint};

/// Why an outbound connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    TimedOut,
    NetworkChanged,
    ConnectionReset,
    ConnectionRefused,
    Other,
}

impl ConnectErrorKind {
    pub fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::NetworkDown
            | io::ErrorKind::HostUnreachable => Self::NetworkChanged,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Self::ConnectionReset
            }
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            _ => Self::Other,
        }
    }
}

/// Typed outbound connection failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    pub message: String,
}

impl ConnectError {
    pub fn new(kind: ConnectErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ConnectError {}

impl From<io::Error> for ConnectError {
    fn from(e: io::Error) -> Self {
        Self::new(ConnectErrorKind::from_io(e.kind()), e.to_string())
    }
}

/// An established outbound connection.
pub struct Connected<S> {
    pub stream: S,
    pub info: ConnectionInfo,
}

/// Opens outbound TCP connections on behalf of sessions.
#[async_trait]
pub trait TcpConnector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Connected<Self::Stream>, ConnectError>;
}

/// [`TcpConnector`] over `tokio::net::TcpStream`.
///
/// Host names are resolved by tokio. The session bounds the attempt with
/// its configured connect timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioConnector;

#[async_trait]
impl TcpConnector for TokioConnector {
    type Stream = TcpStream;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Connected<TcpStream>, ConnectError> {
        let stream = TcpStream::connect((endpoint.address.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;

        let info = ConnectionInfo {
            bound: stream.local_addr()?.into(),
            remote: stream.peer_addr()?.into(),
        };
        Ok(Connected { stream, info })
    }
}
