//! Proxying a data channel onto an outbound TCP connection.
//!
//! [`socks`] holds the handshake vocabulary, [`tcp`] the outbound connector
//! seam, and [`relay`] the two per-direction forwarding loops a session runs
//! once connected.

pub mod relay;
pub mod socks;
pub mod tcp;

pub use socks::{Command, Reply, Request, Response};
pub use tcp::{ConnectError, ConnectErrorKind, Connected, TcpConnector, TokioConnector};
