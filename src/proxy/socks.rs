//! Handshake vocabulary shared with the SOCKS front-end.
//!
//! The front-end speaks SOCKS5 to its clients and forwards the CONNECT
//! request over a fresh channel as a JSON text message:
//!
//! ```text
//! → {"command":"TCP_CONNECT","endpoint":{"address":"93.184.216.34","port":80}}
//! ← {"reply":"SUCCEEDED","endpoint":{"address":"10.0.0.5","port":51000}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::net::Endpoint;
use crate::transport::Message;

/// SOCKS5 request commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    TcpConnect,
    TcpBind,
    UdpAssociate,
}

impl Command {
    /// SOCKS5 wire value.
    pub fn code(self) -> u8 {
        match self {
            Command::TcpConnect => 0x01,
            Command::TcpBind => 0x02,
            Command::UdpAssociate => 0x03,
        }
    }
}

/// SOCKS5 reply codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reply {
    Succeeded,
    Failure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    UnsupportedCommand,
    AddressType,
}

impl Reply {
    /// SOCKS5 wire value.
    pub fn code(self) -> u8 {
        match self {
            Reply::Succeeded => 0x00,
            Reply::Failure => 0x01,
            Reply::NotAllowed => 0x02,
            Reply::NetworkUnreachable => 0x03,
            Reply::HostUnreachable => 0x04,
            Reply::ConnectionRefused => 0x05,
            Reply::TtlExpired => 0x06,
            Reply::UnsupportedCommand => 0x07,
            Reply::AddressType => 0x08,
        }
    }

    pub fn is_success(self) -> bool {
        self == Reply::Succeeded
    }
}

/// The request the front-end sends as the first message on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    pub endpoint: Endpoint,
}

impl Request {
    pub fn connect(endpoint: Endpoint) -> Self {
        Self {
            command: Command::TcpConnect,
            endpoint,
        }
    }

    /// Decode a handshake message and check that it asks for TCP_CONNECT.
    pub fn from_message(message: &Message) -> Result<Self> {
        let Message::Text(text) = message else {
            return Err(Error::invalid_message(format!(
                "expected text handshake, got {:?}",
                message
            )));
        };
        let request: Request = serde_json::from_str(text)
            .map_err(|e| Error::invalid_message(format!("malformed handshake {:?}: {}", text, e)))?;
        if request.endpoint.address.is_empty() {
            return Err(Error::invalid_message("empty endpoint address"));
        }
        if request.command != Command::TcpConnect {
            return Err(Error::UnsupportedCommand(format!("{:?}", request.command)));
        }
        Ok(request)
    }

    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// The reply sent back on the same channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub reply: Reply,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

impl Response {
    pub fn new(reply: Reply, endpoint: Option<Endpoint>) -> Self {
        Self { reply, endpoint }
    }

    pub fn from_message(message: &Message) -> Result<Self> {
        match message {
            Message::Text(text) => Ok(serde_json::from_str(text)?),
            Message::Binary(_) => Err(Error::invalid_message("expected text response")),
        }
    }

    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}
