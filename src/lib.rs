//! # peerproxy
//!
//! Data path of a peer-to-peer SOCKS tunnel: the exit side of the tunnel
//! turns channels opened by a peer into outbound TCP connections.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Supervisor: one transport, label → Session             │
//! ├─────────────────────────────────────────────────────────┤
//! │  Session: handshake, policy, connect, relay             │
//! ├─────────────────────────────────────────────────────────┤
//! │  Pool (optional): reusable channels, OPEN/CLOSE         │
//! ├─────────────────────────────────────────────────────────┤
//! │  Transport (external): negotiated peer connection       │
//! └─────────────────────────────────────────────────────────┘
//!        Obfuscation: SDP candidate filtering and rewriting
//! ```
//!
//! ## Design Goals
//!
//! 1. **Containment**: one misbehaving peer channel or target host never
//!    takes down other sessions
//! 2. **Policy**: targets on local networks are refused unless allowed
//! 3. **Ordering**: bytes are relayed in order with per-direction
//!    backpressure
//! 4. **Reuse**: closed channels are recycled instead of renegotiated

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod net;
pub mod obfuscation;
pub mod pool;
pub mod proxy;
pub mod server;
pub mod sync;
pub mod transport;

pub use error::{Error, Result};
pub use net::{ConnectionInfo, Endpoint};
pub use pool::{Pool, PoolChannel};
pub use server::{ProxyConfig, Session, SessionState, Supervisor};
pub use transport::{DataChannel, Message, TransportConnection};

/// Default outbound connect timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default bound on a stopping session's channel close handshake (seconds)
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;
