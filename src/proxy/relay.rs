//! Per-direction relay loops between a TCP stream and a data channel.
//!
//! Each loop pulls one unit, forwards it, accounts for it, and only then
//! pulls the next. That keeps order within a direction and gives simple
//! backpressure: a slow sink stalls its own reader and nothing else.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::server::metrics::{SessionCounters, TrafficSink};
use crate::transport::{DataChannel, Message, MAX_MESSAGE_SIZE};

/// How the socket side of a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketCloseKind {
    /// We closed the socket
    WeClosedIt,
    /// The remote host closed its side
    RemotelyClosed,
    /// Reading failed
    Errored(io::ErrorKind),
}

/// How the channel side of a relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEnd {
    /// The channel closed and its queue is drained
    Closed,
    /// The peer sent a text message where only payload was expected
    UnexpectedText(String),
}

/// Forward socket reads to the channel until the socket closes.
pub async fn socket_to_channel<R, C>(
    label: &str,
    reader: &mut R,
    channel: &C,
    counters: &SessionCounters,
    sent_to_peer: &TrafficSink,
) -> SocketCloseKind
where
    R: AsyncRead + Unpin + ?Sized,
    C: DataChannel + ?Sized,
{
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    loop {
        counters.set_socket_reading(true);
        let read = reader.read(&mut buf).await;
        counters.set_socket_reading(false);

        let n = match read {
            Ok(0) => return SocketCloseKind::RemotelyClosed,
            Ok(n) => n,
            Err(e) => return SocketCloseKind::Errored(e.kind()),
        };
        counters.add_socket_received(n as u64);
        counters.set_socket_pending(1);
        tracing::debug!("session {}: socket received {} bytes", label, n);

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        match channel.send(Message::Binary(chunk)).await {
            Ok(()) => {
                counters.add_channel_sent(n as u64);
                sent_to_peer.record(n as u64);
            }
            Err(e) => {
                tracing::error!("session {}: failed to send data on channel: {}", label, e);
            }
        }
        counters.set_socket_pending(0);
    }
}

/// Forward channel messages to the socket until the channel closes.
pub async fn channel_to_socket<W, C>(
    label: &str,
    channel: &C,
    writer: &mut W,
    counters: &SessionCounters,
    received_from_peer: &TrafficSink,
) -> ChannelEnd
where
    W: AsyncWrite + Unpin + ?Sized,
    C: DataChannel + ?Sized,
{
    loop {
        let data = match channel.recv().await {
            None => return ChannelEnd::Closed,
            Some(Message::Text(text)) => return ChannelEnd::UnexpectedText(text),
            Some(Message::Binary(data)) => data,
        };
        let n = data.len() as u64;
        counters.add_channel_received(n);
        received_from_peer.record(n);
        tracing::debug!("session {}: channel received {} bytes", label, n);

        match writer.write_all(&data).await {
            Ok(()) => counters.add_socket_sent(n),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                // Data still queued on the channel after the socket closed
                tracing::warn!("session {}: tried to send data on closed socket", label);
            }
            Err(e) => {
                tracing::error!("session {}: failed to send data on socket: {}", label, e);
            }
        }
    }
}
