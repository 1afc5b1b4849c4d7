//! Transport layer abstractions.
//!
//! The link layer consumes a connection-oriented, reliable-ordered stream
//! engine (uTP-style) carried over UDP datagrams. The engine is driven
//! through [`StreamEngine`]: datagrams and ICMP hints are fed in, stream
//! events and outbound datagrams are polled out. Streams are addressed by
//! integer [`StreamId`] handles owned by the link layer manager, so no
//! raw user-data pointers cross the boundary.

pub mod datagram;
pub mod udp;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors related to transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint not started")]
    NotStarted,

    #[error("bind failed: {0}")]
    BindFailed(std::io::Error),

    #[error("send failed: {0}")]
    SendFailed(std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unique handle for one stream within an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    /// Create from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream:{}", self.0)
    }
}

/// An event raised by the engine toward the link layer.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A new inbound stream was accepted.
    Accepted { stream: StreamId, remote: SocketAddr },
    /// An outbound connect completed.
    Connected { stream: StreamId },
    /// A previously stalled stream accepts writes again.
    Writable { stream: StreamId },
    /// Ordered bytes arrived on a stream.
    Data { stream: StreamId, bytes: Vec<u8> },
    /// The remote side closed the stream.
    Eof { stream: StreamId },
    /// The stream failed (retransmit exhausted, reset, ...).
    Error { stream: StreamId, message: String },
}

impl StreamEvent {
    /// The stream this event concerns.
    pub fn stream(&self) -> StreamId {
        match self {
            StreamEvent::Accepted { stream, .. }
            | StreamEvent::Connected { stream }
            | StreamEvent::Writable { stream }
            | StreamEvent::Data { stream, .. }
            | StreamEvent::Eof { stream }
            | StreamEvent::Error { stream, .. } => *stream,
        }
    }
}

/// An outbound UDP datagram the engine wants on the wire.
#[derive(Clone, Debug)]
pub struct Transmit {
    /// Destination address.
    pub to: SocketAddr,
    /// Datagram payload.
    pub data: Vec<u8>,
}

/// A reliable-ordered stream engine multiplexed over UDP.
///
/// All calls are non-blocking. After feeding input (`process_udp`,
/// `check_timeouts`, ...) the caller drains `poll_event` and
/// `poll_transmit` until they return `None`.
pub trait StreamEngine {
    /// Allocate a new stream handle for an outbound connection.
    fn create_stream(&mut self) -> StreamId;

    /// Begin connecting a stream to a remote endpoint.
    fn connect(&mut self, stream: StreamId, remote: SocketAddr);

    /// Write bytes to a connected stream. May accept fewer bytes than
    /// offered (backpressure); returns the count accepted.
    fn write(&mut self, stream: StreamId, data: &[u8]) -> usize;

    /// Shut down both directions of a stream.
    fn shutdown(&mut self, stream: StreamId);

    /// Release a stream handle.
    fn close(&mut self, stream: StreamId);

    /// Feed one inbound UDP datagram into the engine.
    fn process_udp(&mut self, from: SocketAddr, datagram: &[u8]);

    /// Inform the engine of an ICMP destination-unreachable for `from`.
    fn process_icmp_error(&mut self, from: SocketAddr);

    /// Inform the engine of an ICMP fragmentation-needed PMTU hint.
    fn process_icmp_frag_needed(&mut self, from: SocketAddr, mtu: u32);

    /// Flush acks the engine has deferred for batching.
    fn issue_deferred_acks(&mut self);

    /// Run the engine's retransmit/keepalive timers.
    fn check_timeouts(&mut self, now_ms: u64);

    /// Drain the next pending stream event.
    fn poll_event(&mut self) -> Option<StreamEvent>;

    /// Drain the next outbound datagram.
    fn poll_transmit(&mut self) -> Option<Transmit>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id() {
        let id = StreamId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert_eq!(format!("{}", id), "stream:42");
    }

    #[test]
    fn test_event_stream_accessor() {
        let id = StreamId::new(7);
        let remote = SocketAddr::from(([127, 0, 0, 1], 9000));
        let events = [
            StreamEvent::Accepted { stream: id, remote },
            StreamEvent::Connected { stream: id },
            StreamEvent::Writable { stream: id },
            StreamEvent::Data {
                stream: id,
                bytes: vec![1],
            },
            StreamEvent::Eof { stream: id },
            StreamEvent::Error {
                stream: id,
                message: "reset".into(),
            },
        ];
        for event in events {
            assert_eq!(event.stream(), id);
        }
    }
}
