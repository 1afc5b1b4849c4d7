//! Minimal datagram stream engine.
//!
//! Maps each stream one-to-one onto a UDP flow: connects complete
//! immediately (datagram flows have no connection setup), writes leave
//! as datagrams, and a datagram from an unknown source accepts a new
//! stream. There is no retransmission or reorder protection, so the
//! reliable-ordered contract holds only on paths that already preserve
//! it, such as loopback or a quiet LAN. Deployments across real
//! networks supply a uTP-style engine behind the same trait.

use super::{StreamEngine, StreamEvent, StreamId, Transmit};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use tracing::debug;

/// Largest payload placed in a single datagram.
const DATAGRAM_PAYLOAD: usize = 1400;

/// One-stream-per-flow engine over raw datagrams.
#[derive(Default)]
pub struct DatagramEngine {
    next_id: u64,
    peers: HashMap<StreamId, SocketAddr>,
    by_addr: HashMap<SocketAddr, StreamId>,
    events: VecDeque<StreamEvent>,
    transmits: VecDeque<Transmit>,
}

impl DatagramEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamEngine for DatagramEngine {
    fn create_stream(&mut self) -> StreamId {
        self.next_id += 1;
        StreamId::new(self.next_id)
    }

    fn connect(&mut self, stream: StreamId, remote: SocketAddr) {
        self.peers.insert(stream, remote);
        self.by_addr.insert(remote, stream);
        self.events.push_back(StreamEvent::Connected { stream });
    }

    fn write(&mut self, stream: StreamId, data: &[u8]) -> usize {
        let Some(remote) = self.peers.get(&stream).copied() else {
            debug!(stream = %stream, "write on unknown stream");
            return 0;
        };
        for chunk in data.chunks(DATAGRAM_PAYLOAD) {
            self.transmits.push_back(Transmit {
                to: remote,
                data: chunk.to_vec(),
            });
        }
        data.len()
    }

    fn shutdown(&mut self, _stream: StreamId) {}

    fn close(&mut self, stream: StreamId) {
        if let Some(remote) = self.peers.remove(&stream) {
            if self.by_addr.get(&remote) == Some(&stream) {
                self.by_addr.remove(&remote);
            }
        }
    }

    fn process_udp(&mut self, from: SocketAddr, datagram: &[u8]) {
        let stream = match self.by_addr.get(&from) {
            Some(stream) => *stream,
            None => {
                let stream = self.create_stream();
                self.peers.insert(stream, from);
                self.by_addr.insert(from, stream);
                self.events
                    .push_back(StreamEvent::Accepted { stream, remote: from });
                stream
            }
        };
        self.events.push_back(StreamEvent::Data {
            stream,
            bytes: datagram.to_vec(),
        });
    }

    fn process_icmp_error(&mut self, from: SocketAddr) {
        if let Some(stream) = self.by_addr.get(&from).copied() {
            self.events.push_back(StreamEvent::Eof { stream });
        }
    }

    fn process_icmp_frag_needed(&mut self, _from: SocketAddr, _mtu: u32) {}

    fn issue_deferred_acks(&mut self) {}

    fn check_timeouts(&mut self, _now_ms: u64) {}

    fn poll_event(&mut self) -> Option<StreamEvent> {
        self.events.pop_front()
    }

    fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }
}

// ============================================================================
// Tests
// ============================================================================
