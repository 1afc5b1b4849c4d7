//! Scripted in-memory stream engine for tests.
//!
//! Records every call the link layer makes and lets tests inject events,
//! meter write capacity (to simulate backpressure short-writes) and read
//! back the byte stream each session produced.

use super::{StreamEngine, StreamEvent, StreamId, Transmit};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

#[derive(Default)]
pub(crate) struct MockEngine {
    next_id: u64,
    events: VecDeque<StreamEvent>,
    transmits: VecDeque<Transmit>,
    /// Bytes each stream accepted, in order.
    pub written: HashMap<StreamId, Vec<u8>>,
    /// Remaining write budget per stream; absent means unlimited.
    capacity: HashMap<StreamId, usize>,
    pub connects: Vec<(StreamId, SocketAddr)>,
    pub shutdowns: Vec<StreamId>,
    pub closes: Vec<StreamId>,
    pub datagrams: Vec<(SocketAddr, Vec<u8>)>,
    pub icmp_errors: Vec<SocketAddr>,
    pub icmp_frag_hints: Vec<(SocketAddr, u32)>,
    pub ack_flushes: usize,
    pub timeout_checks: Vec<u64>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the link layer to observe.
    pub fn push_event(&mut self, event: StreamEvent) {
        self.events.push_back(event);
    }

    /// Queue an outbound datagram for the driver to flush.
    pub fn push_transmit(&mut self, transmit: Transmit) {
        self.transmits.push_back(transmit);
    }

    /// Meter the write budget of a stream. Further writes accept at most
    /// this many bytes in total until the budget is raised again.
    pub fn set_write_capacity(&mut self, stream: StreamId, capacity: usize) {
        self.capacity.insert(stream, capacity);
    }

    /// Remove the write meter, making the stream accept everything.
    pub fn clear_write_capacity(&mut self, stream: StreamId) {
        self.capacity.remove(&stream);
    }

    /// Take the bytes a stream has accepted so far.
    pub fn take_written(&mut self, stream: StreamId) -> Vec<u8> {
        self.written.remove(&stream).unwrap_or_default()
    }

    /// Total bytes a stream has accepted so far.
    pub fn written_len(&self, stream: StreamId) -> usize {
        self.written.get(&stream).map_or(0, Vec::len)
    }
}

impl StreamEngine for MockEngine {
    fn create_stream(&mut self) -> StreamId {
        self.next_id += 1;
        StreamId::new(self.next_id)
    }

    fn connect(&mut self, stream: StreamId, remote: SocketAddr) {
        self.connects.push((stream, remote));
    }

    fn write(&mut self, stream: StreamId, data: &[u8]) -> usize {
        let accepted = match self.capacity.get_mut(&stream) {
            Some(budget) => {
                let n = (*budget).min(data.len());
                *budget -= n;
                n
            }
            None => data.len(),
        };
        self.written
            .entry(stream)
            .or_default()
            .extend_from_slice(&data[..accepted]);
        accepted
    }

    fn shutdown(&mut self, stream: StreamId) {
        self.shutdowns.push(stream);
    }

    fn close(&mut self, stream: StreamId) {
        self.closes.push(stream);
    }

    fn process_udp(&mut self, from: SocketAddr, datagram: &[u8]) {
        self.datagrams.push((from, datagram.to_vec()));
    }

    fn process_icmp_error(&mut self, from: SocketAddr) {
        self.icmp_errors.push(from);
    }

    fn process_icmp_frag_needed(&mut self, from: SocketAddr, mtu: u32) {
        self.icmp_frag_hints.push((from, mtu));
    }

    fn issue_deferred_acks(&mut self) {
        self.ack_flushes += 1;
    }

    fn check_timeouts(&mut self, now_ms: u64) {
        self.timeout_checks.push(now_ms);
    }

    fn poll_event(&mut self) -> Option<StreamEvent> {
        self.events.pop_front()
    }

    fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }
}
