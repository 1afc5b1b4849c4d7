//! Link layer manager.
//!
//! Owns the stream engine and every session on it. Engine events are
//! drained and routed to sessions by stream handle; sessions are indexed
//! by remote address from birth and by router identity once their
//! handshake completes. The manager never dies from a session error: the
//! failing session is closed and reaped, the rest keep running.

use crate::crypto::SecretKey;
use crate::identity::{AddressInfo, RouterContact, RouterId};
use crate::link::session::{Session, SessionState, SESSION_TIMEOUT_MS};
use crate::link::{LinkError, LinkUpstream};
use crate::transport::udp::{DatagramRx, IcmpHint, UdpEndpoint};
use crate::transport::{StreamEngine, StreamEvent, StreamId, Transmit};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Loop tick interval for timeout checks and reaping.
const TICK_INTERVAL_MS: u64 = 500;

/// Link layer policy knobs.
#[derive(Clone, Copy, Debug)]
pub struct LinkOptions {
    /// Emit discard-message keepalives on idle ready sessions.
    pub keepalive: bool,
    /// Idle time before a session is reaped.
    pub session_timeout_ms: u64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            keepalive: false,
            session_timeout_ms: SESSION_TIMEOUT_MS,
        }
    }
}

/// The link layer: one engine, many sessions.
pub struct LinkManager<E: StreamEngine> {
    engine: E,
    local_rc: RouterContact,
    enc_secret: SecretKey,
    transport_secret: SecretKey,

    sessions: HashMap<StreamId, Session>,
    by_addr: HashMap<SocketAddr, StreamId>,
    by_pubkey: HashMap<RouterId, StreamId>,

    now_ms: u64,
    options: LinkOptions,
}

impl<E: StreamEngine> LinkManager<E> {
    /// Create a manager over an engine.
    ///
    /// `local_rc` must advertise the public half of `transport_secret` in
    /// the address peers will dial.
    pub fn new(
        engine: E,
        local_rc: RouterContact,
        enc_secret: SecretKey,
        transport_secret: SecretKey,
        options: LinkOptions,
        now_ms: u64,
    ) -> Self {
        Self {
            engine,
            local_rc,
            enc_secret,
            transport_secret,
            sessions: HashMap::new(),
            by_addr: HashMap::new(),
            by_pubkey: HashMap::new(),
            now_ms,
            options,
        }
    }

    /// Generate a fresh transport secret key.
    pub fn keygen() -> SecretKey {
        SecretKey::generate()
    }

    /// This link layer's transport secret.
    pub fn transport_secret_key(&self) -> &SecretKey {
        &self.transport_secret
    }

    /// Our signed contact.
    pub fn local_rc(&self) -> &RouterContact {
        &self.local_rc
    }

    /// Link layer name, used in address-info dialects.
    pub fn name(&self) -> &'static str {
        "stream"
    }

    /// Dial preference advertised for this link layer.
    pub fn rank(&self) -> u16 {
        1
    }

    // === Session lifecycle ===

    /// Create an outbound session toward `addr_info`, in the initial state.
    pub fn new_outbound_session(
        &mut self,
        rc: RouterContact,
        addr_info: &AddressInfo,
    ) -> StreamId {
        let stream = self.engine.create_stream();
        let session = Session::outbound(stream, rc, addr_info, self.now_ms);
        debug!(remote = %addr_info.addr, stream = %stream, "new outbound session");
        self.by_addr.insert(addr_info.addr, stream);
        self.sessions.insert(stream, session);
        stream
    }

    /// Start an outbound session's dial.
    pub fn start(&mut self, stream: StreamId) {
        if let Some(session) = self.sessions.get_mut(&stream) {
            session.start(&mut self.engine);
        }
    }

    /// Create and start an outbound session in one step.
    pub fn dial(&mut self, rc: RouterContact, addr_info: &AddressInfo) -> StreamId {
        let stream = self.new_outbound_session(rc, addr_info);
        self.start(stream);
        stream
    }

    /// Submit one link message to an established peer.
    ///
    /// Returns true iff the message was fragmented and queued.
    pub fn send_message_buffer(&mut self, to: &RouterId, buf: &[u8]) -> bool {
        let Some(stream) = self.by_pubkey.get(to).copied() else {
            debug!(router_id = %to, "no session for send");
            return false;
        };
        let Some(session) = self.sessions.get_mut(&stream) else {
            return false;
        };
        match session.queue_write_buffers(buf, self.now_ms) {
            Ok(()) => {
                session.pump_write(&mut self.engine);
                true
            }
            Err(e) => {
                debug!(error = %e, router_id = %to, "send refused");
                false
            }
        }
    }

    // === Event-loop surface ===

    /// Feed one inbound UDP datagram into the engine.
    pub fn recv_from(&mut self, from: SocketAddr, datagram: &[u8], upstream: &mut dyn LinkUpstream) {
        self.engine.process_udp(from, datagram);
        self.drain(upstream);
    }

    /// Forward an ICMP report into the engine.
    pub fn process_icmp(&mut self, hint: IcmpHint) {
        match hint {
            IcmpHint::FragNeeded { from, mtu } => {
                debug!(remote = %from, mtu, "icmp fragmentation needed");
                self.engine.process_icmp_frag_needed(from, mtu);
            }
            IcmpHint::Unreachable { from } => {
                debug!(remote = %from, "icmp destination unreachable");
                self.engine.process_icmp_error(from);
            }
        }
    }

    /// Once-per-loop-turn work: flush deferred acks, route pending events,
    /// and push queued session writes.
    pub fn pump(&mut self, upstream: &mut dyn LinkUpstream) {
        self.engine.issue_deferred_acks();
        self.drain(upstream);
        for session in self.sessions.values_mut() {
            session.pump_write(&mut self.engine);
        }
    }

    /// Periodic work: engine timers, keepalives, and session reaping.
    pub fn tick(&mut self, now_ms: u64, upstream: &mut dyn LinkUpstream) {
        self.now_ms = self.now_ms.max(now_ms);
        self.engine.check_timeouts(self.now_ms);
        self.drain(upstream);

        if self.options.keepalive {
            for session in self.sessions.values_mut() {
                if let Err(e) = session.send_keepalive(self.now_ms) {
                    debug!(error = %e, "keepalive skipped");
                }
            }
        }

        let timeout = self.options.session_timeout_ms;
        let reap: Vec<StreamId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                s.state() == SessionState::Closed || s.is_timed_out(self.now_ms, timeout)
            })
            .map(|(stream, _)| *stream)
            .collect();
        for stream in reap {
            self.reap_session(stream);
        }
    }

    /// Drain the next outbound datagram from the engine.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.engine.poll_transmit()
    }

    /// Close every session. The engine is released when the manager drops.
    pub fn stop(&mut self) {
        info!(sessions = self.sessions.len(), "link layer stopping");
        for session in self.sessions.values_mut() {
            session.close(&mut self.engine);
        }
        self.sessions.clear();
        self.by_addr.clear();
        self.by_pubkey.clear();
    }

    // === Lookups ===

    /// Number of tracked sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session for a peer identity, if established.
    pub fn session_for_pubkey(&self, id: &RouterId) -> Option<&Session> {
        self.by_pubkey
            .get(id)
            .and_then(|stream| self.sessions.get(stream))
    }

    /// Session for a remote address, if tracked.
    pub fn session_for_addr(&self, addr: &SocketAddr) -> Option<&Session> {
        self.by_addr
            .get(addr)
            .and_then(|stream| self.sessions.get(stream))
    }

    /// Whether an established session to this peer exists.
    pub fn has_session_to(&self, id: &RouterId) -> bool {
        self.session_for_pubkey(id)
            .is_some_and(|s| s.state() == SessionState::SessionReady)
    }

    /// Direct engine access for tests.
    #[cfg(test)]
    pub(crate) fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    // === Internal ===

    /// Route every pending engine event to its session.
    fn drain(&mut self, upstream: &mut dyn LinkUpstream) {
        while let Some(event) = self.engine.poll_event() {
            let stream = event.stream();
            match event {
                StreamEvent::Accepted { stream, remote } => {
                    debug!(remote = %remote, stream = %stream, "accepted inbound stream");
                    let session = Session::inbound(stream, remote, self.now_ms);
                    self.by_addr.insert(remote, stream);
                    self.sessions.insert(stream, session);
                }
                StreamEvent::Connected { stream } => {
                    let now = self.now_ms;
                    let Some(session) = self.sessions.get_mut(&stream) else {
                        warn!(stream = %stream, "connect event for unknown stream");
                        continue;
                    };
                    if session.state() == SessionState::Closed {
                        continue;
                    }
                    if let Err(e) = session.outbound_link_established(
                        &mut self.engine,
                        &self.local_rc,
                        &self.enc_secret,
                        now,
                    ) {
                        log_session_error(&e, session.remote_addr());
                        session.close(&mut self.engine);
                    }
                }
                StreamEvent::Writable { stream } => {
                    if let Some(session) = self.sessions.get_mut(&stream) {
                        session.on_writable(&mut self.engine);
                    }
                }
                StreamEvent::Data { stream, bytes } => {
                    let now = self.now_ms;
                    let Some(session) = self.sessions.get_mut(&stream) else {
                        warn!(stream = %stream, "data with no underlying session");
                        continue;
                    };
                    let result = match session.state() {
                        SessionState::Closed => Ok(()),
                        SessionState::SessionReady => session.recv(&bytes, upstream, now),
                        SessionState::LinkEstablished => session.recv_handshake(
                            &bytes,
                            &self.transport_secret,
                            upstream,
                            now,
                        ),
                        other => {
                            debug!(state = %other, stream = %stream, "dropping data");
                            Ok(())
                        }
                    };
                    if let Err(e) = result {
                        log_session_error(&e, session.remote_addr());
                        session.close(&mut self.engine);
                    }
                }
                StreamEvent::Eof { stream } => {
                    if let Some(session) = self.sessions.get_mut(&stream) {
                        debug!(remote = %session.remote_addr(), "got eof");
                        session.close(&mut self.engine);
                    }
                }
                StreamEvent::Error { stream, message } => {
                    if let Some(session) = self.sessions.get_mut(&stream) {
                        warn!(remote = %session.remote_addr(), error = %message, "stream error");
                        session.close(&mut self.engine);
                    }
                }
            }
            self.finish_ready(stream, upstream);
        }
    }

    /// Install the pubkey index entry and notify the router when a session
    /// has just become ready. A colliding entry closes the older session.
    fn finish_ready(&mut self, stream: StreamId, upstream: &mut dyn LinkUpstream) {
        let rc = {
            let Some(session) = self.sessions.get_mut(&stream) else {
                return;
            };
            if !session.take_just_ready() {
                return;
            }
            match session.remote_rc() {
                Some(rc) => rc.clone(),
                None => return,
            }
        };

        if let Some(old) = self.by_pubkey.insert(rc.router_id, stream) {
            if old != stream {
                debug!(router_id = %rc.router_id, "closing older session for peer");
                if let Some(old_session) = self.sessions.get_mut(&old) {
                    old_session.close(&mut self.engine);
                }
            }
        }

        info!(router_id = %rc.router_id, stream = %stream, "link session established");
        upstream.session_established(&rc);
    }

    /// Drop a closed or timed-out session from the table and both indexes.
    fn reap_session(&mut self, stream: StreamId) {
        let Some(mut session) = self.sessions.remove(&stream) else {
            return;
        };
        if session.state() != SessionState::Closed {
            debug!(remote = %session.remote_addr(), "session timed out");
            session.close(&mut self.engine);
        }
        if self.by_addr.get(&session.remote_addr()) == Some(&stream) {
            self.by_addr.remove(&session.remote_addr());
        }
        if let Some(id) = session.remote_router_id() {
            if self.by_pubkey.get(&id) == Some(&stream) {
                self.by_pubkey.remove(&id);
            }
        }
        debug!(remote = %session.remote_addr(), stream = %stream, "reaped session");
    }
}

/// Integrity and key failures log at error level; everything else is
/// ordinary churn.
fn log_session_error(err: &LinkError, remote: SocketAddr) {
    match err {
        LinkError::IntegrityFailed
        | LinkError::SignatureInvalid
        | LinkError::KeyExchangeFailed(_) => {
            error!(remote = %remote, error = %err, "closing session");
        }
        LinkError::TransportEof => {
            debug!(remote = %remote, error = %err, "closing session");
        }
        _ => {
            warn!(remote = %remote, error = %err, "closing session");
        }
    }
}

/// Current wall clock in Unix milliseconds.
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Drive a manager from a UDP endpoint until the datagram channel closes.
///
/// One loop turn per wakeup: feed input, drain ICMP reports, pump
/// sessions, and flush engine transmits onto the socket.
pub async fn run_link_loop<E: StreamEngine>(
    manager: &mut LinkManager<E>,
    endpoint: &UdpEndpoint,
    datagrams: &mut DatagramRx,
    upstream: &mut dyn LinkUpstream,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
    loop {
        tokio::select! {
            maybe = datagrams.recv() => {
                match maybe {
                    Some(datagram) => {
                        manager.recv_from(datagram.from, &datagram.data, upstream);
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                manager.tick(now_unix_ms(), upstream);
            }
        }

        for hint in endpoint.drain_icmp() {
            manager.process_icmp(hint);
        }
        manager.pump(upstream);
        while let Some(transmit) = manager.poll_transmit() {
            if let Err(e) = endpoint.send(transmit.to, &transmit.data) {
                warn!(remote = %transmit.to, error = %e, "transmit failed");
            }
        }
    }
    manager.stop();
}
