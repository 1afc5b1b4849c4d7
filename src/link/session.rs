//! Per-peer link session.
//!
//! A session owns one reliable stream and drives it through the link
//! handshake into fragment traffic. Outbound sessions dial, derive the
//! session key client-side and send the LinkIntro; inbound sessions are
//! born on accept and expect the LinkIntro as their first bytes. After
//! the handshake all traffic is sealed fragments: the session fragments
//! outbound messages into its send queue and reassembles inbound
//! fragments into whole messages for the upper router.
//!
//! Sessions never block. Write backpressure is surfaced as short writes;
//! the session records the offset into the head fragment and resumes when
//! the stream signals writable again.

use crate::crypto::{self, KexNonce, PubKey, SecretKey, SharedSecret};
use crate::identity::{AddressInfo, RouterContact, RouterId};
use crate::link::fragment::{self, FragmentBuffer, FRAG_BUF, MAX_LINK_MSG};
use crate::link::{LinkError, LinkUpstream};
use crate::protocol::{LinkIntroMessage, ProtocolError, PROTO_VERSION};
use crate::transport::{StreamEngine, StreamId};
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Idle time after which a session is reaped.
pub const SESSION_TIMEOUT_MS: u64 = 30 * 1000;

/// Size of the LinkIntro frame header: version and body length.
const INTRO_HDR: usize = 8;

/// Session lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet dialing.
    Initial,
    /// Outbound connect in flight.
    Connecting,
    /// Stream is up; handshake not yet done.
    LinkEstablished,
    /// Outbound key exchange in progress.
    CryptoHandshake,
    /// Handshake complete; fragment traffic flows.
    SessionReady,
    /// Terminal. The session no longer sends, receives, or delivers.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Initial => "initial",
            SessionState::Connecting => "connecting",
            SessionState::LinkEstablished => "link_established",
            SessionState::CryptoHandshake => "crypto_handshake",
            SessionState::SessionReady => "session_ready",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// One peer link over one stream.
pub struct Session {
    stream: StreamId,
    state: SessionState,
    remote_addr: SocketAddr,

    /// Peer contact: known up front for outbound, learned from the LinkIntro
    /// for inbound.
    remote_rc: Option<RouterContact>,

    /// Peer transport key, known only for outbound sessions.
    remote_transport_pk: Option<PubKey>,

    /// Symmetric key; zero until the handshake derives it.
    session_key: SharedSecret,

    /// Sealed fragments waiting for the stream, plus the byte offset the
    /// stream has already accepted of the head fragment.
    sendq: VecDeque<FragmentBuffer>,
    send_buf_offset: usize,

    /// Partial inbound fragment (or partial LinkIntro while handshaking).
    recv_buf: [u8; FRAG_BUF],
    recv_buf_offset: usize,

    /// Message reassembly buffer.
    recv_msg: Box<[u8]>,
    recv_msg_offset: usize,

    stalled: bool,
    got_lim: bool,
    last_active_ms: u64,

    /// Set when the session enters `SessionReady`; the manager takes it to
    /// install the pubkey index entry and notify the router.
    just_ready: bool,
}

impl Session {
    /// Create an outbound session toward a known contact.
    pub fn outbound(
        stream: StreamId,
        rc: RouterContact,
        addr_info: &AddressInfo,
        now_ms: u64,
    ) -> Self {
        let mut session = Self::base(stream, addr_info.addr, now_ms);
        session.remote_transport_pk = Some(addr_info.transport_pubkey);
        session.remote_rc = Some(rc);
        session
    }

    /// Create an inbound session from an accepted stream.
    pub fn inbound(stream: StreamId, remote_addr: SocketAddr, now_ms: u64) -> Self {
        let mut session = Self::base(stream, remote_addr, now_ms);
        session.state = SessionState::LinkEstablished;
        session
    }

    fn base(stream: StreamId, remote_addr: SocketAddr, now_ms: u64) -> Self {
        Self {
            stream,
            state: SessionState::Initial,
            remote_addr,
            remote_rc: None,
            remote_transport_pk: None,
            session_key: SharedSecret::zero(),
            sendq: VecDeque::new(),
            send_buf_offset: 0,
            recv_buf: [0u8; FRAG_BUF],
            recv_buf_offset: 0,
            recv_msg: vec![0u8; MAX_LINK_MSG].into_boxed_slice(),
            recv_msg_offset: 0,
            stalled: false,
            got_lim: false,
            last_active_ms: now_ms,
            just_ready: false,
        }
    }

    // === Accessors ===

    /// The stream carrying this session.
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Remote socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Remote contact, if known.
    pub fn remote_rc(&self) -> Option<&RouterContact> {
        self.remote_rc.as_ref()
    }

    /// Remote identity key, if known.
    pub fn remote_router_id(&self) -> Option<RouterId> {
        self.remote_rc.as_ref().map(|rc| rc.router_id)
    }

    /// Whether the link is up (handshake done or stream established).
    pub fn is_established(&self) -> bool {
        matches!(
            self.state,
            SessionState::SessionReady | SessionState::LinkEstablished
        )
    }

    /// Fragments waiting in the send queue.
    pub fn send_queue_len(&self) -> usize {
        self.sendq.len()
    }

    /// Whether the stream last refused part of a write.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Timestamp of the last send submission or successful receive.
    pub fn last_active_ms(&self) -> u64 {
        self.last_active_ms
    }

    /// Check idleness against a timeout.
    pub fn is_timed_out(&self, now_ms: u64, timeout_ms: u64) -> bool {
        if now_ms < self.last_active_ms {
            return false;
        }
        now_ms - self.last_active_ms >= timeout_ms
    }

    /// Take the ready-transition flag (set once per session).
    pub(crate) fn take_just_ready(&mut self) -> bool {
        std::mem::take(&mut self.just_ready)
    }

    fn alive(&mut self, now_ms: u64) {
        self.last_active_ms = self.last_active_ms.max(now_ms);
    }

    // === Outbound handshake ===

    /// Begin the outbound dial.
    pub fn start(&mut self, engine: &mut dyn StreamEngine) {
        engine.connect(self.stream, self.remote_addr);
        self.state = SessionState::Connecting;
    }

    /// The outbound stream connected: derive the key, send the LinkIntro,
    /// and enter the ready state.
    pub fn outbound_link_established(
        &mut self,
        engine: &mut dyn StreamEngine,
        local_rc: &RouterContact,
        enc_secret: &SecretKey,
        now_ms: u64,
    ) -> Result<(), LinkError> {
        debug!(remote = %self.remote_addr, "link established");
        self.state = SessionState::CryptoHandshake;

        let nonce = KexNonce::random();
        self.got_lim = true;

        let remote_pk = self.remote_transport_pk.ok_or(LinkError::NotReady)?;
        self.session_key = crypto::transport_dh_client(enc_secret, &remote_pk, &nonce)?;

        self.send_handshake(engine, local_rc, &nonce)?;
        self.enter_ready(now_ms);
        Ok(())
    }

    /// Send our signed contact and the key-exchange nonce, in plaintext,
    /// as the one-shot LinkIntro frame.
    fn send_handshake(
        &mut self,
        engine: &mut dyn StreamEngine,
        local_rc: &RouterContact,
        nonce: &KexNonce,
    ) -> Result<(), LinkError> {
        let lim = LinkIntroMessage {
            rc: local_rc.clone(),
            nonce: *nonce,
        };
        let body = lim.encode();
        if INTRO_HDR + body.len() > FRAG_BUF {
            return Err(LinkError::HandshakeParseFailed(ProtocolError::BodyTooLarge {
                max: FRAG_BUF - INTRO_HDR,
                got: body.len(),
            }));
        }

        let mut frame = FragmentBuffer::zeroed();
        let buf = frame.as_mut_bytes();
        buf[..4].copy_from_slice(&PROTO_VERSION.to_be_bytes());
        buf[4..INTRO_HDR].copy_from_slice(&(body.len() as u32).to_be_bytes());
        buf[INTRO_HDR..INTRO_HDR + body.len()].copy_from_slice(&body);

        let frame_len = INTRO_HDR + body.len();
        debug!(bytes = frame_len, remote = %self.remote_addr, "sending handshake");
        let accepted = engine.write(self.stream, &buf[..frame_len]);
        if accepted != frame_len {
            warn!(
                remote = %self.remote_addr,
                accepted,
                expected = frame_len,
                "handshake write refused"
            );
            return Err(LinkError::TransportWriteError);
        }
        Ok(())
    }

    // === Inbound handshake ===

    /// Consume handshake bytes on an inbound session.
    ///
    /// Partial frames are buffered until the 8-byte header and the full
    /// LinkIntro body have arrived; anything after the frame in the same
    /// delivery is the first ciphertext and goes through [`Session::recv`].
    pub fn recv_handshake(
        &mut self,
        data: &[u8],
        transport_secret: &SecretKey,
        upstream: &mut dyn LinkUpstream,
        now_ms: u64,
    ) -> Result<(), LinkError> {
        if self.got_lim {
            return Err(LinkError::HandshakeParseFailed(
                ProtocolError::WrongMessageType,
            ));
        }
        let mut rest = data;
        debug!(bytes = rest.len(), remote = %self.remote_addr, "recv handshake");

        if self.recv_buf_offset < INTRO_HDR {
            let take = (INTRO_HDR - self.recv_buf_offset).min(rest.len());
            self.recv_buf[self.recv_buf_offset..self.recv_buf_offset + take]
                .copy_from_slice(&rest[..take]);
            self.recv_buf_offset += take;
            rest = &rest[take..];
            if self.recv_buf_offset < INTRO_HDR {
                return Ok(());
            }

            let version = u32::from_be_bytes(
                self.recv_buf[..4]
                    .try_into()
                    .map_err(|_| LinkError::HandshakeTooShort { got: INTRO_HDR })?,
            );
            if version != PROTO_VERSION {
                return Err(LinkError::ProtoVersionMismatch {
                    got: version,
                    want: PROTO_VERSION,
                });
            }
            let limsz = self.intro_body_len()?;
            if limsz == 0 {
                return Err(LinkError::HandshakeTooShort { got: INTRO_HDR });
            }
            if INTRO_HDR + limsz > FRAG_BUF {
                return Err(LinkError::HandshakeParseFailed(ProtocolError::BodyTooLarge {
                    max: FRAG_BUF - INTRO_HDR,
                    got: limsz,
                }));
            }
        }

        let frame_len = INTRO_HDR + self.intro_body_len()?;
        if self.recv_buf_offset < frame_len {
            let take = (frame_len - self.recv_buf_offset).min(rest.len());
            self.recv_buf[self.recv_buf_offset..self.recv_buf_offset + take]
                .copy_from_slice(&rest[..take]);
            self.recv_buf_offset += take;
            rest = &rest[take..];
            if self.recv_buf_offset < frame_len {
                return Ok(());
            }
        }

        let lim = LinkIntroMessage::decode(&self.recv_buf[INTRO_HDR..frame_len])?;
        lim.rc.verify().map_err(|_| LinkError::SignatureInvalid)?;

        self.session_key =
            crypto::transport_dh_server(transport_secret, &lim.rc.enc_key, &lim.nonce)?;
        debug!(
            remote = %self.remote_addr,
            router_id = %lim.rc.router_id,
            "handshake complete"
        );
        self.remote_rc = Some(lim.rc);
        self.got_lim = true;
        self.recv_buf_offset = 0;
        self.enter_ready(now_ms);

        if !rest.is_empty() {
            debug!(bytes = rest.len(), "handshake carried first ciphertext");
            self.recv(rest, upstream, now_ms)?;
        }
        Ok(())
    }

    fn intro_body_len(&self) -> Result<usize, LinkError> {
        let limsz = u32::from_be_bytes(
            self.recv_buf[4..INTRO_HDR]
                .try_into()
                .map_err(|_| LinkError::HandshakeTooShort { got: INTRO_HDR })?,
        );
        Ok(limsz as usize)
    }

    fn enter_ready(&mut self, now_ms: u64) {
        self.state = SessionState::SessionReady;
        self.just_ready = true;
        self.alive(now_ms);
    }

    // === Send path ===

    /// Fragment, seal, and queue one link message.
    ///
    /// Fails with `NotReady` off the ready state and `LengthInvalid` for
    /// oversize messages. An empty message queues nothing.
    pub fn queue_write_buffers(&mut self, buf: &[u8], now_ms: u64) -> Result<(), LinkError> {
        if self.state != SessionState::SessionReady {
            warn!(
                bytes = buf.len(),
                state = %self.state,
                remote = %self.remote_addr,
                "refusing send on non-ready session"
            );
            return Err(LinkError::NotReady);
        }
        if buf.len() > MAX_LINK_MSG {
            return Err(LinkError::LengthInvalid {
                len: buf.len() as u32,
            });
        }
        self.alive(now_ms);

        let mut rest = buf;
        while !rest.is_empty() {
            let take = rest.len().min(fragment::FRAG_BODY_PAYLOAD);
            let is_last = rest.len() == take;
            let frag = fragment::seal(&self.session_key, &rest[..take], is_last)?;
            self.sendq.push_back(frag);
            rest = &rest[take..];
        }
        Ok(())
    }

    /// Push queued fragments into the stream until it refuses bytes.
    ///
    /// A short write records the offset into the head fragment and stalls
    /// the session until the next writable event.
    pub fn pump_write(&mut self, engine: &mut dyn StreamEngine) {
        while !self.stalled {
            let Some(front) = self.sendq.front() else {
                break;
            };
            let expect = FRAG_BUF - self.send_buf_offset;
            let accepted = engine.write(self.stream, &front.as_bytes()[self.send_buf_offset..]);
            if accepted != expect {
                debug!(
                    offset = self.send_buf_offset,
                    accepted,
                    remote = %self.remote_addr,
                    "write stalled"
                );
                self.send_buf_offset += accepted;
                self.stalled = true;
            } else {
                self.send_buf_offset = 0;
                self.sendq.pop_front();
            }
        }
    }

    /// The stream accepts writes again.
    pub fn on_writable(&mut self, engine: &mut dyn StreamEngine) {
        if self.is_established() {
            debug!(remote = %self.remote_addr, "write resumed");
            self.stalled = false;
            self.pump_write(engine);
        }
    }

    /// Queue a discard message if nothing else is waiting.
    ///
    /// Keepalive policy hook; the caller decides whether keepalives are on.
    pub fn send_keepalive(&mut self, now_ms: u64) -> Result<(), LinkError> {
        if self.state != SessionState::SessionReady || !self.sendq.is_empty() {
            return Ok(());
        }
        let body = crate::protocol::DiscardMessage.encode();
        self.queue_write_buffers(&body, now_ms)
    }

    // === Receive path ===

    /// Consume ordered stream bytes on a ready session.
    ///
    /// Completes any partial fragment first, then opens every whole
    /// fragment in the input, and finally carries the residue into the
    /// receive buffer. Reassembled messages are handed to `upstream` as
    /// each last fragment arrives.
    pub fn recv(
        &mut self,
        data: &[u8],
        upstream: &mut dyn LinkUpstream,
        now_ms: u64,
    ) -> Result<(), LinkError> {
        if self.state != SessionState::SessionReady {
            warn!(state = %self.state, remote = %self.remote_addr, "recv on non-ready session");
            return Err(LinkError::NotReady);
        }
        self.alive(now_ms);
        let mut rest = data;

        if self.recv_buf_offset > 0 {
            let left = FRAG_BUF - self.recv_buf_offset;
            if rest.len() >= left {
                self.recv_buf[self.recv_buf_offset..].copy_from_slice(&rest[..left]);
                rest = &rest[left..];
                self.recv_buf_offset = 0;
                let mut frag = self.recv_buf;
                self.open_and_append(&mut frag, upstream)?;
            } else {
                self.recv_buf[self.recv_buf_offset..self.recv_buf_offset + rest.len()]
                    .copy_from_slice(rest);
                self.recv_buf_offset += rest.len();
                return Ok(());
            }
        }

        while rest.len() >= FRAG_BUF {
            let mut frag = [0u8; FRAG_BUF];
            frag.copy_from_slice(&rest[..FRAG_BUF]);
            self.open_and_append(&mut frag, upstream)?;
            rest = &rest[FRAG_BUF..];
        }

        if !rest.is_empty() {
            self.recv_buf[..rest.len()].copy_from_slice(rest);
            self.recv_buf_offset = rest.len();
        }
        Ok(())
    }

    /// Open one wire fragment and append its payload to the reassembly
    /// buffer, delivering the message on the last fragment.
    fn open_and_append(
        &mut self,
        frag: &mut [u8; FRAG_BUF],
        upstream: &mut dyn LinkUpstream,
    ) -> Result<(), LinkError> {
        let (len, is_last) = fragment::open_in_place(&self.session_key, frag)?;
        if self.recv_msg_offset + len > MAX_LINK_MSG {
            return Err(LinkError::ReassemblyOverflow {
                len: len as u32,
                offset: self.recv_msg_offset,
            });
        }

        let start = fragment::PAYLOAD_OFFSET;
        self.recv_msg[self.recv_msg_offset..self.recv_msg_offset + len]
            .copy_from_slice(&frag[start..start + len]);
        self.recv_msg_offset += len;

        if is_last {
            let rc = self.remote_rc.as_ref().ok_or(LinkError::NotReady)?;
            let handled = upstream.handle_link_message(rc, &self.recv_msg[..self.recv_msg_offset]);
            self.recv_msg_offset = 0;
            if !handled {
                warn!(remote = %self.remote_addr, "upper layer rejected message");
                return Err(LinkError::MessageRejected);
            }
        }
        Ok(())
    }

    // === Teardown ===

    /// Close the session. Idempotent; pending sends are dropped and no
    /// further data moves in either direction.
    pub fn close(&mut self, engine: &mut dyn StreamEngine) {
        if self.state != SessionState::Closed {
            debug!(remote = %self.remote_addr, stream = %self.stream, "closing session");
            engine.shutdown(self.stream);
            engine.close(self.stream);
        }
        self.state = SessionState::Closed;
        self.sendq.clear();
        self.send_buf_offset = 0;
        self.stalled = false;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("stream", &self.stream)
            .field("state", &self.state)
            .field("remote_addr", &self.remote_addr)
            .field("remote_router_id", &self.remote_router_id())
            .field("sendq", &self.sendq.len())
            .field("stalled", &self.stalled)
            .field("last_active_ms", &self.last_active_ms)
            .finish()
    }
}
