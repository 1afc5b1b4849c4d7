//! Secure link layer.
//!
//! Turns reliable ordered byte streams into per-peer channels carrying
//! authenticated, encrypted, length-bounded link messages. The manager
//! owns the stream engine and the session table; each session performs a
//! one-shot LinkIntro handshake, derives a symmetric session key, and
//! moves traffic as fixed-size sealed fragments.

pub mod fragment;
pub mod manager;
pub mod session;


use crate::crypto::CryptoError;
use crate::identity::RouterContact;
use crate::protocol::ProtocolError;
use thiserror::Error;

pub use fragment::{FragmentBuffer, FRAG_BUF, MAX_LINK_MSG};
pub use manager::LinkManager;
pub use session::{Session, SessionState};

/// Errors that terminate a session.
///
/// Every variant is terminal at the session boundary: the session enters
/// `Closed`, its resources are released, and the upper router only learns
/// that the session went away. None are retried.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("protocol version mismatch: got {got}, want {want}")]
    ProtoVersionMismatch { got: u32, want: u32 },

    #[error("handshake too short: {got} bytes")]
    HandshakeTooShort { got: usize },

    #[error("handshake parse failed: {0}")]
    HandshakeParseFailed(#[from] ProtocolError),

    #[error("router contact signature invalid")]
    SignatureInvalid,

    #[error("key exchange failed: {0}")]
    KeyExchangeFailed(#[from] CryptoError),

    #[error("fragment integrity check failed")]
    IntegrityFailed,

    #[error("invalid fragment length: {len}")]
    LengthInvalid { len: u32 },

    #[error("reassembly overflow: {len} bytes at offset {offset}")]
    ReassemblyOverflow { len: u32, offset: usize },

    #[error("transport write error")]
    TransportWriteError,

    #[error("transport eof")]
    TransportEof,

    #[error("session timed out")]
    SessionTimeout,

    #[error("session not ready")]
    NotReady,

    #[error("upper layer rejected message")]
    MessageRejected,
}

/// Hooks the upper router provides to the link layer.
///
/// Implementations are called from the manager's loop thread only.
pub trait LinkUpstream {
    /// Handle one reassembled link message from an established peer.
    /// Returning `false` closes the session.
    fn handle_link_message(&mut self, from: &RouterContact, msg: &[u8]) -> bool;

    /// A session with this peer reached the ready state.
    fn session_established(&mut self, rc: &RouterContact);
}
