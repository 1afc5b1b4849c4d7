//! onionlink: the secure link layer of an onion-routing router.
//!
//! Turns a reliable ordered byte stream (a uTP-style engine carried over
//! UDP) into per-peer channels for authenticated, encrypted,
//! length-bounded link messages exchanged between routers.

pub mod config;
pub mod crypto;
pub mod identity;
pub mod link;
pub mod protocol;
pub mod transport;

// Re-export config types
pub use config::{Config, ConfigError, LinkConfig, NodeConfig, UdpConfig};

// Re-export crypto types
pub use crypto::{CryptoError, KexNonce, PubKey, SecretKey, SharedSecret};

// Re-export identity types
pub use identity::{AddressInfo, IdentityError, LocalIdentity, RouterContact, RouterId};

// Re-export protocol types
pub use protocol::{DiscardMessage, LinkIntroMessage, ProtocolError, PROTO_VERSION};

// Re-export link types
pub use link::manager::{run_link_loop, LinkOptions};
pub use link::{LinkError, LinkManager, LinkUpstream, Session, SessionState};

// Re-export transport types
pub use transport::datagram::DatagramEngine;
pub use transport::udp::{Datagram, DatagramRx, IcmpHint, UdpEndpoint};
pub use transport::{StreamEngine, StreamEvent, StreamId, Transmit, TransportError};
