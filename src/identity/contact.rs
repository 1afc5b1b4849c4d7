//! Signed router contacts.
//!
//! A `RouterContact` is the self-signed descriptor a router hands to its
//! peers during the link handshake: its identity key, long-term encryption
//! key, and the addresses (with per-link-layer transport keys) it can be
//! dialed at. The signature covers the canonical encoding of every field
//! except the signature itself.

use super::{verify_signature, IdentityError, LocalIdentity, RouterId, SIGNATURE_SIZE};
use crate::crypto::{PubKey, KEY_SIZE};
use crate::protocol::bencode::{dict_field, DictBuilder, Value};
use crate::protocol::{ProtocolError, PROTO_VERSION};
use std::fmt;
use std::net::SocketAddr;

/// One dialable address of a router.
///
/// Each address carries the transport public key of the link layer
/// listening there and a rank used to order dial attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressInfo {
    /// Dial preference, lower first.
    pub rank: u16,
    /// Transport public key of the link layer at this address.
    pub transport_pubkey: PubKey,
    /// Socket address to dial.
    pub addr: SocketAddr,
}

impl AddressInfo {
    fn to_value(&self) -> Value {
        DictBuilder::new()
            .insert("a", Value::bytes(self.addr.ip().to_string().into_bytes()))
            .insert("k", Value::bytes(&self.transport_pubkey.as_bytes()[..]))
            .insert("p", Value::Int(i64::from(self.addr.port())))
            .insert("r", Value::Int(i64::from(self.rank)))
            .build()
    }

    fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let dict = value.as_dict().ok_or(ProtocolError::WrongFieldType("a"))?;

        let ip_bytes = dict_field(dict, "a")?
            .as_bytes()
            .ok_or(ProtocolError::WrongFieldType("a"))?;
        let ip = std::str::from_utf8(ip_bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(ProtocolError::WrongFieldType("a"))?;

        let key = fixed_bytes::<KEY_SIZE>(dict_field(dict, "k")?, "k")?;

        let port = dict_field(dict, "p")?
            .as_int()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or(ProtocolError::WrongFieldType("p"))?;

        let rank = dict_field(dict, "r")?
            .as_int()
            .and_then(|r| u16::try_from(r).ok())
            .ok_or(ProtocolError::WrongFieldType("r"))?;

        Ok(Self {
            rank,
            transport_pubkey: PubKey::from_bytes(key),
            addr: SocketAddr::new(ip, port),
        })
    }
}

impl fmt::Display for AddressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (rank {})", self.addr, self.rank)
    }
}

/// A router's signed contact descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterContact {
    /// Dialable addresses.
    pub addrs: Vec<AddressInfo>,
    /// Long-term X25519 encryption key.
    pub enc_key: PubKey,
    /// Identity (Ed25519 verifying) key.
    pub router_id: RouterId,
    /// Unix milliseconds of the last update.
    pub last_updated: u64,
    /// Ed25519 signature over the encoding minus this field.
    pub signature: [u8; SIGNATURE_SIZE],
}

impl RouterContact {
    /// Build and sign a contact for the local identity.
    pub fn new_signed(
        identity: &LocalIdentity,
        addrs: Vec<AddressInfo>,
        last_updated: u64,
    ) -> Self {
        let mut rc = Self {
            addrs,
            enc_key: identity.encryption_public(),
            router_id: identity.router_id(),
            last_updated,
            signature: [0u8; SIGNATURE_SIZE],
        };
        rc.signature = identity.sign(&rc.signing_payload());
        rc
    }

    /// Encode including the signature.
    pub fn encode(&self) -> Vec<u8> {
        self.to_value(true).to_vec()
    }

    /// The canonical bytes the signature covers.
    pub fn signing_payload(&self) -> Vec<u8> {
        self.to_value(false).to_vec()
    }

    /// Decode from canonical bytes. Does not verify the signature.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_value(&Value::decode(data)?)
    }

    /// Check the embedded signature against the identity key.
    pub fn verify(&self) -> Result<(), IdentityError> {
        verify_signature(&self.router_id, &self.signing_payload(), &self.signature)
    }

    /// The best-ranked address, if any.
    pub fn best_addr(&self) -> Option<&AddressInfo> {
        self.addrs.iter().min_by_key(|ai| ai.rank)
    }

    fn to_value(&self, include_signature: bool) -> Value {
        let addrs = Value::List(self.addrs.iter().map(AddressInfo::to_value).collect());
        let mut builder = DictBuilder::new()
            .insert("a", addrs)
            .insert("e", Value::bytes(&self.enc_key.as_bytes()[..]))
            .insert("k", Value::bytes(&self.router_id.as_bytes()[..]))
            .insert("u", Value::Int(self.last_updated as i64))
            .insert("v", Value::Int(i64::from(PROTO_VERSION)));
        if include_signature {
            builder = builder.insert("z", Value::bytes(&self.signature[..]));
        }
        builder.build()
    }

    /// Decode from an already-parsed value (used by the intro message).
    pub(crate) fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let dict = value.as_dict().ok_or(ProtocolError::WrongFieldType("r"))?;

        let version = dict_field(dict, "v")?
            .as_int()
            .ok_or(ProtocolError::WrongFieldType("v"))?;
        if version != i64::from(PROTO_VERSION) {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let addrs = dict_field(dict, "a")?
            .as_list()
            .ok_or(ProtocolError::WrongFieldType("a"))?
            .iter()
            .map(AddressInfo::from_value)
            .collect::<Result<Vec<_>, _>>()?;

        let enc_key = fixed_bytes::<KEY_SIZE>(dict_field(dict, "e")?, "e")?;
        let router_id = fixed_bytes::<KEY_SIZE>(dict_field(dict, "k")?, "k")?;
        let signature = fixed_bytes::<SIGNATURE_SIZE>(dict_field(dict, "z")?, "z")?;

        let last_updated = dict_field(dict, "u")?
            .as_int()
            .and_then(|u| u64::try_from(u).ok())
            .ok_or(ProtocolError::WrongFieldType("u"))?;

        Ok(Self {
            addrs,
            enc_key: PubKey::from_bytes(enc_key),
            router_id: RouterId::from_bytes(router_id),
            last_updated,
            signature,
        })
    }

    pub(crate) fn as_value(&self) -> Value {
        self.to_value(true)
    }
}

fn fixed_bytes<const N: usize>(value: &Value, field: &'static str) -> Result<[u8; N], ProtocolError> {
    let bytes = value.as_bytes().ok_or(ProtocolError::WrongFieldType(field))?;
    bytes
        .try_into()
        .map_err(|_| ProtocolError::WrongFieldLength {
            field,
            expected: N,
            got: bytes.len(),
        })
}

// ============================================================================
// Tests
// ============================================================================
