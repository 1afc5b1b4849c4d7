//! Link intro message.
//!
//! The one-shot plaintext handshake body: the sender's signed router
//! contact plus the key-exchange nonce the initiator chose. The body is
//! carried inside a `[VERSION u32 BE][LIMSIZE u32 BE][body]` frame built
//! by the session; this module only encodes and decodes the body.

use crate::crypto::{KexNonce, KEX_NONCE_SIZE};
use crate::identity::RouterContact;
use crate::protocol::bencode::{dict_field, DictBuilder, Value};
use crate::protocol::ProtocolError;

/// Message discriminator carried under the "a" key.
const MSG_TYPE: &[u8] = b"i";

/// The link intro message (LIM) body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkIntroMessage {
    /// The sender's signed router contact.
    pub rc: RouterContact,
    /// Key-exchange nonce chosen by the initiator.
    pub nonce: KexNonce,
}

impl LinkIntroMessage {
    /// Encode the canonical body.
    pub fn encode(&self) -> Vec<u8> {
        DictBuilder::new()
            .insert("a", Value::bytes(MSG_TYPE))
            .insert("n", Value::bytes(&self.nonce.as_bytes()[..]))
            .insert("r", self.rc.as_value())
            .build()
            .to_vec()
    }

    /// Decode a body. Does not verify the contact signature.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let value = Value::decode(data)?;
        let dict = value.as_dict().ok_or(ProtocolError::WrongMessageType)?;

        let msg_type = dict_field(dict, "a")?
            .as_bytes()
            .ok_or(ProtocolError::WrongFieldType("a"))?;
        if msg_type != MSG_TYPE {
            return Err(ProtocolError::WrongMessageType);
        }

        let nonce_bytes = dict_field(dict, "n")?
            .as_bytes()
            .ok_or(ProtocolError::WrongFieldType("n"))?;
        let nonce: [u8; KEX_NONCE_SIZE] =
            nonce_bytes
                .try_into()
                .map_err(|_| ProtocolError::WrongFieldLength {
                    field: "n",
                    expected: KEX_NONCE_SIZE,
                    got: nonce_bytes.len(),
                })?;

        let rc = RouterContact::from_value(dict_field(dict, "r")?)?;

        Ok(Self {
            rc,
            nonce: KexNonce::from_bytes(nonce),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::identity::{AddressInfo, LocalIdentity};
    use std::net::SocketAddr;

    fn make_lim() -> LinkIntroMessage {
        let identity = LocalIdentity::generate();
        let rc = RouterContact::new_signed(
            &identity,
            vec![AddressInfo {
                rank: 1,
                transport_pubkey: SecretKey::generate().public(),
                addr: SocketAddr::from(([10, 0, 0, 1], 7000)),
            }],
            42,
        );
        LinkIntroMessage {
            rc,
            nonce: KexNonce::random(),
        }
    }

    #[test]
    fn test_roundtrip() {
        let lim = make_lim();
        let decoded = LinkIntroMessage::decode(&lim.encode()).unwrap();
        assert_eq!(decoded, lim);
        decoded.rc.verify().unwrap();
    }

    #[test]
    fn test_rejects_wrong_type() {
        let lim = make_lim();
        let mut body = lim.encode();
        // The "a" value byte is the first string payload in the dict.
        let pos = body.windows(3).position(|w| w == b"1:i").unwrap();
        body[pos + 2] = b'q';
        assert!(matches!(
            LinkIntroMessage::decode(&body),
            Err(ProtocolError::WrongMessageType)
        ));
    }

    #[test]
    fn test_rejects_short_nonce() {
        let lim = make_lim();
        let body = DictBuilder::new()
            .insert("a", Value::bytes(MSG_TYPE))
            .insert("n", Value::bytes(&lim.nonce.as_bytes()[..8]))
            .insert("r", lim.rc.as_value())
            .build()
            .to_vec();
        assert!(matches!(
            LinkIntroMessage::decode(&body),
            Err(ProtocolError::WrongFieldLength { field: "n", .. })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(LinkIntroMessage::decode(b"not a message").is_err());
    }
}
