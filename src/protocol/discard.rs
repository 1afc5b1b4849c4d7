//! Discard message.
//!
//! A content-free message the receiver drops on sight. Used as the
//! keepalive payload when the policy knob is enabled.

use crate::protocol::bencode::{dict_field, DictBuilder, Value};
use crate::protocol::ProtocolError;

/// Message discriminator carried under the "a" key.
const MSG_TYPE: &[u8] = b"x";

/// The discard message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscardMessage;

impl DiscardMessage {
    /// Encode the canonical body.
    pub fn encode(&self) -> Vec<u8> {
        DictBuilder::new()
            .insert("a", Value::bytes(MSG_TYPE))
            .build()
            .to_vec()
    }

    /// Decode a body.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let value = Value::decode(data)?;
        let dict = value.as_dict().ok_or(ProtocolError::WrongMessageType)?;
        let msg_type = dict_field(dict, "a")?
            .as_bytes()
            .ok_or(ProtocolError::WrongFieldType("a"))?;
        if msg_type != MSG_TYPE {
            return Err(ProtocolError::WrongMessageType);
        }
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let encoded = DiscardMessage.encode();
        assert_eq!(encoded, b"d1:a1:xe");
        assert_eq!(DiscardMessage::decode(&encoded).unwrap(), DiscardMessage);
    }

    #[test]
    fn test_rejects_other_type() {
        assert!(matches!(
            DiscardMessage::decode(b"d1:a1:ie"),
            Err(ProtocolError::WrongMessageType)
        ));
    }
}
