//! Fragment codec.
//!
//! Every post-handshake byte on a link belongs to a fixed 576-byte
//! fragment:
//!
//! | Offset   | Field     | Notes                                    |
//! |----------|-----------|------------------------------------------|
//! | 0..32    | MAC       | HMAC-SHA256(key, bytes[32..576])         |
//! | 32..56   | NONCE     | fresh random, in-band                    |
//! | 56..60   | CONT_FLAG | u32 BE, 0 = last, 1 = more; encrypted    |
//! | 60..64   | LEN       | u32 BE payload length in [1,512]; encrypted |
//! | 64..576  | PAYLOAD   | plus random padding; encrypted           |
//!
//! The cipher covers bytes [56..576) with XChaCha20 keyed by the in-band
//! nonce. Sealing randomizes the whole buffer before writing any field,
//! so padding stays random under both plaintext and ciphertext. The MAC
//! is computed over ciphertext and verified before decryption.

use crate::crypto::{self, SharedSecret};
use crate::link::LinkError;

/// Size of the fragment MAC.
pub const FRAG_MAC: usize = 32;
/// Size of the in-band fragment nonce.
pub const FRAG_NONCE: usize = 24;
/// MAC plus nonce.
pub const FRAG_OVERHEAD: usize = FRAG_MAC + FRAG_NONCE;
/// Body header: CONT_FLAG and LEN, both big-endian u32.
pub const FRAG_BODY_HDR: usize = 8;
/// Maximum payload bytes per fragment.
pub const FRAG_BODY_PAYLOAD: usize = 512;
/// Encrypted body size.
pub const FRAG_BODY: usize = FRAG_BODY_HDR + FRAG_BODY_PAYLOAD;
/// Total on-wire fragment size.
pub const FRAG_BUF: usize = FRAG_OVERHEAD + FRAG_BODY;
/// Offset of the payload inside a fragment.
pub const PAYLOAD_OFFSET: usize = FRAG_OVERHEAD + FRAG_BODY_HDR;

/// Maximum reassembled link message size.
pub const MAX_LINK_MSG: usize = 8192;

/// A 576-byte on-wire fragment.
#[derive(Clone)]
pub struct FragmentBuffer([u8; FRAG_BUF]);

impl FragmentBuffer {
    /// A zeroed buffer (handshake scratch).
    pub fn zeroed() -> Self {
        Self([0u8; FRAG_BUF])
    }

    /// View the wire bytes.
    pub fn as_bytes(&self) -> &[u8; FRAG_BUF] {
        &self.0
    }

    /// Mutable view of the wire bytes.
    pub fn as_mut_bytes(&mut self) -> &mut [u8; FRAG_BUF] {
        &mut self.0
    }
}

/// Seal `payload` into a fresh fragment.
///
/// Fails with `LengthInvalid` unless `1 <= |payload| <= 512`.
pub fn seal(
    key: &SharedSecret,
    payload: &[u8],
    is_last: bool,
) -> Result<FragmentBuffer, LinkError> {
    if payload.is_empty() || payload.len() > FRAG_BODY_PAYLOAD {
        return Err(LinkError::LengthInvalid {
            len: payload.len() as u32,
        });
    }

    let mut frag = FragmentBuffer::zeroed();
    let buf = &mut frag.0;

    // Randomize first so the padding past LEN stays random plaintext.
    crypto::randomize(buf);

    let cont_flag: u32 = if is_last { 0 } else { 1 };
    buf[FRAG_OVERHEAD..FRAG_OVERHEAD + 4].copy_from_slice(&cont_flag.to_be_bytes());
    buf[FRAG_OVERHEAD + 4..FRAG_OVERHEAD + 8]
        .copy_from_slice(&(payload.len() as u32).to_be_bytes());
    buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);

    let nonce: [u8; FRAG_NONCE] = buf[FRAG_MAC..FRAG_OVERHEAD]
        .try_into()
        .map_err(|_| LinkError::IntegrityFailed)?;
    crypto::xchacha20_xor(key, &nonce, &mut buf[FRAG_OVERHEAD..]);

    let mac = crypto::hmac_sha256(key, &buf[FRAG_MAC..]);
    buf[..FRAG_MAC].copy_from_slice(&mac);

    Ok(frag)
}

/// Verify and decrypt one fragment in place.
///
/// `buf` must hold exactly one wire fragment. On success the body is
/// plaintext and the payload sits at `PAYLOAD_OFFSET..PAYLOAD_OFFSET+len`;
/// returns the payload length and whether this was the last fragment of
/// its message.
pub fn open_in_place(key: &SharedSecret, buf: &mut [u8]) -> Result<(usize, bool), LinkError> {
    if buf.len() != FRAG_BUF {
        return Err(LinkError::LengthInvalid {
            len: buf.len() as u32,
        });
    }

    let expected = crypto::hmac_sha256(key, &buf[FRAG_MAC..]);
    if expected != buf[..FRAG_MAC] {
        return Err(LinkError::IntegrityFailed);
    }

    let nonce: [u8; FRAG_NONCE] = buf[FRAG_MAC..FRAG_OVERHEAD]
        .try_into()
        .map_err(|_| LinkError::IntegrityFailed)?;
    crypto::xchacha20_xor(key, &nonce, &mut buf[FRAG_OVERHEAD..]);

    let cont_flag = u32::from_be_bytes(
        buf[FRAG_OVERHEAD..FRAG_OVERHEAD + 4]
            .try_into()
            .map_err(|_| LinkError::IntegrityFailed)?,
    );
    let len = u32::from_be_bytes(
        buf[FRAG_OVERHEAD + 4..FRAG_OVERHEAD + 8]
            .try_into()
            .map_err(|_| LinkError::IntegrityFailed)?,
    );
    if len == 0 || len as usize > FRAG_BODY_PAYLOAD {
        return Err(LinkError::LengthInvalid { len });
    }

    Ok((len as usize, cont_flag == 0))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SharedSecret {
        SharedSecret::from_bytes([0x42u8; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        for (payload, is_last) in [
            (&b"x"[..], true),
            (&b"hello fragment"[..], false),
            (&[0xaau8; FRAG_BODY_PAYLOAD][..], true),
        ] {
            let frag = seal(&key, payload, is_last).unwrap();
            let mut wire = *frag.as_bytes();
            let (len, last) = open_in_place(&key, &mut wire).unwrap();
            assert_eq!(len, payload.len());
            assert_eq!(last, is_last);
            assert_eq!(&wire[PAYLOAD_OFFSET..PAYLOAD_OFFSET + len], payload);
        }
    }

    #[test]
    fn test_any_bit_flip_fails_integrity() {
        let key = test_key();
        let frag = seal(&key, b"authenticated", true).unwrap();

        // One flipped bit per region: MAC, nonce, header, payload, padding.
        for offset in [0usize, 10, 40, 58, 100, FRAG_BUF - 1] {
            let mut wire = *frag.as_bytes();
            wire[offset] ^= 0x01;
            assert!(
                matches!(
                    open_in_place(&key, &mut wire),
                    Err(LinkError::IntegrityFailed)
                ),
                "flip at {} not detected",
                offset
            );
        }
    }

    #[test]
    fn test_wrong_key_fails_integrity() {
        let frag = seal(&test_key(), b"secret", true).unwrap();
        let mut wire = *frag.as_bytes();
        let other = SharedSecret::from_bytes([0x43u8; 32]);
        assert!(matches!(
            open_in_place(&other, &mut wire),
            Err(LinkError::IntegrityFailed)
        ));
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = test_key();
        let a = seal(&key, b"same payload", true).unwrap();
        let b = seal(&key, b"same payload", true).unwrap();
        assert_ne!(
            a.as_bytes()[FRAG_MAC..FRAG_OVERHEAD],
            b.as_bytes()[FRAG_MAC..FRAG_OVERHEAD]
        );
        // And therefore distinct ciphertext too.
        assert_ne!(a.as_bytes()[FRAG_OVERHEAD..], b.as_bytes()[FRAG_OVERHEAD..]);
    }

    #[test]
    fn test_seal_rejects_bad_sizes() {
        let key = test_key();
        assert!(matches!(
            seal(&key, b"", true),
            Err(LinkError::LengthInvalid { len: 0 })
        ));
        let oversize = [0u8; FRAG_BODY_PAYLOAD + 1];
        assert!(matches!(
            seal(&key, &oversize, true),
            Err(LinkError::LengthInvalid { len: 513 })
        ));
    }

    #[test]
    fn test_open_rejects_wrong_buffer_size() {
        let key = test_key();
        let mut short = [0u8; FRAG_BUF - 1];
        assert!(matches!(
            open_in_place(&key, &mut short),
            Err(LinkError::LengthInvalid { .. })
        ));
    }

    #[test]
    fn test_open_rejects_forged_zero_len() {
        // Craft a fragment with LEN = 0 but a valid MAC.
        let key = test_key();
        let frag = seal(&key, b"x", true).unwrap();
        let mut wire = *frag.as_bytes();

        // Decrypt, zero the length, re-encrypt, re-MAC.
        let nonce: [u8; FRAG_NONCE] = wire[FRAG_MAC..FRAG_OVERHEAD].try_into().unwrap();
        crypto::xchacha20_xor(&key, &nonce, &mut wire[FRAG_OVERHEAD..]);
        wire[FRAG_OVERHEAD + 4..FRAG_OVERHEAD + 8].copy_from_slice(&0u32.to_be_bytes());
        crypto::xchacha20_xor(&key, &nonce, &mut wire[FRAG_OVERHEAD..]);
        let mac = crypto::hmac_sha256(&key, &wire[FRAG_MAC..]);
        wire[..FRAG_MAC].copy_from_slice(&mac);

        assert!(matches!(
            open_in_place(&key, &mut wire),
            Err(LinkError::LengthInvalid { len: 0 })
        ));
    }

    #[test]
    fn test_padding_is_randomized() {
        // Two seals of a short payload must differ in their padding region
        // after decryption as well (random plaintext padding).
        let key = test_key();
        let a = seal(&key, b"pad", true).unwrap();
        let b = seal(&key, b"pad", true).unwrap();

        let mut wa = *a.as_bytes();
        let mut wb = *b.as_bytes();
        open_in_place(&key, &mut wa).unwrap();
        open_in_place(&key, &mut wb).unwrap();
        assert_eq!(&wa[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 3], b"pad");
        assert_ne!(wa[PAYLOAD_OFFSET + 3..], wb[PAYLOAD_OFFSET + 3..]);
    }
}
