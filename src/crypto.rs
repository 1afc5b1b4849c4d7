//! Link-layer cryptographic primitives.
//!
//! Thin, type-safe wrappers over the ecosystem crates: X25519 for the
//! transport key agreement, XChaCha20 for fragment encryption,
//! HMAC-SHA256 for fragment authentication, SHA-256 as the short hash,
//! Ed25519 for router contact signatures, and the OS CSPRNG for nonces
//! and padding. The identity module owns the Ed25519 keys and delegates
//! its sign/verify calls here.
//!
//! ## Key agreement roles
//!
//! The session key is derived from a single X25519 agreement keyed by a
//! 24-byte nonce chosen by the initiator:
//!
//! - client: local *encryption* secret × remote *transport* public key
//! - server: local *transport* secret × remote *encryption* public key
//!
//! Both sides then run HKDF-SHA256 with the nonce as salt and the
//! concatenated (client encryption pub, server transport pub) transcript
//! as info, yielding the same 32-byte session key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey as DalekPublic, StaticSecret as DalekStatic};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an X25519 public or secret key.
pub const KEY_SIZE: usize = 32;

/// Size of a derived session key.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Size of a key-exchange nonce.
pub const KEX_NONCE_SIZE: usize = 24;

/// Size of an Ed25519 contact signature.
pub const SIGNATURE_SIZE: usize = 64;

/// HKDF info label binding derived keys to this protocol.
const KDF_INFO: &[u8] = b"onionlink transport session";

/// Errors from cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key exchange produced a non-contributory shared secret")]
    KeyExchangeFailed,

    #[error("invalid public key")]
    InvalidKey,

    #[error("signature verification failed")]
    SignatureInvalid,
}

// ============================================================================
// Key Types
// ============================================================================

/// An X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PubKey([u8; KEY_SIZE]);

impl PubKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self)
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// An X25519 secret key.
///
/// Zeroized on drop. Used for both the long-term encryption key and the
/// per-link-layer transport key.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Generate a fresh secret key from the OS CSPRNG.
    pub fn generate() -> Self {
        Self(DalekStatic::random_from_rng(OsRng).to_bytes())
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derive the corresponding public key.
    pub fn public(&self) -> PubKey {
        let secret = DalekStatic::from(self.0);
        PubKey(DalekPublic::from(&secret).to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey").field("key", &"[redacted]").finish()
    }
}

/// A 32-byte symmetric session key.
///
/// Keys both the fragment MAC and the fragment cipher. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// The all-zero key used before key exchange completes.
    pub fn zero() -> Self {
        Self([0u8; SHARED_SECRET_SIZE])
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }

    /// Check whether a key has been derived.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("key", &"[redacted]")
            .finish()
    }
}

/// A 24-byte key-exchange nonce, chosen by the session initiator and
/// carried in the LinkIntro message.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KexNonce([u8; KEX_NONCE_SIZE]);

impl KexNonce {
    /// Sample a fresh random nonce.
    pub fn random() -> Self {
        let mut bytes = [0u8; KEX_NONCE_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEX_NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEX_NONCE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for KexNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KexNonce(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// Key Agreement
// ============================================================================

/// Client-side transport key agreement.
///
/// `local_enc_secret` is our long-term encryption key, `remote_transport_pk`
/// is the transport public key from the peer's address info, `nonce` is the
/// fresh nonce we place in our LinkIntro.
pub fn transport_dh_client(
    local_enc_secret: &SecretKey,
    remote_transport_pk: &PubKey,
    nonce: &KexNonce,
) -> Result<SharedSecret, CryptoError> {
    let client_pk = local_enc_secret.public();
    derive_session_key(
        local_enc_secret,
        remote_transport_pk,
        &client_pk,
        remote_transport_pk,
        nonce,
    )
}

/// Server-side transport key agreement.
///
/// `local_transport_secret` is this link layer's transport key,
/// `remote_enc_pk` is the encryption key from the peer's router contact,
/// `nonce` was read from the peer's LinkIntro.
pub fn transport_dh_server(
    local_transport_secret: &SecretKey,
    remote_enc_pk: &PubKey,
    nonce: &KexNonce,
) -> Result<SharedSecret, CryptoError> {
    let server_pk = local_transport_secret.public();
    derive_session_key(
        local_transport_secret,
        remote_enc_pk,
        remote_enc_pk,
        &server_pk,
        nonce,
    )
}

/// Shared derivation: X25519 then HKDF over the role transcript.
fn derive_session_key(
    our_secret: &SecretKey,
    their_public: &PubKey,
    client_pk: &PubKey,
    server_pk: &PubKey,
    nonce: &KexNonce,
) -> Result<SharedSecret, CryptoError> {
    let secret = DalekStatic::from(*our_secret.as_bytes());
    let public = DalekPublic::from(*their_public.as_bytes());
    let shared = secret.diffie_hellman(&public);
    if !shared.was_contributory() {
        return Err(CryptoError::KeyExchangeFailed);
    }

    let mut transcript = [0u8; KEY_SIZE * 2];
    transcript[..KEY_SIZE].copy_from_slice(client_pk.as_bytes());
    transcript[KEY_SIZE..].copy_from_slice(server_pk.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(nonce.as_bytes()), shared.as_bytes());
    let mut okm = [0u8; SHARED_SECRET_SIZE];
    hk.expand_multi_info(&[KDF_INFO, &transcript], &mut okm)
        .map_err(|_| CryptoError::KeyExchangeFailed)?;

    Ok(SharedSecret(okm))
}

// ============================================================================
// Symmetric Primitives
// ============================================================================

/// Apply the XChaCha20 keystream to `buf` in place.
pub fn xchacha20_xor(key: &SharedSecret, nonce: &[u8; KEX_NONCE_SIZE], buf: &mut [u8]) {
    use chacha20::cipher::{KeyIvInit, StreamCipher};
    use chacha20::{Key, XChaCha20, XNonce};

    let mut cipher = XChaCha20::new(
        Key::from_slice(key.as_bytes()),
        XNonce::from_slice(nonce),
    );
    cipher.apply_keystream(buf);
}

/// Keyed hash: HMAC-SHA256 over `data`.
pub fn hmac_sha256(key: &SharedSecret, data: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .expect("HMAC can take a key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Unkeyed short hash: SHA-256.
pub fn shorthash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Fill `buf` with CSPRNG bytes.
pub fn randomize(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

// ============================================================================
// Identity Signatures
// ============================================================================

/// Sign `data` with an Ed25519 identity key.
pub fn ed25519_sign(key: &SigningKey, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
    key.sign(data).to_bytes()
}

/// Verify an Ed25519 signature over `data`.
pub fn ed25519_verify(
    key: &VerifyingKey,
    data: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<(), CryptoError> {
    let signature = Signature::from_bytes(signature);
    key.verify(data, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

// ============================================================================
// Tests
// ============================================================================
