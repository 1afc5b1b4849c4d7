//! Router identity.
//!
//! A router is identified by a long-term Ed25519 signing key; the 32-byte
//! verifying key doubles as its router ID. Alongside the signing key it
//! holds a long-term X25519 encryption key used for the transport key
//! agreement. Both keys can be persisted as raw 32-byte files.

mod contact;

use crate::crypto::{self, SecretKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use contact::{AddressInfo, RouterContact};

/// Size of a router contact signature.
pub use crate::crypto::SIGNATURE_SIZE;

/// Size of a router ID (Ed25519 verifying key).
pub const ROUTER_ID_SIZE: usize = 32;

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read key file {path}: {source}")]
    ReadKeyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write key file {path}: {source}")]
    WriteKeyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid key file {path}: expected 32 bytes, got {got}")]
    InvalidKeyLength { path: PathBuf, got: usize },

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("signature verification failed")]
    SignatureVerificationFailed,
}

// ============================================================================
// Router ID
// ============================================================================

/// A router's identity key: the raw Ed25519 verifying key.
///
/// Used as the pubkey index key in the link layer manager.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouterId([u8; ROUTER_ID_SIZE]);

impl RouterId {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; ROUTER_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ROUTER_ID_SIZE] {
        &self.0
    }

    /// Parse into a verifying key for signature checks.
    pub fn verifying_key(&self) -> Result<VerifyingKey, IdentityError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| IdentityError::InvalidPublicKey)
    }
}

impl fmt::Debug for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouterId({})", self)
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// ============================================================================
// Local Identity
// ============================================================================

/// This router's long-term keys: Ed25519 signing + X25519 encryption.
pub struct LocalIdentity {
    signing: SigningKey,
    encryption: SecretKey,
}

impl LocalIdentity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
            encryption: SecretKey::generate(),
        }
    }

    /// Create from raw key bytes.
    pub fn from_bytes(signing: [u8; 32], encryption: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&signing),
            encryption: SecretKey::from_bytes(encryption),
        }
    }

    /// Load both keys from raw 32-byte files, generating and persisting
    /// fresh keys for any file that does not exist yet.
    pub fn load_or_generate(
        signing_path: &Path,
        encryption_path: &Path,
    ) -> Result<Self, IdentityError> {
        let signing = match load_key_file(signing_path)? {
            Some(bytes) => SigningKey::from_bytes(&bytes),
            None => {
                let key = SigningKey::generate(&mut OsRng);
                write_key_file(signing_path, &key.to_bytes())?;
                key
            }
        };
        let encryption = match load_key_file(encryption_path)? {
            Some(bytes) => SecretKey::from_bytes(bytes),
            None => {
                let key = SecretKey::generate();
                write_key_file(encryption_path, key.as_bytes())?;
                key
            }
        };
        Ok(Self { signing, encryption })
    }

    /// The router ID (verifying key bytes).
    pub fn router_id(&self) -> RouterId {
        RouterId(self.signing.verifying_key().to_bytes())
    }

    /// The long-term encryption secret.
    pub fn encryption_secret(&self) -> &SecretKey {
        &self.encryption
    }

    /// The long-term encryption public key.
    pub fn encryption_public(&self) -> crate::crypto::PubKey {
        self.encryption.public()
    }

    /// Sign arbitrary data with the identity key.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        crypto::ed25519_sign(&self.signing, data)
    }
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("router_id", &self.router_id())
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature made by `id` over `data`.
pub fn verify_signature(
    id: &RouterId,
    data: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<(), IdentityError> {
    let key = id.verifying_key()?;
    crypto::ed25519_verify(&key, data, signature)
        .map_err(|_| IdentityError::SignatureVerificationFailed)
}

fn load_key_file(path: &Path) -> Result<Option<[u8; 32]>, IdentityError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).map_err(|source| IdentityError::ReadKeyFile {
        path: path.to_path_buf(),
        source,
    })?;
    let bytes: [u8; 32] = data
        .as_slice()
        .try_into()
        .map_err(|_| IdentityError::InvalidKeyLength {
            path: path.to_path_buf(),
            got: data.len(),
        })?;
    Ok(Some(bytes))
}

fn write_key_file(path: &Path, bytes: &[u8; 32]) -> Result<(), IdentityError> {
    fs::write(path, bytes).map_err(|source| IdentityError::WriteKeyFile {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_id_roundtrip() {
        let identity = LocalIdentity::generate();
        let id = identity.router_id();
        assert_eq!(RouterId::from_bytes(*id.as_bytes()), id);
        assert!(id.verifying_key().is_ok());
    }

    #[test]
    fn test_sign_verify() {
        let identity = LocalIdentity::generate();
        let sig = identity.sign(b"payload");
        verify_signature(&identity.router_id(), b"payload", &sig).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_data() {
        let identity = LocalIdentity::generate();
        let sig = identity.sign(b"payload");
        assert!(matches!(
            verify_signature(&identity.router_id(), b"other", &sig),
            Err(IdentityError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_signer() {
        let a = LocalIdentity::generate();
        let b = LocalIdentity::generate();
        let sig = a.sign(b"payload");
        assert!(verify_signature(&b.router_id(), b"payload", &sig).is_err());
    }

    #[test]
    fn test_load_or_generate_persists() {
        let dir = std::env::temp_dir().join(format!("onionlink-id-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let signing = dir.join("signing.key");
        let encryption = dir.join("encryption.key");

        let first = LocalIdentity::load_or_generate(&signing, &encryption).unwrap();
        let second = LocalIdentity::load_or_generate(&signing, &encryption).unwrap();
        assert_eq!(first.router_id(), second.router_id());
        assert_eq!(
            first.encryption_public().as_bytes(),
            second.encryption_public().as_bytes()
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_rejects_bad_length() {
        let dir = std::env::temp_dir().join(format!("onionlink-badkey-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("short.key");
        std::fs::write(&path, b"short").unwrap();

        let result = LocalIdentity::load_or_generate(&path, &dir.join("enc.key"));
        assert!(matches!(
            result,
            Err(IdentityError::InvalidKeyLength { got: 5, .. })
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
