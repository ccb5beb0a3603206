use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

use super::IdentityError;

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (RFC 8410)
const ED25519_DER_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Ed25519 key pair generated for a single login attempt
///
/// The provider delegates to the public half; the private half signs every
/// outbound request made under the resulting delegated identity.
#[derive(Clone)]
pub struct SessionKey {
    signing_key: SigningKey,
}

impl SessionKey {
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        Self::from_seed(seed)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Restore a key from a persisted seed
    pub fn from_seed_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            IdentityError::InvalidKey(format!("expected 32 seed bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_key_der(&self) -> Vec<u8> {
        der_encode(&self.signing_key.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.signing_key.verifying_key() == other.signing_key.verifying_key()
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("public_key", &self.signing_key.verifying_key())
            .finish_non_exhaustive()
    }
}

fn der_encode(key: &VerifyingKey) -> Vec<u8> {
    let mut der = Vec::with_capacity(ED25519_DER_PREFIX.len() + 32);
    der.extend_from_slice(&ED25519_DER_PREFIX);
    der.extend_from_slice(key.as_bytes());
    der
}

/// Verify an Ed25519 signature against a DER-encoded public key
pub fn verify_signature(
    der_public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let raw = der_public_key
        .strip_prefix(&ED25519_DER_PREFIX[..])
        .ok_or_else(|| IdentityError::InvalidKey("not a DER Ed25519 public key".to_string()))?;
    let raw: [u8; 32] = raw
        .try_into()
        .map_err(|_| IdentityError::InvalidKey("bad Ed25519 key length".to_string()))?;
    let key = VerifyingKey::from_bytes(&raw)
        .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;

    key.verify(message, &signature)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))
}
