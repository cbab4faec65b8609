// CHECKER IDENTITY
// Ed25519 key pair of one checker node.
//
// INVARIANTS:
// 1. checker_id is the hex-encoded verifying key, so any signature is verifiable from the id alone
// 2. The secret seed never leaves this type (no Debug/Serialize exposure)

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid signing key: {0}")]
    InvalidSigningKey(String),

    #[error("Invalid checker id: {0}")]
    InvalidCheckerId(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Signature verification failed for checker {0}")]
    VerificationFailed(String),
}

pub struct CheckerIdentity {
    signing_key: SigningKey,
    checker_id: String,
}

impl CheckerIdentity {
    /// Build an identity from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let checker_id = encode_checker_id(&signing_key.verifying_key());
        CheckerIdentity {
            signing_key,
            checker_id,
        }
    }

    /// Build an identity from a hex-encoded 32-byte seed (`0x` prefix optional).
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(strip_0x(seed_hex.trim()))
            .map_err(|e| IdentityError::InvalidSigningKey(e.to_string()))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            IdentityError::InvalidSigningKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    /// Fresh random identity. Proofs signed by it cannot be chained across restarts.
    pub fn generate() -> Self {
        Self::from_seed(rand::random::<[u8; 32]>())
    }

    pub fn checker_id(&self) -> &str {
        &self.checker_id
    }

    /// Sign `message`, returning the `0x`-hex signature.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        format!("0x{}", hex::encode(signature.to_bytes()))
    }
}

impl fmt::Debug for CheckerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerIdentity")
            .field("checker_id", &self.checker_id)
            .finish_non_exhaustive()
    }
}

/// Verify that `signature_hex` over `message` was produced by `checker_id`.
pub fn verify_signature(checker_id: &str, message: &[u8], signature_hex: &str) -> Result<(), IdentityError> {
    let key_bytes = hex::decode(strip_0x(checker_id))
        .map_err(|e| IdentityError::InvalidCheckerId(e.to_string()))?;
    let key_bytes: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| IdentityError::InvalidCheckerId(format!("expected 32 bytes, got {}", key_bytes.len())))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| IdentityError::InvalidCheckerId(e.to_string()))?;

    let sig_bytes = hex::decode(strip_0x(signature_hex))
        .map_err(|e| IdentityError::MalformedSignature(e.to_string()))?;
    let sig_bytes: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| IdentityError::MalformedSignature(format!("expected 64 bytes, got {}", sig_bytes.len())))?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| IdentityError::VerificationFailed(checker_id.to_string()))
}

fn encode_checker_id(key: &VerifyingKey) -> String {
    format!("0x{}", hex::encode(key.to_bytes()))
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}
