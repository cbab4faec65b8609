use serde::Serialize;
use sha2::{Digest, Sha256};

/// Chain head used when a checker has no prior proof.
pub const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

/// Canonical JSON encoding: compact, struct fields in declaration order.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// SHA-256 of `data` as `0x`-prefixed lower-case hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// SHA-256 of the canonical JSON encoding of `value`.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&canonical_json(value)?))
}
