//! Deterministic derivation of synthetic identifiers and figures.
//!
//! Every synthetic value (IDs, addresses, sizes, stats) is a function of a
//! stable key run through SHA-256, so fixtures agree across runs and hosts.

use sha2::{Digest, Sha256};

/// Reference instant for synthetic timestamps (2024-01-01T00:00:00Z).
pub const SYNTHETIC_EPOCH: i64 = 1_704_067_200;

pub fn digest(key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

/// 64 lowercase hex characters, the shape of engine object IDs.
pub fn hex_id(key: &str) -> String {
    hex::encode(digest(key))
}

pub fn hash_u64(key: &str) -> u64 {
    let bytes = digest(key);
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(head)
}

/// A value in `0..modulo` derived from `key` and a salt naming the figure.
pub fn pick(key: &str, salt: &str, modulo: u64) -> u64 {
    if modulo == 0 {
        return 0;
    }
    hash_u64(&format!("{}#{}", key, salt)) % modulo
}

/// A value in `low..=high`.
pub fn pick_range(key: &str, salt: &str, low: u64, high: u64) -> u64 {
    if high <= low {
        return low;
    }
    low + pick(key, salt, high - low + 1)
}
