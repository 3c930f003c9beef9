//! Hashing functions: BLAKE3 for digests and puzzles, SHA-224 for ids and puzzle trees

use rvr_core::Hash;
use sha2::{Digest, Sha224};

/// Compute BLAKE3 hash of data
pub fn blake3_hash(data: &[u8]) -> Hash {
    let hash = blake3::hash(data);
    Hash::from_bytes(*hash.as_bytes())
}

/// Compute SHA-224 hash of data
pub fn sha224_hash(data: &[u8]) -> [u8; 28] {
    let mut hasher = Sha224::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 28];
    bytes.copy_from_slice(&result);
    bytes
}

/// Hash multiple pieces of data
pub fn hash_multiple(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    let hash = hasher.finalize();
    Hash::from_bytes(*hash.as_bytes())
}

/// Puzzle tree node hash: SHA-224 over the concatenated children.
///
/// A missing right child is passed as an empty slice.
pub fn merkle_node_hash(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha224::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

/// Commitment to a sample nonce
pub fn commitment(nonce: &[u8]) -> Vec<u8> {
    blake3_hash(nonce).as_bytes().to_vec()
}

/// Check a revealed nonce against an earlier commitment
pub fn verify_commitment(nonce: &[u8], commitment_bytes: &[u8]) -> bool {
    blake3_hash(nonce).as_bytes().as_slice() == commitment_bytes
}

/// Relative strength of `hash(header ++ data)`, i.e. the digest read as a
/// big-endian fraction of 2^256. Only the top 128 bits are significant here.
pub fn hash_strength(header: &[u8], data: &[u8]) -> f64 {
    let digest = hash_multiple(&[header, data]);
    let mut top = [0u8; 16];
    top.copy_from_slice(&digest.as_bytes()[..16]);
    u128::from_be_bytes(top) as f64 / 2f64.powi(128)
}

/// True iff `hash(header ++ data) / 2^256 < difficulty`.
///
/// Empty inputs never pass.
pub fn eval_hash_with_difficulty(header: &[u8], data: &[u8], difficulty: f64) -> bool {
    if header.is_empty() || data.is_empty() {
        return false;
    }
    hash_strength(header, data) < difficulty
}
