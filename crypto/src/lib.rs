//! RVR Cryptography Module
//!
//! Provides the cryptographic primitives the protocol relies on:
//! - Ed25519 for message signatures
//! - BLAKE3 for message digests, commitments and proof-of-work puzzles
//! - SHA-224 for node ids and puzzle tree nodes

pub mod keys;
pub mod signing;
pub mod hashing;

pub use keys::*;
pub use signing::*;
pub use hashing::*;
