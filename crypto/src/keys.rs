//! Key management and node identities for RVR
//!
//! Handles key generation and the derivation of node ids from public keys.

use ed25519_dalek::{
    SigningKey as Ed25519SigningKey,
    VerifyingKey as Ed25519VerifyingKey,
    SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use rvr_core::{NodeId, PublicKey, RvrError, RvrResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash as StdHash, Hasher};

use crate::hashing::sha224_hash;

/// A keypair for signing and verification
#[derive(Clone)]
pub struct KeyPair {
    signing_key: Ed25519SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = Ed25519SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create keypair from seed bytes
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = Ed25519SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create keypair from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> RvrResult<Self> {
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(RvrError::InvalidPrivateKey);
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(bytes);
        Ok(Self::from_seed(&seed))
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        let verifying_key = self.signing_key.verifying_key();
        PublicKey::from_bytes(verifying_key.to_bytes())
    }

    /// Get the node ID
    pub fn node_id(&self) -> NodeId {
        node_id_from_public_key(&self.public_key())
    }

    /// Identity of this key reachable at `address`
    pub fn identity(&self, address: impl Into<String>) -> Identity {
        Identity::new(address, self.public_key())
    }

    /// Get the secret key bytes (BE CAREFUL with this!)
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &Ed25519SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({})", self.node_id())
    }
}

/// Derive a node id: first 8 bytes of SHA-224(public key), little-endian
pub fn node_id_from_public_key(public_key: &PublicKey) -> NodeId {
    let digest = sha224_hash(public_key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    NodeId::new(u64::from_le_bytes(head))
}

/// Convert our PublicKey type to Ed25519 verifying key
pub fn public_key_to_ed25519(key: &PublicKey) -> RvrResult<Ed25519VerifyingKey> {
    Ed25519VerifyingKey::from_bytes(key.as_bytes()).map_err(|_| RvrError::InvalidPublicKey)
}

/// A protocol participant: where to reach it and which key speaks for it.
///
/// Equality and hashing only look at the public key.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    pub address: String,
    pub public_key: PublicKey,
}

impl Identity {
    pub fn new(address: impl Into<String>, public_key: PublicKey) -> Self {
        Self {
            address: address.into(),
            public_key,
        }
    }

    pub fn id(&self) -> NodeId {
        node_id_from_public_key(&self.public_key)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for Identity {}

impl StdHash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.public_key.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id(), self.address)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({}, {})", self.id(), self.address)
    }
}
