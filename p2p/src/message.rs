//! Signed protocol messages for RVR

use rvr_core::{Round, RvrResult, Signature};
use rvr_crypto::hashing::hash_multiple;
use rvr_crypto::keys::{Identity, KeyPair};
use rvr_crypto::signing::{sign, verify};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Purpose of a message; every sub-protocol drains only its own kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    ElectionChallenge,
    ElectionSolution,
    SampleCommitment,
    SampleNonce,
    SampleView,
    SampleNil,
    GossipMessage,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::ElectionChallenge => "election_challenge",
            MessageKind::ElectionSolution => "election_solution",
            MessageKind::SampleCommitment => "sample_commitment",
            MessageKind::SampleNonce => "sample_nonce",
            MessageKind::SampleView => "sample_view",
            MessageKind::SampleNil => "sample_nil",
            MessageKind::GossipMessage => "gossip_message",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            MessageKind::ElectionChallenge => 1,
            MessageKind::ElectionSolution => 2,
            MessageKind::SampleCommitment => 3,
            MessageKind::SampleNonce => 4,
            MessageKind::SampleView => 5,
            MessageKind::SampleNil => 6,
            MessageKind::GossipMessage => 7,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol message. The signature covers every other field.
///
/// - `view`: the sender's view in Sample, the leader's proposal in Gossip
/// - `nonce`: challenge or solution header in Election, commitment or nonce in Sample
/// - `proof`/`order`: puzzle inclusion proof of an Election solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub round: Round,
    pub sender: Identity,
    pub signature: Signature,
    pub view: Vec<u64>,
    pub nonce: Vec<u8>,
    pub proof: Vec<Vec<u8>>,
    pub order: Vec<bool>,
    pub kind: MessageKind,
}

impl Message {
    /// Create an unsigned message with empty payload
    pub fn new(kind: MessageKind, round: Round, sender: Identity) -> Self {
        Self {
            round,
            sender,
            signature: Signature::EMPTY,
            view: Vec::new(),
            nonce: Vec::new(),
            proof: Vec::new(),
            order: Vec::new(),
            kind,
        }
    }

    pub fn with_nonce(mut self, nonce: Vec<u8>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_view(mut self, view: Vec<u64>) -> Self {
        self.view = view;
        self
    }

    pub fn with_proof(mut self, proof: Vec<Vec<u8>>, order: Vec<bool>) -> Self {
        self.proof = proof;
        self.order = order;
        self
    }

    /// Sign with `keypair`; the sender key is replaced by the signer's
    pub fn signed(mut self, keypair: &KeyPair) -> Self {
        self.sender.public_key = keypair.public_key();
        self.signature = sign(keypair, &self.digest());
        self
    }

    /// Deterministic digest over every field except the signature
    fn digest(&self) -> [u8; 32] {
        let round = self.round.to_le_bytes();
        let address_len = (self.sender.address.len() as u64).to_le_bytes();
        let view: Vec<u8> = self.view.iter().flat_map(|id| id.to_le_bytes()).collect();
        let view_len = (self.view.len() as u64).to_le_bytes();
        let mut proof = Vec::new();
        proof.extend_from_slice(&(self.proof.len() as u64).to_le_bytes());
        for element in &self.proof {
            proof.extend_from_slice(&(element.len() as u64).to_le_bytes());
            proof.extend_from_slice(element);
        }
        let nonce_len = (self.nonce.len() as u64).to_le_bytes();
        let order: Vec<u8> = self.order.iter().map(|bit| u8::from(*bit)).collect();
        let order_len = (self.order.len() as u64).to_le_bytes();

        let digest = hash_multiple(&[
            b"RVR_MESSAGE:",
            &round,
            &address_len,
            self.sender.address.as_bytes(),
            self.sender.public_key.as_bytes(),
            &view_len,
            &view,
            &proof,
            &nonce_len,
            &self.nonce,
            &order_len,
            &order,
            &[self.kind.tag()],
        ]);
        *digest.as_bytes()
    }

    /// Verify the signature against the sender's public key
    pub fn verify(&self) -> RvrResult<()> {
        verify(&self.sender.public_key, &self.digest(), &self.signature)
    }

    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }

    /// Encoded size, used for traffic accounting
    pub fn wire_size(&self) -> usize {
        bincode::serialized_size(self).map(|s| s as usize).unwrap_or(0)
    }

    pub fn to_bytes(&self) -> RvrResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> RvrResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} round={} sender={} view={}",
            self.kind,
            self.round,
            self.sender.id(),
            self.view.len()
        )
    }
}
