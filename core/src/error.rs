//! Error types for RVR

use crate::types::{NodeId, Round};
use thiserror::Error;

/// Main error type for RVR
#[derive(Error, Debug)]
pub enum RvrError {
    // ============ Mailbox Errors ============
    #[error("Expired message: round {round} is older than {current} minus offset")]
    ExpiredMessage { round: Round, current: Round },

    #[error("Invalid signature")]
    BadSignature,

    #[error("Sender {0} is not in the init view")]
    NotInView(NodeId),

    // ============ Cryptography Errors ============
    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    // ============ Puzzle Tree Errors ============
    #[error("Id {0} already has a puzzle leaf")]
    DuplicateId(NodeId),

    #[error("Id {0} has no puzzle leaf")]
    NotFound(NodeId),

    // ============ Network Errors ============
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Message serialization failed: {0}")]
    SerializationError(String),

    // ============ Lifecycle Errors ============
    #[error("Protocol already started")]
    AlreadyStarted,

    #[error("Node exited")]
    Exited,

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RvrError {
    /// Mailbox rejections are dropped by the receiver and never retried by the sender
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RvrError::ExpiredMessage { .. } | RvrError::BadSignature | RvrError::NotInView(_)
        )
    }
}

impl From<bincode::Error> for RvrError {
    fn from(err: bincode::Error) -> Self {
        RvrError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for RvrError {
    fn from(err: serde_json::Error) -> Self {
        RvrError::SerializationError(err.to_string())
    }
}

/// Result type for RVR operations
pub type RvrResult<T> = Result<T, RvrError>;
