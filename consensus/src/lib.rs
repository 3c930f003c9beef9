//! RVR Consensus Engine
//!
//! Implements randomized view reconciliation:
//! - Round engine with an authenticated mailbox
//! - Leader election by moderated proof-of-work over a Merkle puzzle
//! - Commit-reveal opinion sampling
//! - Leader proposal gossip and view recomputation

pub mod params;
pub mod clock;
pub mod engine;
pub mod outbox;
pub mod merkle;
pub mod election;
pub mod sample;
pub mod gossip;
pub mod reconciliation;
pub mod monitor;

pub use params::*;
pub use clock::RoundClock;
pub use engine::*;
pub use merkle::{eval_proof, PuzzleMerkleTree};
pub use sample::{sample_quorum_reached, Scores};
pub use reconciliation::{leader_view, reconcile_view};
pub use monitor::PingValueReport;
