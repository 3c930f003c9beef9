//! Point-to-point transport seam
//!
//! The protocol only needs one primitive: deliver a signed message to an address
//! within a timeout. Any failure is treated as "peer unreachable this attempt".

use crate::message::Message;
use async_trait::async_trait;
use rvr_core::RvrResult;
use std::sync::Arc;
use std::time::Duration;

/// Outbound side, consumed by the round engine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `msg` to the node at `addr`
    async fn send_in_msg(&self, addr: &str, msg: &Message, timeout: Duration) -> RvrResult<()>;

    /// Send an opaque payload that the receiver discards; used for latency probes
    async fn black_hole(&self, addr: &str, payload: &[u8], timeout: Duration) -> RvrResult<()>;
}

/// Inbound side, implemented by the round engine
pub trait MessageSink: Send + Sync {
    /// Accept or reject an inbound message
    fn send_in_msg(&self, msg: Message) -> RvrResult<()>;

    /// Discard a probe payload
    fn black_hole(&self, _payload: &[u8]) {}
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn Transport>;
