//! In-process transport
//!
//! Routes messages directly to registered sinks. Used by the local cluster and the
//! test-suite; a loss rate can be set to emulate network-failure noise.

use crate::message::Message;
use crate::transport::{MessageSink, Transport};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use rvr_core::{RvrError, RvrResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::trace;

/// Drop probability stored as f64 bits so it can change while sends are running
#[derive(Debug, Default)]
struct LossRate(AtomicU64);

impl LossRate {
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, rate: f64) {
        self.0.store(rate.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

/// Transport that delivers to sinks living in the same process
#[derive(Default)]
pub struct MemoryTransport {
    sinks: DashMap<String, Weak<dyn MessageSink>>,
    loss_rate: LossRate,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that drops each delivery with probability `rate`
    pub fn with_loss_rate(rate: f64) -> Self {
        let transport = Self::default();
        transport.loss_rate.set(rate);
        transport
    }

    pub fn set_loss_rate(&self, rate: f64) {
        self.loss_rate.set(rate);
    }

    /// Route `addr` to `sink`. Only a weak reference is kept.
    pub fn register<S: MessageSink + 'static>(&self, addr: impl Into<String>, sink: &Arc<S>) {
        let weak: Weak<dyn MessageSink> = Arc::downgrade(sink) as Weak<dyn MessageSink>;
        self.sinks.insert(addr.into(), weak);
    }

    pub fn unregister(&self, addr: &str) {
        self.sinks.remove(addr);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn route(&self, addr: &str) -> RvrResult<Arc<dyn MessageSink>> {
        let lost = {
            let rate = self.loss_rate.get();
            rate > 0.0 && rand::thread_rng().gen_bool(rate)
        };
        if lost {
            trace!(addr, "dropping delivery");
            return Err(RvrError::PeerUnreachable(format!("{}: dropped", addr)));
        }
        self.sinks
            .get(addr)
            .and_then(|entry| entry.value().upgrade())
            .ok_or_else(|| RvrError::PeerUnreachable(format!("{}: no such peer", addr)))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_in_msg(&self, addr: &str, msg: &Message, _timeout: Duration) -> RvrResult<()> {
        let sink = self.route(addr)?;
        sink.send_in_msg(msg.clone())
    }

    async fn black_hole(&self, addr: &str, payload: &[u8], _timeout: Duration) -> RvrResult<()> {
        let sink = self.route(addr)?;
        sink.black_hole(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use parking_lot::Mutex;
    use rvr_crypto::keys::KeyPair;

    #[derive(Default)]
    struct Inbox {
        received: Mutex<Vec<Message>>,
    }

    impl MessageSink for Inbox {
        fn send_in_msg(&self, msg: Message) -> RvrResult<()> {
            self.received.lock().push(msg);
            Ok(())
        }
    }

    fn message() -> Message {
        let kp = KeyPair::generate();
        Message::new(MessageKind::SampleNonce, 1, kp.identity("a")).signed(&kp)
    }

    #[tokio::test]
    async fn test_delivers_to_registered_sink() {
        let transport = MemoryTransport::new();
        let inbox = Arc::new(Inbox::default());
        transport.register("node-1", &inbox);

        transport
            .send_in_msg("node-1", &message(), Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(inbox.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_or_dropped_peer_is_unreachable() {
        let transport = MemoryTransport::new();
        let err = transport
            .send_in_msg("missing", &message(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RvrError::PeerUnreachable(_)));

        let inbox = Arc::new(Inbox::default());
        transport.register("node-1", &inbox);
        drop(inbox);
        assert!(transport
            .black_hole("node-1", &[0u8; 4], Duration::from_millis(10))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unregistered_peer_is_unreachable() {
        let transport = MemoryTransport::new();
        let inbox = Arc::new(Inbox::default());
        transport.register("node-1", &inbox);
        assert_eq!(transport.len(), 1);

        transport.unregister("node-1");
        assert!(transport.is_empty());
        assert!(transport
            .send_in_msg("node-1", &message(), Duration::from_millis(10))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_full_loss_drops_everything() {
        let transport = MemoryTransport::with_loss_rate(1.0);
        let inbox = Arc::new(Inbox::default());
        transport.register("node-1", &inbox);

        for _ in 0..5 {
            assert!(transport
                .send_in_msg("node-1", &message(), Duration::from_millis(10))
                .await
                .is_err());
        }
        assert!(inbox.received.lock().is_empty());

        transport.set_loss_rate(0.0);
        assert!(transport
            .send_in_msg("node-1", &message(), Duration::from_millis(10))
            .await
            .is_ok());
    }
}
