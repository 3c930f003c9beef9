//! Bounded fire-and-forget sends for one sub-protocol

use crate::engine::ProtocolState;
use parking_lot::Mutex;
use rvr_core::NodeId;
use rvr_p2p::{Message, MessageKind};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time;
use tracing::trace;

/// Every send runs as its own task, gated by the node-wide semaphore and bounded by
/// one round. Dropping the outbox aborts whatever is still in flight.
pub struct Outbox {
    state: Arc<ProtocolState>,
    tasks: JoinSet<()>,
    delivered: Arc<Mutex<HashSet<(MessageKind, NodeId)>>>,
}

impl Outbox {
    pub fn new(state: &Arc<ProtocolState>) -> Self {
        Self {
            state: Arc::clone(state),
            tasks: JoinSet::new(),
            delivered: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Queue `msg` for `peer` at `addr`
    pub fn send(&mut self, peer: NodeId, addr: String, msg: Arc<Message>) {
        let state = Arc::clone(&self.state);
        let delivered = Arc::clone(&self.delivered);
        let size = msg.wire_size();

        self.tasks.spawn(async move {
            let Ok(_permit) = Arc::clone(state.send_permits()).acquire_owned().await else {
                return;
            };
            let timeout = match state.params() {
                Ok(params) => params.round_duration,
                Err(_) => return,
            };
            let sent = time::timeout(
                timeout,
                state.transport().send_in_msg(&addr, &msg, timeout),
            )
            .await;

            match sent {
                Ok(Ok(())) => {
                    state.record_sent(size);
                    delivered.lock().insert((msg.kind, peer));
                }
                Ok(Err(e)) => {
                    trace!("Send of {} to {} failed: {}", msg.kind, addr, e);
                    state.record_send_failure();
                }
                Err(_) => {
                    trace!("Send of {} to {} timed out", msg.kind, addr);
                    state.record_send_failure();
                }
            }
        });
    }

    /// Send `msg` to every member of `peers`
    pub fn broadcast<'a>(&mut self, peers: impl IntoIterator<Item = &'a (NodeId, String)>, msg: &Arc<Message>) {
        for (peer, addr) in peers {
            self.send(*peer, addr.clone(), Arc::clone(msg));
        }
    }

    /// Whether a `kind` message has already reached `peer`
    pub fn delivered(&self, kind: MessageKind, peer: NodeId) -> bool {
        self.delivered.lock().contains(&(kind, peer))
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Reap finished send tasks
    pub fn reap(&mut self) {
        while let Some(Some(_)) = futures::FutureExt::now_or_never(self.tasks.join_next()) {}
    }
}
