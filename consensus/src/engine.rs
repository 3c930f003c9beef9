//! Round engine
//!
//! `ProtocolState` owns everything a node knows about the current run: the round
//! counter, the authenticated mailbox, the roster and the view. All of it sits behind
//! one lock that is never held across an `.await`.

use crate::clock::RoundClock;
use crate::params::SetupParams;
use crate::{monitor, reconciliation};
use parking_lot::RwLock;
use rvr_core::{NodeId, Round, RvrError, RvrResult, Timestamp};
use rvr_crypto::keys::{Identity, KeyPair};
use rvr_p2p::{Message, MessageKind, MessageSink, SharedTransport};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, trace, warn};

/// Sub-protocol currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Election,
    Sample,
    Gossip,
    /// View recomputation at the end of an epoch
    Compute,
}

/// Traffic and mailbox counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Messages successfully sent
    pub msg_count: u64,
    /// Bytes successfully sent
    pub byte_count: u64,
    pub largest_msg_size: u64,
    /// Messages accepted into the mailbox
    pub msg_received: u64,
    pub fail_to_send: u64,
    pub expired_msg: u64,
    pub bad_signature: u64,
    pub not_in_view: u64,
    /// Accepted messages no sub-protocol asked for
    pub discarded: u64,
}

/// Serializable copy of a node's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub address: String,
    pub round: Round,
    pub epoch: u64,
    pub phase: Phase,
    pub view: Vec<u64>,
    pub init_view_size: usize,
    pub last_leader: Option<Identity>,
    pub started: bool,
    pub finished: bool,
    pub malicious: bool,
    pub exited: bool,
    pub start_time: Option<Timestamp>,
    pub finish_time: Option<Timestamp>,
    pub counters: Counters,
}

#[derive(Default)]
struct StateInner {
    params: Option<Arc<SetupParams>>,
    round: Round,
    epoch: u64,
    phase: Phase,
    in_queue: Vec<Message>,
    id_to_addr: HashMap<NodeId, String>,
    view: Vec<u64>,
    last_leader: Option<Identity>,
    started: bool,
    finished: bool,
    malicious: bool,
    exited: bool,
    start_time: Option<Timestamp>,
    finish_time: Option<Timestamp>,
    counters: Counters,
}

impl StateInner {
    fn offset(&self) -> u64 {
        self.params.as_ref().map(|p| p.offset).unwrap_or(0)
    }
}

/// Per-node protocol state
pub struct ProtocolState {
    keypair: KeyPair,
    me: Identity,
    transport: SharedTransport,
    inner: RwLock<StateInner>,
    exit_tx: watch::Sender<bool>,
    send_permits: Arc<Semaphore>,
}

impl ProtocolState {
    /// Create an idle node reachable at `address`
    pub fn new(
        keypair: KeyPair,
        address: impl Into<String>,
        transport: SharedTransport,
        max_in_flight_sends: usize,
    ) -> Self {
        let me = keypair.identity(address);
        let (exit_tx, _) = watch::channel(false);
        Self {
            keypair,
            me,
            transport,
            inner: RwLock::new(StateInner::default()),
            exit_tx,
            send_permits: Arc::new(Semaphore::new(max_in_flight_sends.max(1))),
        }
    }

    pub fn me(&self) -> &Identity {
        &self.me
    }

    pub fn id(&self) -> NodeId {
        self.me.id()
    }

    pub(crate) fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub(crate) fn send_permits(&self) -> &Arc<Semaphore> {
        &self.send_permits
    }

    // ===== Lifecycle =====

    /// Install run parameters and reset all per-run state
    pub fn setup(&self, params: SetupParams) -> RvrResult<()> {
        params.validate()?;

        let mut inner = self.inner.write();
        if inner.started {
            return Err(RvrError::AlreadyStarted);
        }

        let id_to_addr: HashMap<NodeId, String> = params
            .init_view
            .iter()
            .map(|member| (member.id(), member.address.clone()))
            .collect();
        if !id_to_addr.contains_key(&self.me.id()) {
            warn!("Node {} is not part of its own init view", self.me);
        }
        let mut view: Vec<u64> = id_to_addr.keys().map(|id| id.as_u64()).collect();
        view.sort_unstable();

        info!(
            "Setup {}: {} members, x = {}, {} epochs",
            self.me,
            params.n(),
            params.x,
            params.repetitions()
        );

        let exited = inner.exited;
        *inner = StateInner {
            params: Some(Arc::new(params)),
            id_to_addr,
            view,
            exited,
            ..StateInner::default()
        };
        Ok(())
    }

    /// Launch the reconciliation loop under a supervisor, plus the local monitor
    pub fn start(self: &Arc<Self>) -> RvrResult<()> {
        let params = {
            let mut inner = self.inner.write();
            if inner.started {
                return Err(RvrError::AlreadyStarted);
            }
            if inner.exited {
                return Err(RvrError::Exited);
            }
            let params = inner
                .params
                .clone()
                .ok_or_else(|| RvrError::ConfigError("setup must run before start".into()))?;
            inner.started = true;
            inner.start_time = Some(Timestamp::now());
            params
        };

        info!("Starting {} at round 0", self.me);
        tokio::spawn(Arc::clone(self).supervise());
        if params.monitor_period().is_some() {
            tokio::spawn(monitor::run(Arc::clone(self)));
        }
        Ok(())
    }

    async fn supervise(self: Arc<Self>) {
        let worker = tokio::spawn(reconciliation::run(Arc::clone(&self)));
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(RvrError::Exited)) => {
                info!("{} stopped by exit at round {}", self.me, self.round());
                self.mark_finished();
            }
            Ok(Err(e)) => {
                error!("{} protocol failed: {}", self.me, e);
                self.mark_finished();
                self.exit();
            }
            Err(e) => {
                error!("{} protocol task panicked: {}", self.me, e);
                self.mark_finished();
                self.exit();
            }
        }
    }

    /// Fire the node-wide exit signal
    pub fn exit(&self) {
        self.inner.write().exited = true;
        self.exit_tx.send_replace(true);
    }

    pub fn exit_receiver(&self) -> watch::Receiver<bool> {
        self.exit_tx.subscribe()
    }

    pub fn has_exited(&self) -> bool {
        self.inner.read().exited
    }

    pub(crate) fn mark_finished(&self) {
        let mut inner = self.inner.write();
        if !inner.finished {
            inner.finished = true;
            inner.finish_time = Some(Timestamp::now());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.read().finished
    }

    pub(crate) fn mark_malicious(&self) {
        self.inner.write().malicious = true;
    }

    pub fn is_malicious(&self) -> bool {
        self.inner.read().malicious
    }

    // ===== Round bookkeeping =====

    pub fn params(&self) -> RvrResult<Arc<SetupParams>> {
        self.inner
            .read()
            .params
            .clone()
            .ok_or_else(|| RvrError::ConfigError("node has not been set up".into()))
    }

    /// A clock ticking at the configured round duration
    pub fn clock(&self) -> RvrResult<RoundClock> {
        let params = self.params()?;
        Ok(RoundClock::new(params.round_duration, self.exit_receiver()))
    }

    pub fn round(&self) -> Round {
        self.inner.read().round
    }

    /// `rounds` times: wait for a tick, then move to the next round
    pub async fn advance(&self, clock: &mut RoundClock, rounds: u64) -> RvrResult<()> {
        for _ in 0..rounds {
            clock.tick().await?;
            self.inner.write().round += 1;
        }
        Ok(())
    }

    /// Jump ahead after a stretch of frozen-round ticks
    pub(crate) fn skip_rounds(&self, rounds: u64) {
        self.inner.write().round += rounds;
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.inner.write().phase = phase;
    }

    pub(crate) fn set_epoch(&self, epoch: u64) {
        self.inner.write().epoch = epoch;
    }

    pub(crate) fn set_last_leader(&self, leader: Option<Identity>) {
        self.inner.write().last_leader = leader;
    }

    // ===== Roster and view =====

    /// Roster members paired with their addresses
    pub fn roster(&self) -> Vec<Identity> {
        self.inner
            .read()
            .params
            .as_ref()
            .map(|p| p.init_view.clone())
            .unwrap_or_default()
    }

    /// Roster ids with their addresses, in roster order
    pub(crate) fn peers(&self) -> Vec<(NodeId, String)> {
        self.roster()
            .into_iter()
            .map(|member| (member.id(), member.address))
            .collect()
    }

    pub fn is_member(&self, id: NodeId) -> bool {
        self.inner.read().id_to_addr.contains_key(&id)
    }

    pub fn address_of(&self, id: NodeId) -> Option<String> {
        self.inner.read().id_to_addr.get(&id).cloned()
    }

    pub fn view(&self) -> Vec<u64> {
        self.inner.read().view.clone()
    }

    /// Overwrite the view; stored sorted and deduplicated
    pub fn set_view(&self, mut view: Vec<u64>) {
        view.sort_unstable();
        view.dedup();
        self.inner.write().view = view;
    }

    // ===== Messages =====

    /// Unsigned message from this node at the current round
    pub(crate) fn message(&self, kind: MessageKind) -> Message {
        Message::new(kind, self.round(), self.me.clone())
    }

    pub(crate) fn sign(&self, msg: Message) -> Message {
        msg.signed(&self.keypair)
    }

    /// Mailbox entry point. Checks the round window, the signature and roster
    /// membership, in that order. A message too far in the future outside Gossip
    /// marks this node as desynchronized and is dropped.
    pub fn send_in_msg(&self, msg: Message) -> RvrResult<()> {
        // cheap reject before paying for the signature check
        {
            let mut inner = self.inner.write();
            Self::check_expiry(&mut inner, &msg)?;
        }

        if let Err(e) = msg.verify() {
            self.inner.write().counters.bad_signature += 1;
            debug!("Bad signature on {}", msg);
            return Err(e);
        }

        self.enqueue_verified(msg)
    }

    /// Second half of the gate, run under one write lock once the signature checked out
    fn enqueue_verified(&self, msg: Message) -> RvrResult<()> {
        let sender = msg.sender.id();
        let mut inner = self.inner.write();
        // the round may have ticked while the signature was checked
        Self::check_expiry(&mut inner, &msg)?;
        if !inner.id_to_addr.contains_key(&sender) {
            inner.counters.not_in_view += 1;
            return Err(RvrError::NotInView(sender));
        }

        let offset = inner.offset();
        if msg.round > inner.round.saturating_add(offset) && inner.phase != Phase::Gossip {
            if !inner.malicious {
                warn!(
                    "{} is out of sync: {} arrived at round {}",
                    self.me, msg, inner.round
                );
            }
            inner.malicious = true;
            return Ok(());
        }

        inner.in_queue.push(msg);
        inner.counters.msg_received += 1;
        Ok(())
    }

    fn check_expiry(inner: &mut StateInner, msg: &Message) -> RvrResult<()> {
        let current = inner.round;
        if msg.round.saturating_add(inner.offset()) < current {
            inner.counters.expired_msg += 1;
            debug!("Expired {} (current round {})", msg, current);
            return Err(RvrError::ExpiredMessage {
                round: msg.round,
                current,
            });
        }
        Ok(())
    }

    /// Take queued messages of `kinds` in arrival order. Messages from a future round
    /// stay queued; anything else is discarded.
    pub fn drain(&self, kinds: &[MessageKind]) -> Vec<Message> {
        self.drain_ahead(kinds, 0)
    }

    /// Like `drain`, but also takes matching messages up to `ahead` rounds in the future
    pub fn drain_ahead(&self, kinds: &[MessageKind], ahead: u64) -> Vec<Message> {
        let mut inner = self.inner.write();
        let current = inner.round;
        let horizon = current.saturating_add(ahead);
        let queue = std::mem::take(&mut inner.in_queue);

        let mut taken = Vec::new();
        for msg in queue {
            if kinds.contains(&msg.kind) && msg.round <= horizon {
                taken.push(msg);
            } else if msg.round > current {
                inner.in_queue.push(msg);
            } else {
                trace!("Discarding {}", msg);
                inner.counters.discarded += 1;
            }
        }
        taken
    }

    pub(crate) fn record_sent(&self, size: usize) {
        let mut inner = self.inner.write();
        if inner.exited {
            return;
        }
        inner.counters.msg_count += 1;
        inner.counters.byte_count += size as u64;
        inner.counters.largest_msg_size = inner.counters.largest_msg_size.max(size as u64);
    }

    pub(crate) fn record_send_failure(&self) {
        let mut inner = self.inner.write();
        if !inner.exited {
            inner.counters.fail_to_send += 1;
        }
    }

    pub fn counters(&self) -> Counters {
        self.inner.read().counters
    }

    /// Latency probe sink
    pub fn black_hole(&self, payload: &[u8]) {
        trace!("Black hole swallowed {} bytes", payload.len());
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let inner = self.inner.read();
        NodeSnapshot {
            id: self.me.id(),
            address: self.me.address.clone(),
            round: inner.round,
            epoch: inner.epoch,
            phase: inner.phase,
            view: inner.view.clone(),
            init_view_size: inner.id_to_addr.len(),
            last_leader: inner.last_leader.clone(),
            started: inner.started,
            finished: inner.finished,
            malicious: inner.malicious,
            exited: inner.exited,
            start_time: inner.start_time,
            finish_time: inner.finish_time,
            counters: inner.counters,
        }
    }
}

impl MessageSink for ProtocolState {
    fn send_in_msg(&self, msg: Message) -> RvrResult<()> {
        ProtocolState::send_in_msg(self, msg)
    }

    fn black_hole(&self, payload: &[u8]) {
        ProtocolState::black_hole(self, payload)
    }
}
