//! Leader proposal dissemination
//!
//! The round counter is frozen while gossip runs so a relayed message keeps the
//! leader's round and signature; the counter catches up by `x` at the end.

use crate::clock::RoundClock;
use crate::engine::{Phase, ProtocolState};
use crate::outbox::Outbox;
use rand::seq::SliceRandom;
use rvr_core::{NodeId, RvrResult};
use rvr_crypto::keys::Identity;
use rvr_p2p::{Message, MessageKind};
use std::sync::Arc;
use tracing::{debug, info};

/// The first proposal that really comes from `leader`; relays by anyone else are ignored
fn adopt_proposal(msgs: Vec<Message>, leader: &Identity) -> Option<Message> {
    msgs.into_iter().find(|msg| &msg.sender == leader)
}

/// Run one gossip phase. Returns the leader's proposed view if it reached this node.
pub async fn run(
    state: &Arc<ProtocolState>,
    clock: &mut RoundClock,
    leader: Option<&Identity>,
) -> RvrResult<Option<Vec<u64>>> {
    let params = state.params()?;
    state.set_phase(Phase::Gossip);
    state.advance(clock, 1).await?;

    let Some(leader) = leader else {
        state.advance(clock, params.x).await?;
        return Ok(None);
    };

    let mut proposal: Option<Arc<Message>> = if leader == state.me() {
        let msg = state.message(MessageKind::GossipMessage).with_view(state.view());
        Some(Arc::new(state.sign(msg)))
    } else {
        None
    };

    let peers = state.peers();
    let fanout = params.gossip_fanout_size();
    let mut outbox = Outbox::new(state);

    for _ in 0..params.x {
        if proposal.is_none() {
            proposal = adopt_proposal(
                state.drain_ahead(&[MessageKind::GossipMessage], params.offset),
                leader,
            )
            .map(Arc::new);
            if proposal.is_some() {
                debug!("{} adopted the proposal of {}", state.me(), leader);
            }
        }
        if let Some(msg) = &proposal {
            let targets: Vec<&(NodeId, String)> =
                peers.choose_multiple(&mut rand::thread_rng(), fanout).collect();
            outbox.broadcast(targets, msg);
        }
        outbox.reap();
        clock.tick().await?;
    }
    state.skip_rounds(params.x);

    let proposal = proposal.map(|msg| msg.view.clone());
    info!(
        "{} gossip done at round {}, proposal {}",
        state.me(),
        state.round(),
        if proposal.is_some() { "received" } else { "missing" }
    );
    Ok(proposal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::setup_node;
    use rvr_core::RvrError;

    #[test]
    fn test_proposal_from_non_leader_ignored() {
        let (state, keys) = setup_node(3);
        let leader = keys[1].identity("node-1");

        // a roster member signing under the leader's address is still not the leader
        let forged = Message::new(MessageKind::GossipMessage, 0, leader.clone())
            .with_view(vec![1, 2])
            .signed(&keys[2]);
        state.send_in_msg(forged).unwrap();
        let drained = state.drain_ahead(&[MessageKind::GossipMessage], 2);
        assert_eq!(drained.len(), 1);
        assert!(adopt_proposal(drained, &leader).is_none());

        // claiming the leader's key without holding it fails at the mailbox
        let mut stolen = Message::new(MessageKind::GossipMessage, 0, leader.clone())
            .with_view(vec![1, 2])
            .signed(&keys[2]);
        stolen.sender = leader.clone();
        assert!(matches!(state.send_in_msg(stolen), Err(RvrError::BadSignature)));

        let genuine = Message::new(MessageKind::GossipMessage, 0, leader.clone())
            .with_view(vec![3])
            .signed(&keys[1]);
        state.send_in_msg(genuine).unwrap();
        let adopted = adopt_proposal(state.drain_ahead(&[MessageKind::GossipMessage], 2), &leader);
        assert_eq!(adopted.unwrap().view, vec![3]);
    }
}
