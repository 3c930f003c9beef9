//! Opinion sampling with commit-reveal
//!
//! Nodes commit to a nonce, reveal it, and then answer each other's requests with
//! their view only when a hash of both nonces falls under the sampling probability.
//! Neither side can bias who samples whom after the commitments are out.

use crate::clock::RoundClock;
use crate::engine::{Phase, ProtocolState};
use crate::outbox::Outbox;
use rvr_core::{NodeId, RvrResult};
use rvr_crypto::hashing::{commitment, eval_hash_with_difficulty, verify_commitment};
use rvr_p2p::{Message, MessageKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Support score per node id, normalised by `n * sU`
pub type Scores = BTreeMap<u64, f64>;

/// Whether `count` responses out of `n` are enough to trust the scores
pub fn sample_quorum_reached(count: usize, n: usize, f: f64, g: f64) -> bool {
    count as f64 >= (1.0 - 4.0 * g) / (1.0 + f) * n as f64
}

/// Send `msg` to each of `targets` that has not received a `msg.kind` yet
fn send_once(outbox: &mut Outbox, targets: &[(NodeId, String)], msg: &Arc<Message>) {
    for (peer, addr) in targets {
        if !outbox.delivered(msg.kind, *peer) {
            outbox.send(*peer, addr.clone(), Arc::clone(msg));
        }
    }
}

/// Commitments by sender; a later commitment from the same sender replaces the earlier one
fn collect_commitments(msgs: Vec<Message>) -> HashMap<NodeId, Vec<u8>> {
    let mut commitments = HashMap::new();
    for msg in msgs {
        commitments.insert(msg.sender.id(), msg.nonce);
    }
    commitments
}

/// Whether `nonce` opens the commitment `sender` made earlier
fn opens(commitments: &HashMap<NodeId, Vec<u8>>, sender: NodeId, nonce: &[u8]) -> bool {
    commitments
        .get(&sender)
        .map(|com| verify_commitment(nonce, com))
        .unwrap_or(false)
}

/// Split valid reveals into peers that get our view and peers that get a nil answer.
/// Reveals from outsiders, reveals that do not open a commitment and repeated reveals
/// are ignored.
fn sort_reveals(
    state: &ProtocolState,
    msgs: Vec<Message>,
    commitments: &HashMap<NodeId, Vec<u8>>,
    my_nonce: &[u8],
    lowered: f64,
) -> (Vec<(NodeId, String)>, Vec<(NodeId, String)>) {
    let mut revealed: HashSet<NodeId> = HashSet::new();
    let mut to_send = Vec::new();
    let mut to_send_nil = Vec::new();
    for msg in msgs {
        let sender = msg.sender.id();
        let Some(address) = state.address_of(sender) else {
            continue;
        };
        if !opens(commitments, sender, &msg.nonce) || !revealed.insert(sender) {
            debug!("Ignoring reveal from {}", msg.sender);
            continue;
        }
        if eval_hash_with_difficulty(&msg.nonce, my_nonce, lowered) {
            to_send.push((sender, address));
        } else {
            to_send_nil.push((sender, address));
        }
    }
    (to_send, to_send_nil)
}

/// Count valid answers and score the ids carried by the views we were sampled for
fn tally_responses(
    state: &ProtocolState,
    msgs: Vec<Message>,
    commitments: &HashMap<NodeId, Vec<u8>>,
    my_nonce: &[u8],
    probability: f64,
) -> (usize, Scores) {
    let mut responded: HashSet<NodeId> = HashSet::new();
    let mut scores = Scores::new();
    for msg in msgs {
        let sender = msg.sender.id();
        if !opens(commitments, sender, &msg.nonce)
            || !state.is_member(sender)
            || !responded.insert(sender)
        {
            continue;
        }
        if msg.kind == MessageKind::SampleView
            && eval_hash_with_difficulty(my_nonce, &msg.nonce, probability)
        {
            let ids: HashSet<u64> = msg.view.iter().copied().collect();
            for id in ids {
                *scores.entry(id).or_insert(0.0) += 1.0;
            }
        }
    }
    (responded.len(), scores)
}

/// Run one sample. `None` when too few peers answered.
pub async fn run(state: &Arc<ProtocolState>, clock: &mut RoundClock) -> RvrResult<Option<Scores>> {
    let params = state.params()?;
    state.set_phase(Phase::Sample);
    state.advance(clock, 1).await?;

    let n = params.n();
    let probability = params.sample_probability();
    let lowered = probability * (1.0 + params.f);
    let peers = state.peers();
    let nonce: [u8; 32] = rand::random();
    let mut outbox = Outbox::new(state);

    // commit
    for _ in 0..params.l {
        let msg = state
            .message(MessageKind::SampleCommitment)
            .with_nonce(commitment(&nonce));
        send_once(&mut outbox, &peers, &Arc::new(state.sign(msg)));
        state.advance(clock, 1).await?;
    }
    state.advance(clock, params.offset).await?;

    let commitments = collect_commitments(state.drain(&[MessageKind::SampleCommitment]));

    // reveal
    for _ in 0..params.l {
        let msg = state.message(MessageKind::SampleNonce).with_nonce(nonce.to_vec());
        send_once(&mut outbox, &peers, &Arc::new(state.sign(msg)));
        state.advance(clock, 1).await?;
    }
    state.advance(clock, params.offset).await?;

    let (to_send, to_send_nil) = sort_reveals(
        state,
        state.drain(&[MessageKind::SampleNonce]),
        &commitments,
        &nonce,
        lowered,
    );

    // respond
    for _ in 0..params.l {
        let view = state
            .message(MessageKind::SampleView)
            .with_view(state.view())
            .with_nonce(nonce.to_vec());
        send_once(&mut outbox, &to_send, &Arc::new(state.sign(view)));
        let nil = state.message(MessageKind::SampleNil).with_nonce(nonce.to_vec());
        send_once(&mut outbox, &to_send_nil, &Arc::new(state.sign(nil)));
        state.advance(clock, 1).await?;
    }
    state.advance(clock, params.offset).await?;

    let (count, mut scores) = tally_responses(
        state,
        state.drain(&[MessageKind::SampleView, MessageKind::SampleNil]),
        &commitments,
        &nonce,
        probability,
    );
    if !sample_quorum_reached(count, n, params.f, params.g) {
        warn!(
            "{} sample failed at round {}: {} of {} answered",
            state.me(),
            state.round(),
            count,
            n
        );
        return Ok(None);
    }

    let scale = n as f64 * probability;
    for score in scores.values_mut() {
        *score /= scale;
    }
    info!(
        "{} sampled {} answers, {} ids scored",
        state.me(),
        count,
        scores.len()
    );
    Ok(Some(scores))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::setup_node;
    use rvr_crypto::keys::KeyPair;

    fn msg_from(kp: &KeyPair, kind: MessageKind, nonce: &[u8]) -> Message {
        Message::new(kind, 0, kp.identity("peer"))
            .with_nonce(nonce.to_vec())
            .signed(kp)
    }

    /// Push messages through the mailbox and drain them back
    fn delivered(state: &ProtocolState, kind: MessageKind, msgs: Vec<Message>) -> Vec<Message> {
        for msg in msgs {
            let _ = state.send_in_msg(msg);
        }
        state.drain(&[kind])
    }

    #[test]
    fn test_later_commitment_replaces_earlier() {
        let (state, keys) = setup_node(2);
        let msgs = delivered(
            &state,
            MessageKind::SampleCommitment,
            vec![
                msg_from(&keys[1], MessageKind::SampleCommitment, &commitment(b"first")),
                msg_from(&keys[1], MessageKind::SampleCommitment, &commitment(b"second")),
            ],
        );
        let commitments = collect_commitments(msgs);
        assert_eq!(commitments.len(), 1);
        assert!(opens(&commitments, keys[1].node_id(), b"second"));
        assert!(!opens(&commitments, keys[1].node_id(), b"first"));
    }

    #[test]
    fn test_reveals_must_open_commitments_once() {
        let (state, keys) = setup_node(4);
        let mut commitments = HashMap::new();
        commitments.insert(keys[1].node_id(), commitment(b"one"));
        commitments.insert(keys[2].node_id(), commitment(b"two"));

        let reveals = delivered(
            &state,
            MessageKind::SampleNonce,
            vec![
                msg_from(&keys[1], MessageKind::SampleNonce, b"one"),
                // duplicate reveal
                msg_from(&keys[1], MessageKind::SampleNonce, b"one"),
                // does not match the commitment
                msg_from(&keys[2], MessageKind::SampleNonce, b"not two"),
                // never committed
                msg_from(&keys[3], MessageKind::SampleNonce, b"three"),
            ],
        );
        assert_eq!(reveals.len(), 4);

        let (to_send, to_send_nil) = sort_reveals(&state, reveals, &commitments, b"mine", 1.0);
        assert_eq!(to_send, vec![(keys[1].node_id(), "node-1".to_string())]);
        assert!(to_send_nil.is_empty());
    }

    #[test]
    fn test_unpicked_reveals_get_nil_answers() {
        let (state, keys) = setup_node(2);
        let mut commitments = HashMap::new();
        commitments.insert(keys[1].node_id(), commitment(b"one"));
        let reveals = delivered(
            &state,
            MessageKind::SampleNonce,
            vec![msg_from(&keys[1], MessageKind::SampleNonce, b"one")],
        );

        let (to_send, to_send_nil) = sort_reveals(&state, reveals, &commitments, b"mine", 0.0);
        assert!(to_send.is_empty());
        assert_eq!(to_send_nil.len(), 1);
    }

    #[test]
    fn test_tally_counts_only_committed_responders() {
        let (state, keys) = setup_node(4);
        let mut commitments = HashMap::new();
        commitments.insert(keys[1].node_id(), commitment(b"one"));
        commitments.insert(keys[2].node_id(), commitment(b"two"));

        let view = |kp: &KeyPair, nonce: &[u8]| {
            Message::new(MessageKind::SampleView, 0, kp.identity("peer"))
                .with_view(vec![11, 12, 12])
                .with_nonce(nonce.to_vec())
                .signed(kp)
        };
        let msgs = vec![
            view(&keys[1], b"one"),
            // second answer from the same peer
            view(&keys[1], b"one"),
            msg_from(&keys[2], MessageKind::SampleNil, b"two"),
            // no commitment on record
            view(&keys[3], b"three"),
        ];
        for msg in msgs {
            state.send_in_msg(msg).unwrap();
        }
        let responses = state.drain(&[MessageKind::SampleView, MessageKind::SampleNil]);

        let (count, scores) = tally_responses(&state, responses, &commitments, b"mine", 1.0);
        assert_eq!(count, 2);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[&11], 1.0);
        assert_eq!(scores[&12], 1.0);
    }

    #[test]
    fn test_quorum_boundary_passes() {
        // (1 - 4 * 0.0625) * 4 is exactly 3
        assert!(sample_quorum_reached(3, 4, 0.0, 0.0625));
        assert!(!sample_quorum_reached(2, 4, 0.0, 0.0625));
        // 1 / (1 + 1) * 10 is exactly 5
        assert!(sample_quorum_reached(5, 10, 1.0, 0.0));
        assert!(!sample_quorum_reached(4, 10, 1.0, 0.0));
    }

    #[test]
    fn test_quorum_needs_whole_roster_when_small() {
        // 0.98 / 1.01 * 10 ~ 9.70
        assert!(sample_quorum_reached(10, 10, 0.01, 0.005));
        assert!(!sample_quorum_reached(9, 10, 0.01, 0.005));
    }

    #[test]
    fn test_quorum_without_noise_or_faults() {
        assert!(sample_quorum_reached(4, 4, 0.0, 0.0));
        assert!(!sample_quorum_reached(3, 4, 0.0, 0.0));
        assert!(sample_quorum_reached(0, 0, 0.0, 0.0));
    }
}
