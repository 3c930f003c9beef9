//! Leader election by moderated proof-of-work
//!
//! Every node commits a challenge nonce, builds a Merkle tree over the challenges it
//! received and then hunts for a header whose hash with the tree root falls under the
//! puzzle difficulty. A solution proves to each receiver that its own challenge was
//! included, so precomputed solutions are useless.

use crate::clock::RoundClock;
use crate::engine::{Phase, ProtocolState};
use crate::merkle::{eval_proof, PuzzleMerkleTree};
use crate::outbox::Outbox;
use crate::params::SetupParams;
use rvr_core::{LeaderTieBreak, NodeId, RvrError, RvrResult};
use rvr_crypto::hashing::{eval_hash_with_difficulty, hash_strength};
use rvr_crypto::keys::Identity;
use rvr_p2p::{Message, MessageKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Run one election. `None` means no valid solution was seen.
pub async fn run(state: &Arc<ProtocolState>, clock: &mut RoundClock) -> RvrResult<Option<Identity>> {
    let params = state.params()?;
    state.set_phase(Phase::Election);
    state.advance(clock, 1).await?;

    let me = state.me().clone();
    let my_id = me.id();
    let peers: Vec<(NodeId, String)> = state
        .peers()
        .into_iter()
        .filter(|(id, _)| *id != my_id)
        .collect();
    let nonce: [u8; 32] = rand::random();
    let mut outbox = Outbox::new(state);

    for _ in 0..params.l {
        let challenge = state.message(MessageKind::ElectionChallenge).with_nonce(nonce.to_vec());
        outbox.broadcast(&peers, &Arc::new(state.sign(challenge)));
        state.advance(clock, 1).await?;
    }
    state.advance(clock, params.offset).await?;

    let mut tree = PuzzleMerkleTree::new();
    tree.add_nonce(my_id, nonce.to_vec())?;
    for msg in state.drain(&[MessageKind::ElectionChallenge]) {
        let sender = msg.sender.id();
        if !state.is_member(sender) {
            continue;
        }
        if let Err(e) = tree.add_nonce(sender, msg.nonce) {
            debug!("Ignoring challenge: {}", e);
        }
    }
    let root = tree
        .root_hash()
        .ok_or_else(|| RvrError::Internal("puzzle tree has no root".into()))?;
    debug!("{} built a puzzle tree over {} challenges", me, tree.len());

    let difficulty = params.election_difficulty();
    let solution = solve(state, clock, &params, root.clone(), difficulty / (1.0 + params.f)).await?;

    let mut leader: Option<(Identity, f64)> = None;
    match solution {
        Some(header) => {
            info!("{} solved the puzzle at round {}", me, state.round());
            leader = Some((me.clone(), hash_strength(&header, &root)));

            let holders: Vec<&(NodeId, String)> =
                peers.iter().filter(|(id, _)| tree.contains(*id)).collect();
            let mut solutions = Vec::new();
            for (id, addr) in holders {
                let (proof, order) = tree.get_proof(*id)?;
                let msg = state
                    .message(MessageKind::ElectionSolution)
                    .with_nonce(header.clone())
                    .with_proof(proof, order);
                solutions.push((*id, addr.clone(), msg));
            }
            for _ in 0..params.l {
                for (id, addr, msg) in &solutions {
                    let mut msg = msg.clone();
                    msg.round = state.round();
                    outbox.send(*id, addr.clone(), Arc::new(state.sign(msg)));
                }
                state.advance(clock, 1).await?;
            }
        }
        None => state.advance(clock, params.l).await?,
    }
    state.advance(clock, params.offset).await?;

    let leader = accept_solutions(
        state,
        state.drain(&[MessageKind::ElectionSolution]),
        &nonce,
        difficulty,
        params.leader_tie_break,
        leader,
    )
    .map(|(identity, _)| identity);
    match &leader {
        Some(identity) => info!("{} elected {} at round {}", me, identity, state.round()),
        None => info!("{} saw no leader at round {}", me, state.round()),
    }
    Ok(leader)
}

/// Proof-of-work stretch. A worker task makes `hashes_per_round` attempts per permit;
/// one permit is issued per tick. Closing the permit channel stops the worker, and the
/// worker is always joined before returning.
async fn solve(
    state: &Arc<ProtocolState>,
    clock: &mut RoundClock,
    params: &SetupParams,
    root: Vec<u8>,
    threshold: f64,
) -> RvrResult<Option<Vec<u8>>> {
    let attempts = params.hashes_per_round;
    let (permits, mut permit_rx) = mpsc::unbounded_channel::<()>();
    let worker = tokio::spawn(async move {
        while permit_rx.recv().await.is_some() {
            for _ in 0..attempts {
                let header: [u8; 32] = rand::random();
                if eval_hash_with_difficulty(&header, &root, threshold) {
                    return Some(header.to_vec());
                }
            }
        }
        None
    });

    let mut ticked = Ok(());
    for _ in 0..6 * (params.offset + params.l) {
        // fails once the worker has returned; the remaining ticks still elapse
        let _ = permits.send(());
        if let Err(e) = state.advance(clock, 1).await {
            ticked = Err(e);
            break;
        }
    }
    drop(permits);

    let solution = worker
        .await
        .map_err(|e| RvrError::Internal(format!("puzzle worker failed: {}", e)))?;
    ticked?;
    Ok(solution)
}

/// Check a solution against the receiver's own challenge. Returns the solution's
/// hash strength when it is valid.
pub fn verify_solution(msg: &Message, my_nonce: &[u8], difficulty: f64) -> Option<f64> {
    if msg.proof.first().map(Vec::as_slice) != Some(my_nonce) {
        return None;
    }
    let root = eval_proof(&msg.proof, &msg.order)?;
    if eval_hash_with_difficulty(&msg.nonce, &root, difficulty) {
        Some(hash_strength(&msg.nonce, &root))
    } else {
        None
    }
}

/// Fold received solutions into the current leader candidate. Solutions from outside
/// the roster or failing `verify_solution` leave the candidate untouched.
fn accept_solutions(
    state: &ProtocolState,
    solutions: Vec<Message>,
    my_nonce: &[u8],
    difficulty: f64,
    policy: LeaderTieBreak,
    mut leader: Option<(Identity, f64)>,
) -> Option<(Identity, f64)> {
    for msg in solutions {
        if !state.is_member(msg.sender.id()) {
            continue;
        }
        match verify_solution(&msg, my_nonce, difficulty) {
            Some(strength) => {
                leader = choose_leader(policy, leader, (msg.sender.clone(), strength));
            }
            None => debug!("Rejected solution from {}", msg.sender),
        }
    }
    leader
}

/// Apply the tie policy to a newly accepted solution
pub fn choose_leader(
    policy: LeaderTieBreak,
    current: Option<(Identity, f64)>,
    candidate: (Identity, f64),
) -> Option<(Identity, f64)> {
    match (policy, current) {
        (LeaderTieBreak::LowestHash, Some(current)) if current.1 <= candidate.1 => Some(current),
        _ => Some(candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::setup_node;
    use rvr_crypto::keys::KeyPair;

    fn solution_for(tree: &mut PuzzleMerkleTree, receiver: NodeId, solver: &KeyPair) -> Message {
        let (proof, order) = tree.get_proof(receiver).unwrap();
        Message::new(MessageKind::ElectionSolution, 0, solver.identity("solver"))
            .with_nonce(vec![7u8; 32])
            .with_proof(proof, order)
            .signed(solver)
    }

    fn tree(nonces: &[(u64, [u8; 32])]) -> PuzzleMerkleTree {
        let mut tree = PuzzleMerkleTree::new();
        for (id, nonce) in nonces {
            tree.add_nonce(NodeId(*id), nonce.to_vec()).unwrap();
        }
        tree
    }

    #[test]
    fn test_valid_solution_accepted() {
        let solver = KeyPair::generate();
        let mut tree = tree(&[(1, [1u8; 32]), (2, [2u8; 32]), (3, [3u8; 32])]);
        let msg = solution_for(&mut tree, NodeId(2), &solver);

        // every hash falls under difficulty 1
        let strength = verify_solution(&msg, &[2u8; 32], 1.0).unwrap();
        assert!((0.0..1.0).contains(&strength));
    }

    #[test]
    fn test_solution_for_other_challenge_rejected() {
        let solver = KeyPair::generate();
        let mut tree = tree(&[(1, [1u8; 32]), (2, [2u8; 32])]);
        let msg = solution_for(&mut tree, NodeId(1), &solver);
        assert!(verify_solution(&msg, &[2u8; 32], 1.0).is_none());
    }

    #[test]
    fn test_solution_above_difficulty_rejected() {
        let solver = KeyPair::generate();
        let mut tree = tree(&[(1, [1u8; 32])]);
        let msg = solution_for(&mut tree, NodeId(1), &solver);
        assert!(verify_solution(&msg, &[1u8; 32], 0.0).is_none());
    }

    #[test]
    fn test_malformed_proof_rejected() {
        let solver = KeyPair::generate();
        let mut tree = tree(&[(1, [1u8; 32]), (2, [2u8; 32])]);
        let mut msg = solution_for(&mut tree, NodeId(1), &solver);
        msg.order.push(true);
        assert!(verify_solution(&msg, &[1u8; 32], 1.0).is_none());
        msg.proof.clear();
        assert!(verify_solution(&msg, &[1u8; 32], 1.0).is_none());
    }

    #[test]
    fn test_forged_solution_in_mailbox_elects_nobody() {
        let (state, keys) = setup_node(3);
        let my_nonce = [9u8; 32];

        // proof over a tree that never saw our challenge
        let mut foreign = tree(&[(1, [1u8; 32]), (2, [2u8; 32])]);
        let forged = solution_for(&mut foreign, NodeId(1), &keys[1]);
        // proof over our challenge whose header misses the difficulty
        let mut ours = tree(&[(1, my_nonce), (2, [2u8; 32])]);
        let weak = solution_for(&mut ours, NodeId(1), &keys[2]);
        state.send_in_msg(forged).unwrap();
        state.send_in_msg(weak.clone()).unwrap();

        let solutions = state.drain(&[MessageKind::ElectionSolution]);
        assert_eq!(solutions.len(), 2);
        let forged_only = solutions[..1].to_vec();
        let policy = LeaderTieBreak::LastAccepted;

        // every hash falls under difficulty 1, so only the missing challenge rejects it
        assert!(accept_solutions(&state, forged_only, &my_nonce, 1.0, policy, None).is_none());
        assert!(accept_solutions(&state, solutions, &my_nonce, 0.0, policy, None).is_none());

        state.send_in_msg(weak).unwrap();
        let honest = state.drain(&[MessageKind::ElectionSolution]);
        let (leader, _) = accept_solutions(&state, honest, &my_nonce, 1.0, policy, None).unwrap();
        assert_eq!(leader, keys[2].identity("solver"));
    }

    #[test]
    fn test_outsider_solution_ignored() {
        let (state, _) = setup_node(2);
        let outsider = KeyPair::generate();
        let my_nonce = [9u8; 32];
        let mut ours = tree(&[(1, my_nonce)]);
        let msg = solution_for(&mut ours, NodeId(1), &outsider);

        let policy = LeaderTieBreak::LastAccepted;
        assert!(accept_solutions(&state, vec![msg], &my_nonce, 1.0, policy, None).is_none());
    }

    #[test]
    fn test_tie_policies() {
        let a = KeyPair::generate().identity("a");
        let b = KeyPair::generate().identity("b");

        let first = choose_leader(LeaderTieBreak::LastAccepted, None, (a.clone(), 0.1));
        let last = choose_leader(LeaderTieBreak::LastAccepted, first, (b.clone(), 0.5));
        assert_eq!(last.unwrap().0, b);

        let first = choose_leader(LeaderTieBreak::LowestHash, None, (a.clone(), 0.1));
        let lowest = choose_leader(LeaderTieBreak::LowestHash, first, (b.clone(), 0.5));
        assert_eq!(lowest.clone().unwrap().0, a);
        let lower = choose_leader(LeaderTieBreak::LowestHash, lowest, (b.clone(), 0.05));
        assert_eq!(lower.unwrap().0, b);
    }
}
