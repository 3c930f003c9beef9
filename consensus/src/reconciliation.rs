//! View reconciliation loop
//!
//! One epoch is Election, Sample and Gossip followed by a recomputation of the view
//! from the sampled scores and the leader's proposal. Repeating the epoch
//! `ceil(6 ln(2/delta)) + 1` times drives honest nodes to a common view.

use crate::engine::{Phase, ProtocolState};
use crate::sample::Scores;
use crate::{election, gossip, sample};
use rvr_core::RvrResult;
use std::sync::Arc;
use tracing::info;

/// Score a leader needs to put an id in its proposal
pub const LEADER_THRESHOLD: f64 = 0.4;
/// Score above which an id is kept regardless of the proposal
pub const ACCEPT_THRESHOLD: f64 = 0.65;
/// Lowest score at which the proposal (or current view) can keep an id
pub const CONSIDER_THRESHOLD: f64 = 0.16;

/// The leader's proposal: every id scoring above `LEADER_THRESHOLD`
pub fn leader_view(scores: &Scores) -> Vec<u64> {
    scores
        .iter()
        .filter(|(_, score)| **score > LEADER_THRESHOLD)
        .map(|(id, _)| *id)
        .collect()
}

/// Combine the sampled scores with the leader's proposal, or with the current view
/// when no proposal arrived. Without scores the view is left as it is.
pub fn reconcile_view(scores: Option<&Scores>, proposal: Option<&[u64]>, current: &[u64]) -> Vec<u64> {
    let Some(scores) = scores else {
        return current.to_vec();
    };
    let reference = proposal.unwrap_or(current);
    // scores iterate in id order, so the result is sorted
    scores
        .iter()
        .filter(|(id, score)| {
            **score > ACCEPT_THRESHOLD
                || (**score >= CONSIDER_THRESHOLD && reference.contains(*id))
        })
        .map(|(id, _)| *id)
        .collect()
}

/// Run every epoch, then mark the node finished
pub async fn run(state: Arc<ProtocolState>) -> RvrResult<()> {
    let params = state.params()?;
    let mut clock = state.clock()?;
    let sketch = params.sketch();
    info!(
        "{} running {} epochs, expecting {} rounds",
        state.me(),
        sketch.epochs,
        sketch.total_rounds
    );

    for epoch in 0..sketch.epochs {
        state.set_epoch(epoch);
        state.advance(&mut clock, 1).await?;

        let leader = election::run(&state, &mut clock).await?;
        state.set_last_leader(leader.clone());

        let scores = sample::run(&state, &mut clock).await?;
        let is_leader = leader.as_ref() == Some(state.me());
        if let (true, Some(scores)) = (is_leader, &scores) {
            state.set_view(leader_view(scores));
        }

        let proposal = gossip::run(&state, &mut clock, leader.as_ref()).await?;

        state.set_phase(Phase::Compute);
        let view = reconcile_view(scores.as_ref(), proposal.as_deref(), &state.view());
        state.set_view(view);
        info!(
            "{} finished epoch {} at round {} with {} members in view",
            state.me(),
            epoch,
            state.round(),
            state.view().len()
        );
    }

    state.mark_finished();
    info!(
        "{} finished: sketched {} rounds ({:?}), took {}",
        state.me(),
        sketch.total_rounds,
        sketch.duration,
        state.round()
    );
    Ok(())
}
