//! Local network monitor
//!
//! Periodically probes every roster member. A node that keeps seeing more failures
//! than the noise bound `g * n + 5` flags itself as malicious, since its view of the
//! network can no longer be trusted.

use crate::clock::wait_for_exit;
use crate::engine::ProtocolState;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

/// Payload size of a monitor probe
pub const PROBE_SIZE: usize = 2000;

/// Round-trip time per roster member, in roster order; `None` when the probe failed
pub type PingValueReport = Vec<Option<Duration>>;

/// Probes that failed or took at least a round
pub fn count_failures(report: &PingValueReport, round_duration: Duration) -> usize {
    report
        .iter()
        .filter(|rtt| rtt.map_or(true, |rtt| rtt >= round_duration))
        .count()
}

impl ProtocolState {
    /// Probe every roster member with a `size`-byte `black_hole` call
    pub async fn ping_report(&self, size: usize) -> PingValueReport {
        let Ok(params) = self.params() else {
            return Vec::new();
        };
        let timeout = params.round_duration;
        let payload: Vec<u8> = (0..size).map(|_| rand::random::<u8>()).collect();
        let transport = Arc::clone(self.transport());

        let probes = params.init_view.iter().map(|member| {
            let transport = Arc::clone(&transport);
            let payload = &payload;
            async move {
                let started = Instant::now();
                match time::timeout(timeout, transport.black_hole(&member.address, payload, timeout)).await {
                    Ok(Ok(())) => Some(started.elapsed()),
                    _ => None,
                }
            }
        });
        join_all(probes).await
    }
}

/// Monitor loop; stops when the node exits, finishes or has been flagged
pub async fn run(state: Arc<ProtocolState>) {
    let Ok(params) = state.params() else {
        return;
    };
    let Some(interval) = params.monitor_period() else {
        return;
    };
    let mut exit = state.exit_receiver();
    let limit = params.g * params.n() as f64 + 5.0;

    loop {
        tokio::select! {
            _ = wait_for_exit(&mut exit) => return,
            _ = time::sleep(interval) => {}
        }
        if state.is_finished() || state.is_malicious() {
            return;
        }

        let mut healthy = false;
        for attempt in 0..params.l {
            let report = state.ping_report(PROBE_SIZE).await;
            let failures = count_failures(&report, params.round_duration);
            if failures as f64 <= limit {
                healthy = true;
                break;
            }
            debug!(
                "{} saw {} failed probes (attempt {})",
                state.me(),
                failures,
                attempt + 1
            );
            tokio::select! {
                _ = wait_for_exit(&mut exit) => return,
                _ = time::sleep(params.round_duration) => {}
            }
        }
        if !healthy {
            warn!("{} keeps losing peers, flagging itself malicious", state.me());
            state.mark_malicious();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::setup_node;

    #[test]
    fn test_count_failures() {
        let round = Duration::from_millis(100);
        let report = vec![
            Some(Duration::ZERO),
            Some(Duration::from_millis(99)),
            Some(Duration::from_millis(100)),
            None,
        ];
        assert_eq!(count_failures(&report, round), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_monitor_returns_at_once() {
        let (state, _) = setup_node(3);
        let mut params = (*state.params().unwrap()).clone();
        params.monitor_interval = Some(Duration::ZERO);
        state.setup(params).unwrap();

        let stopped = time::timeout(Duration::from_secs(1), run(Arc::clone(&state))).await;
        assert!(stopped.is_ok());
        assert!(!state.is_malicious());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_report_marks_unreachable_peers() {
        let (state, _) = setup_node(3);
        // nobody is registered on the memory transport
        let report = state.ping_report(16).await;
        assert_eq!(report, vec![None, None, None]);
    }
}
