//! Setup parameters and the quantities derived from them

use rvr_core::{GossipFanout, LeaderTieBreak, ProtocolConfig, RvrError, RvrResult};
use rvr_crypto::keys::Identity;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::collections::HashSet;
use std::time::Duration;

/// Parameters fixed by `Setup` for one protocol run
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupParams {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "round_duration_ms")]
    pub round_duration: Duration,
    pub offset: u64,
    pub f: f64,
    pub g: f64,
    pub l: u64,
    /// Gossip rounds
    pub x: u64,
    pub delta: f64,
    pub hashes_per_round: u64,
    #[serde(default)]
    pub gossip_fanout: GossipFanout,
    #[serde(default)]
    pub leader_tie_break: LeaderTieBreak,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default, rename = "monitor_interval_secs")]
    pub monitor_interval: Option<Duration>,
    /// The roster
    pub init_view: Vec<Identity>,
}

/// Predicted length of a full run
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sketch {
    pub epochs: u64,
    pub rounds_per_epoch: u64,
    pub total_rounds: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "duration_ms")]
    pub duration: Duration,
}

/// `ceil(ln n / ln ln n + 4) * l + offset`, the log ratio clamped at zero for tiny rosters
pub fn gossip_rounds(n: usize, l: u64, offset: u64) -> u64 {
    let n = n.max(1) as f64;
    let ratio = n.ln() / n.ln().ln();
    let ratio = if ratio.is_finite() && ratio > 0.0 { ratio } else { 0.0 };
    (ratio + 4.0).ceil() as u64 * l + offset
}

impl SetupParams {
    /// Derive setup parameters from the protocol configuration and a roster
    pub fn new(config: &ProtocolConfig, init_view: Vec<Identity>) -> Self {
        let x = gossip_rounds(init_view.len(), config.l, config.offset);
        Self {
            round_duration: config.round_duration,
            offset: config.offset,
            f: config.f,
            g: config.g,
            l: config.l,
            x,
            delta: config.delta,
            hashes_per_round: config.hashes_per_round,
            gossip_fanout: config.gossip_fanout,
            leader_tie_break: config.leader_tie_break,
            monitor_interval: config.monitor_interval.filter(|d| !d.is_zero()),
            init_view,
        }
    }

    /// The protocol configuration these parameters were built from
    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            round_duration: self.round_duration,
            offset: self.offset,
            f: self.f,
            g: self.g,
            l: self.l,
            delta: self.delta,
            hashes_per_round: self.hashes_per_round,
            gossip_fanout: self.gossip_fanout,
            leader_tie_break: self.leader_tie_break,
            monitor_interval: self.monitor_interval,
        }
    }

    pub fn validate(&self) -> RvrResult<()> {
        self.protocol_config().validate()?;
        if self.init_view.is_empty() {
            return Err(RvrError::ConfigError("init view is empty".into()));
        }
        let mut seen = HashSet::new();
        for member in &self.init_view {
            if !seen.insert(member.id()) {
                return Err(RvrError::DuplicateId(member.id()));
            }
        }
        Ok(())
    }

    /// Local monitor period; a zero interval means the monitor is off
    pub fn monitor_period(&self) -> Option<Duration> {
        self.monitor_interval.filter(|d| !d.is_zero())
    }

    /// Roster size
    pub fn n(&self) -> usize {
        self.init_view.len()
    }

    pub fn repetitions(&self) -> u64 {
        self.protocol_config().repetitions()
    }

    /// Puzzle difficulty: `1 / (n * 6 * m * (offset + l))`
    pub fn election_difficulty(&self) -> f64 {
        1.0 / (self.n().max(1) as f64
            * 6.0
            * self.hashes_per_round as f64
            * (self.offset + self.l) as f64)
    }

    /// Sampling probability `sU`
    pub fn sample_probability(&self) -> f64 {
        let n = self.n().max(1) as f64;
        let (f, g) = (self.f, self.g);
        let noise = 10.0 / (1.0 - 25.0 * g - 7.5 * f).powi(2);
        let byzantine = 720.0 * (1.0 + f) * (3.0 + 5.0 * f) / (1.0 - 7.0 * f).powi(2);
        let su = (1.0 / n) * noise.max(byzantine) * (3.0 * n / self.delta).ln();
        su.min(1.0)
    }

    /// Number of roster members a gossip holder forwards to each round
    pub fn gossip_fanout_size(&self) -> usize {
        let n = self.n();
        match self.gossip_fanout {
            GossipFanout::Full => n,
            GossipFanout::Bounded => {
                let bound = (8.0 * (1.0 + self.f) * (n.max(1) as f64).ln() / self.delta).ceil();
                n.min(bound.max(1.0) as usize)
            }
        }
    }

    pub fn election_rounds(&self) -> u64 {
        1 + self.l + self.offset + 6 * (self.offset + self.l) + self.l + self.offset
    }

    pub fn sample_rounds(&self) -> u64 {
        1 + 3 * (self.l + self.offset)
    }

    pub fn gossip_rounds(&self) -> u64 {
        1 + self.x
    }

    /// Predicted round count and wall-clock duration of a run
    pub fn sketch(&self) -> Sketch {
        let epochs = self.repetitions();
        let rounds_per_epoch =
            1 + self.election_rounds() + self.sample_rounds() + self.gossip_rounds();
        let total_rounds = epochs * rounds_per_epoch;
        Sketch {
            epochs,
            rounds_per_epoch,
            total_rounds,
            duration: self.round_duration * total_rounds as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvr_crypto::keys::KeyPair;

    fn roster(n: usize) -> Vec<Identity> {
        (0..n)
            .map(|i| KeyPair::generate().identity(format!("node-{}", i)))
            .collect()
    }

    #[test]
    fn test_gossip_rounds_small_rosters() {
        // ln ln n is negative or zero below n = 3
        assert_eq!(gossip_rounds(1, 2, 2), 4 * 2 + 2);
        assert_eq!(gossip_rounds(2, 2, 2), 4 * 2 + 2);
        // n = 10: ln 10 / ln ln 10 ~ 2.76
        assert_eq!(gossip_rounds(10, 2, 2), 7 * 2 + 2);
    }

    #[test]
    fn test_sample_probability_saturates_for_small_rosters() {
        let params = SetupParams::new(&ProtocolConfig::default(), roster(10));
        assert_eq!(params.sample_probability(), 1.0);
    }

    #[test]
    fn test_election_difficulty() {
        let params = SetupParams::new(&ProtocolConfig::default(), roster(10));
        let expected = 1.0 / (10.0 * 6.0 * 1.0 * 4.0);
        assert!((params.election_difficulty() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_fanout_bounded_by_roster() {
        let mut config = ProtocolConfig::default();
        let params = SetupParams::new(&config, roster(10));
        assert_eq!(params.gossip_fanout_size(), 10);

        config.gossip_fanout = GossipFanout::Full;
        let params = SetupParams::new(&config, roster(3));
        assert_eq!(params.gossip_fanout_size(), 3);
    }

    #[test]
    fn test_sketch() {
        let params = SetupParams::new(&ProtocolConfig::default(), roster(10));
        let sketch = params.sketch();
        // election 1+2+2+24+2+2, sample 1+12, gossip 1+16, plus the epoch tick
        assert_eq!(sketch.rounds_per_epoch, 1 + 33 + 13 + 17);
        assert_eq!(sketch.epochs, 33);
        assert_eq!(sketch.total_rounds, 33 * 64);
    }

    #[test]
    fn test_json_uses_wire_names() {
        let params = SetupParams::new(&ProtocolConfig::default(), roster(2));
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["round_duration_ms"], 100);
        assert_eq!(json["monitor_interval_secs"], 10);
        assert_eq!(json["gossip_fanout"], "bounded");

        let restored: SetupParams = serde_json::from_value(json).unwrap();
        assert_eq!(restored.x, params.x);
        assert_eq!(restored.init_view, params.init_view);
    }

    #[test]
    fn test_zero_monitor_interval_disables_monitor() {
        let config: ProtocolConfig =
            serde_json::from_str(r#"{"monitor_interval_secs": 0}"#).unwrap();
        let params = SetupParams::new(&config, roster(3));
        assert_eq!(params.monitor_interval, None);
        assert_eq!(params.monitor_period(), None);

        let mut raw = params.clone();
        raw.monitor_interval = Some(Duration::ZERO);
        assert_eq!(raw.monitor_period(), None);
    }

    #[test]
    fn test_validate_rejects_duplicate_members() {
        let kp = KeyPair::generate();
        let params = SetupParams::new(
            &ProtocolConfig::default(),
            vec![kp.identity("a"), kp.identity("b")],
        );
        assert!(matches!(params.validate(), Err(RvrError::DuplicateId(_))));

        let empty = SetupParams::new(&ProtocolConfig::default(), Vec::new());
        assert!(empty.validate().is_err());
    }
}
