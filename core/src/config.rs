//! Configuration types for RVR

use crate::error::{RvrError, RvrResult};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::path::Path;
use std::time::Duration;

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Network configuration
    pub network: NetworkConfig,

    /// RPC server configuration
    pub rpc: RpcConfig,

    /// Protocol parameters used when this node drives a setup itself
    pub protocol: ProtocolConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "rvr-node".to_string(),
            network: NetworkConfig::default(),
            rpc: RpcConfig::default(),
            protocol: ProtocolConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load a configuration from a JSON file
    pub fn from_file(path: &Path) -> RvrResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RvrError::ConfigError(format!("{}: {}", path.display(), e)))?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        config.protocol.validate()?;
        Ok(config)
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address for the RPC server
    pub listen_addr: String,

    /// Address peers use to reach this node; defaults to the listen address
    pub advertise_addr: Option<String>,

    /// Maximum outbound sends in flight at once
    pub max_in_flight_sends: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9696".to_string(),
            advertise_addr: None,
            max_in_flight_sends: 256,
        }
    }
}

impl NetworkConfig {
    pub fn advertised(&self) -> &str {
        self.advertise_addr.as_deref().unwrap_or(&self.listen_addr)
    }
}

/// RPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { enable_cors: true }
    }
}

/// How many roster members a gossip holder forwards to per round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GossipFanout {
    /// `min(n, ceil(8(1+f) ln n / delta))` random members
    #[default]
    Bounded,
    /// Every roster member
    Full,
}

/// Which solution wins when several valid election solutions arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeaderTieBreak {
    /// The last valid solution in drain order overwrites earlier ones
    #[default]
    LastAccepted,
    /// The solution with the smallest proof-of-work digest wins
    LowestHash,
}

/// Protocol parameters
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Length of one round
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "round_duration_ms")]
    pub round_duration: Duration,

    /// Tolerated round skew between nodes
    pub offset: u64,

    /// Upper bound on the Byzantine fraction
    pub f: f64,

    /// Upper bound on the network-failure fraction
    pub g: f64,

    /// Retransmission rounds per phase
    pub l: u64,

    /// Acceptable protocol failure probability
    pub delta: f64,

    /// Puzzle hash attempts per node per round
    pub hashes_per_round: u64,

    pub gossip_fanout: GossipFanout,

    pub leader_tie_break: LeaderTieBreak,

    /// Local network monitor period, `None` disables it
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "monitor_interval_secs")]
    pub monitor_interval: Option<Duration>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_millis(100),
            offset: 2,
            f: 0.01,
            g: 0.01,
            l: 2,
            delta: 0.01,
            hashes_per_round: 1,
            gossip_fanout: GossipFanout::Bounded,
            leader_tie_break: LeaderTieBreak::LastAccepted,
            monitor_interval: Some(Duration::from_secs(10)),
        }
    }
}

impl ProtocolConfig {
    /// Reject parameter combinations the thresholds cannot work with
    pub fn validate(&self) -> RvrResult<()> {
        if self.round_duration.is_zero() {
            return Err(RvrError::ConfigError("round duration must be positive".into()));
        }
        if self.l == 0 {
            return Err(RvrError::ConfigError("l must be at least 1".into()));
        }
        if self.hashes_per_round == 0 {
            return Err(RvrError::ConfigError("hashes_per_round must be at least 1".into()));
        }
        if !(0.0..1.0 / 7.0).contains(&self.f) {
            return Err(RvrError::ConfigError(format!("f = {} out of [0, 1/7)", self.f)));
        }
        if !(0.0..0.04).contains(&self.g) {
            return Err(RvrError::ConfigError(format!("g = {} out of [0, 0.04)", self.g)));
        }
        if self.delta <= 0.0 || self.delta >= 1.0 {
            return Err(RvrError::ConfigError(format!("delta = {} out of (0, 1)", self.delta)));
        }
        Ok(())
    }

    /// Number of epochs one setup runs: `ceil(6 ln(2/delta)) + 1`
    pub fn repetitions(&self) -> u64 {
        (6.0 * (2.0 / self.delta).ln()).ceil() as u64 + 1
    }
}
