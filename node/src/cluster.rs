//! In-process cluster over the memory transport
//!
//! Drives a whole roster the way a fleet controller would: set up every node, optionally
//! scramble their initial views, start them together and collect their states.

use crate::runtime::NodeRuntime;
use rand::Rng;
use rvr_consensus::NodeSnapshot;
use rvr_core::{NodeConfig, ProtocolConfig, RvrResult};
use rvr_crypto::keys::{Identity, KeyPair};
use rvr_p2p::MemoryTransport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Whether every snapshot holds the same view
pub fn check_consensus(snapshots: &[NodeSnapshot]) -> bool {
    let Some(first) = snapshots.first() else {
        return true;
    };
    let reference: BTreeSet<u64> = first.view.iter().copied().collect();
    snapshots
        .iter()
        .all(|s| s.view.iter().copied().collect::<BTreeSet<u64>>() == reference)
}

/// Whether every snapshot reports a finished run
pub fn check_finished(snapshots: &[NodeSnapshot]) -> bool {
    snapshots.iter().all(|s| s.finished)
}

/// Summary of a cluster run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterReport {
    pub nodes: usize,
    pub finished: bool,
    pub consensus: bool,
    pub malicious: usize,
    pub max_round: u64,
    pub view_size: usize,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub largest_message: u64,
}

impl ClusterReport {
    pub fn from_snapshots(snapshots: &[NodeSnapshot]) -> Self {
        Self {
            nodes: snapshots.len(),
            finished: check_finished(snapshots),
            consensus: check_consensus(snapshots),
            malicious: snapshots.iter().filter(|s| s.malicious).count(),
            max_round: snapshots.iter().map(|s| s.round).max().unwrap_or(0),
            view_size: snapshots.first().map(|s| s.view.len()).unwrap_or(0),
            total_messages: snapshots.iter().map(|s| s.counters.msg_count).sum(),
            total_bytes: snapshots.iter().map(|s| s.counters.byte_count).sum(),
            largest_message: snapshots
                .iter()
                .map(|s| s.counters.largest_msg_size)
                .max()
                .unwrap_or(0),
        }
    }
}

/// A roster of nodes sharing one memory transport
pub struct LocalCluster {
    transport: Arc<MemoryTransport>,
    nodes: Vec<Arc<NodeRuntime>>,
}

impl LocalCluster {
    /// Spawn `size` idle nodes addressed `mem://node-<i>`
    pub fn new(size: usize, base: &NodeConfig) -> Self {
        let transport = Arc::new(MemoryTransport::new());
        let nodes = (0..size)
            .map(|i| {
                let mut config = base.clone();
                config.name = format!("node-{}", i);
                config.network.listen_addr = format!("mem://node-{}", i);
                config.network.advertise_addr = None;
                let runtime = Arc::new(NodeRuntime::new(
                    config,
                    KeyPair::generate(),
                    transport.clone(),
                ));
                transport.register(runtime.identity().address.clone(), runtime.state());
                runtime
            })
            .collect();
        Self { transport, nodes }
    }

    pub fn transport(&self) -> &Arc<MemoryTransport> {
        &self.transport
    }

    pub fn nodes(&self) -> &[Arc<NodeRuntime>] {
        &self.nodes
    }

    pub fn roster(&self) -> Vec<Identity> {
        self.nodes.iter().map(|n| n.identity().clone()).collect()
    }

    /// Set up every node with the full roster
    pub fn setup(&self, protocol: &ProtocolConfig) -> RvrResult<()> {
        let params = rvr_consensus::SetupParams::new(protocol, self.roster());
        for node in &self.nodes {
            node.setup(params.clone())?;
        }
        info!("Cluster of {} set up, x = {}", self.nodes.len(), params.x);
        Ok(())
    }

    /// Give every node a random initial view keeping each member with probability `keep`
    pub fn randomize_views(&self, keep: f64) {
        let ids: Vec<u64> = self.nodes.iter().map(|n| n.node_id().as_u64()).collect();
        let mut rng = rand::thread_rng();
        for node in &self.nodes {
            let view = ids.iter().copied().filter(|_| rng.gen_bool(keep)).collect();
            node.set_view(view);
        }
    }

    pub fn start(&self) -> RvrResult<()> {
        for node in &self.nodes {
            node.start()?;
        }
        Ok(())
    }

    pub fn snapshots(&self) -> Vec<NodeSnapshot> {
        self.nodes.iter().map(|n| n.retrieve_state()).collect()
    }

    pub fn check_consensus(&self) -> bool {
        check_consensus(&self.snapshots())
    }

    pub fn check_finished(&self) -> bool {
        check_finished(&self.snapshots())
    }

    /// Poll every `interval` until all nodes are finished or have exited
    pub async fn wait_finished(&self, interval: Duration) {
        loop {
            let done = self
                .snapshots()
                .iter()
                .all(|s| s.finished || s.exited);
            if done {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub fn report(&self) -> ClusterReport {
        ClusterReport::from_snapshots(&self.snapshots())
    }

    pub fn exit_all(&self) {
        for node in &self.nodes {
            node.exit();
        }
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        self.exit_all();
    }
}
