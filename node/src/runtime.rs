//! Node runtime: the RPC surface of one protocol participant

use rvr_consensus::{NodeSnapshot, PingValueReport, ProtocolState, SetupParams};
use rvr_core::{NodeConfig, NodeId, RvrResult};
use rvr_crypto::keys::{Identity, KeyPair};
use rvr_p2p::{Message, SharedTransport};
use std::sync::Arc;
use tracing::{debug, info};

/// Wraps the protocol state with the operations a controller drives
pub struct NodeRuntime {
    config: NodeConfig,
    state: Arc<ProtocolState>,
}

impl NodeRuntime {
    /// Create an idle node advertised at the configured address
    pub fn new(config: NodeConfig, keypair: KeyPair, transport: SharedTransport) -> Self {
        let state = Arc::new(ProtocolState::new(
            keypair,
            config.network.advertised(),
            transport,
            config.network.max_in_flight_sends,
        ));
        info!("Node {} ready", state.me());
        Self { config, state }
    }

    pub fn identity(&self) -> &Identity {
        self.state.me()
    }

    pub fn node_id(&self) -> NodeId {
        self.state.id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<ProtocolState> {
        &self.state
    }

    /// Install run parameters
    pub fn setup(&self, params: SetupParams) -> RvrResult<()> {
        self.state.setup(params)
    }

    /// Setup from this node's own protocol configuration
    pub fn setup_with_roster(&self, init_view: Vec<Identity>) -> RvrResult<()> {
        self.setup(SetupParams::new(&self.config.protocol, init_view))
    }

    pub fn start(&self) -> RvrResult<()> {
        self.state.start()
    }

    pub fn set_view(&self, view: Vec<u64>) {
        debug!("Setting view of {} to {} ids", self.identity(), view.len());
        self.state.set_view(view);
    }

    pub fn send_in_msg(&self, msg: Message) -> RvrResult<()> {
        self.state.send_in_msg(msg)
    }

    pub fn retrieve_state(&self) -> NodeSnapshot {
        self.state.snapshot()
    }

    pub fn exit(&self) {
        info!("Node {} exiting", self.identity());
        self.state.exit();
    }

    pub fn black_hole(&self, payload: &[u8]) {
        self.state.black_hole(payload);
    }

    pub async fn ping_report(&self, size: usize) -> PingValueReport {
        self.state.ping_report(size).await
    }
}
