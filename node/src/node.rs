//! Full node: runtime plus RPC server

use crate::api::start_api_server;
use crate::runtime::NodeRuntime;
use rvr_core::NodeConfig;
use rvr_crypto::keys::KeyPair;
use rvr_p2p::{HttpTransport, SharedTransport};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// A networked RVR node
pub struct RvrNode {
    runtime: Arc<NodeRuntime>,
}

impl RvrNode {
    pub fn new(config: NodeConfig, keypair: KeyPair, transport: SharedTransport) -> Self {
        let runtime = Arc::new(NodeRuntime::new(config, keypair, transport));
        Self { runtime }
    }

    /// Serve RPC until the node is told to exit or ctrl-c arrives
    pub async fn run(&self) -> anyhow::Result<()> {
        let listen_addr = self.runtime.config().network.listen_addr.clone();
        info!("Starting node {}", self.runtime.identity());

        let api_runtime = Arc::clone(&self.runtime);
        let mut api_handle =
            tokio::spawn(async move { start_api_server(api_runtime, &listen_addr).await });

        let finished = tokio::select! {
            served = &mut api_handle => Some(served),
            signalled = signal::ctrl_c() => {
                if let Err(e) = signalled {
                    error!("Error waiting for shutdown signal: {}", e);
                }
                info!("Shutdown signal received, stopping node...");
                None
            }
        };
        let served = match finished {
            Some(served) => served,
            None => {
                // graceful shutdown follows the exit signal
                self.runtime.exit();
                api_handle.await
            }
        };
        match served {
            Ok(Ok(())) => info!("RPC server stopped"),
            Ok(Err(e)) => {
                error!("RPC server error: {}", e);
                return Err(e);
            }
            Err(e) => {
                error!("RPC server task failed: {}", e);
                return Err(e.into());
            }
        }

        let snapshot = self.runtime.retrieve_state();
        info!(
            "Node stopped at round {} with {} members in view",
            snapshot.round,
            snapshot.view.len()
        );
        Ok(())
    }

    pub fn runtime(&self) -> &Arc<NodeRuntime> {
        &self.runtime
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
    keypair: Option<KeyPair>,
    transport: Option<SharedTransport>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            keypair: None,
            transport: None,
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn keypair(mut self, keypair: KeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.config.network.listen_addr = addr.to_string();
        self
    }

    pub fn advertise_addr(mut self, addr: &str) -> Self {
        self.config.network.advertise_addr = Some(addr.to_string());
        self
    }

    /// Replace the default HTTP transport
    pub fn transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> RvrNode {
        let keypair = self.keypair.unwrap_or_else(KeyPair::generate);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new()) as SharedTransport);
        RvrNode::new(self.config, keypair, transport)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_applies_addresses() {
        let keypair = KeyPair::generate();
        let node = NodeBuilder::new()
            .keypair(keypair.clone())
            .listen_addr("0.0.0.0:9700")
            .advertise_addr("10.0.0.7:9700")
            .build();
        assert_eq!(node.runtime().node_id(), keypair.node_id());
        assert_eq!(node.runtime().identity().address, "10.0.0.7:9700");
        assert_eq!(node.runtime().config().network.listen_addr, "0.0.0.0:9700");
    }

    #[tokio::test]
    async fn test_run_stops_on_exit() {
        let node = NodeBuilder::new().listen_addr("127.0.0.1:0").build();
        let runtime = Arc::clone(node.runtime());
        let handle = tokio::spawn(async move { node.run().await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        runtime.exit();
        handle.await.unwrap().unwrap();
    }
}
