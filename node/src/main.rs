//! RVR Node Binary

use clap::{Parser, Subcommand};
use rvr_core::{NodeConfig, ProtocolConfig};
use rvr_crypto::keys::KeyPair;
use rvr_node::{LocalCluster, NodeBuilder};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "rvr-node")]
#[command(about = "RVR Node - Randomized view reconciliation")]
#[command(version)]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the node RPC until exit
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Key file written by `keygen`
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// RPC listen address
        #[arg(long)]
        listen_addr: Option<String>,

        /// Address advertised to peers
        #[arg(long)]
        advertise_addr: Option<String>,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a whole cluster in this process
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value = "10")]
        nodes: usize,

        /// Configuration file for protocol parameters
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Probability that a node starts with a given member in its view
        #[arg(long, default_value = "1.0")]
        view_probability: f64,

        /// Probability that a single delivery is dropped
        #[arg(long, default_value = "0.0")]
        loss_rate: f64,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => Ok(NodeConfig::from_file(path)?),
        None => Ok(NodeConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            key,
            listen_addr,
            advertise_addr,
        } => {
            let mut config = load_config(config.as_deref())?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));

            if let Some(addr) = listen_addr {
                config.network.listen_addr = addr;
            }
            if let Some(addr) = advertise_addr {
                config.network.advertise_addr = Some(addr);
            }
            config.protocol.validate()?;

            let keypair = match key {
                Some(path) => load_keypair(&path)?,
                None => KeyPair::generate(),
            };

            let node = NodeBuilder::new().config(config).keypair(keypair).build();
            node.run().await?;
        }

        Commands::Keygen { output } => {
            let keypair = KeyPair::generate();

            let info = serde_json::json!({
                "public_key": keypair.public_key().to_hex(),
                "node_id": keypair.node_id().as_u64(),
                "secret_key": hex::encode(keypair.secret_bytes()),
            });

            let json = serde_json::to_string_pretty(&info)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("Keypair saved to: {}", path.display());
                }
                None => {
                    println!("{}", json);
                }
            }
        }

        Commands::Simulate {
            nodes,
            config,
            view_probability,
            loss_rate,
        } => {
            let mut config = load_config(config.as_deref())?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
            // every node would probe every other one; pointless in one process
            config.protocol.monitor_interval = None;
            run_simulation(nodes, &config, view_probability, loss_rate).await?;
        }
    }

    Ok(())
}

async fn run_simulation(
    nodes: usize,
    config: &NodeConfig,
    view_probability: f64,
    loss_rate: f64,
) -> anyhow::Result<()> {
    let protocol: &ProtocolConfig = &config.protocol;
    protocol.validate()?;
    if !(0.0..=1.0).contains(&view_probability) || !(0.0..=1.0).contains(&loss_rate) {
        anyhow::bail!("probabilities must lie in [0, 1]");
    }

    let cluster = LocalCluster::new(nodes, config);
    cluster.transport().set_loss_rate(loss_rate);
    cluster.setup(protocol)?;
    if view_probability < 1.0 {
        cluster.randomize_views(view_probability);
    }

    info!(
        "Simulating {} nodes for {} epochs",
        nodes,
        protocol.repetitions()
    );
    cluster.start()?;
    cluster.wait_finished(protocol.round_duration.max(Duration::from_millis(10)) * 10).await;

    let report = cluster.report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    cluster.exit_all();
    Ok(())
}

fn load_keypair(path: &Path) -> anyhow::Result<KeyPair> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let secret_hex = value
        .get("secret_key")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("{} has no secret_key", path.display()))?;
    let keypair = KeyPair::from_secret_bytes(&hex::decode(secret_hex)?)?;
    info!("Loaded keypair {} from {}", keypair.node_id(), path.display());
    Ok(keypair)
}
