//! Whole-cluster runs over the memory transport, in virtual time

use rvr_core::{NodeConfig, RvrError};
use rvr_crypto::keys::KeyPair;
use rvr_node::LocalCluster;
use rvr_p2p::{Message, MessageKind};
use std::time::Duration;

fn cluster_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.protocol.f = 0.01;
    config.protocol.g = 0.005;
    config.protocol.l = 2;
    config.protocol.offset = 2;
    config.protocol.delta = 0.01;
    config.protocol.monitor_interval = None;
    config
}

#[tokio::test(start_paused = true)]
async fn test_ten_nodes_reach_consensus() {
    let config = cluster_config();
    let cluster = LocalCluster::new(10, &config);
    cluster.setup(&config.protocol).unwrap();
    cluster.start().unwrap();

    cluster.wait_finished(Duration::from_secs(1)).await;

    let snapshots = cluster.snapshots();
    assert!(cluster.check_finished());
    assert!(cluster.check_consensus());
    assert!(snapshots.iter().all(|s| !s.exited));
    assert!(snapshots.iter().all(|s| s.view.len() == 10));

    let params = rvr_consensus::SetupParams::new(&config.protocol, cluster.roster());
    let expected_rounds = params.sketch().total_rounds;
    for snapshot in &snapshots {
        assert_eq!(snapshot.round, expected_rounds);
        assert_eq!(snapshot.epoch, params.repetitions() - 1);
        assert!(snapshot.counters.msg_count > 0);
        assert_eq!(snapshot.counters.bad_signature, 0);
        assert_eq!(snapshot.counters.not_in_view, 0);
    }

    let report = cluster.report();
    assert!(report.finished && report.consensus);
    assert_eq!(report.nodes, 10);
}

#[tokio::test(start_paused = true)]
async fn test_scrambled_views_converge() {
    let config = cluster_config();
    let cluster = LocalCluster::new(10, &config);
    cluster.setup(&config.protocol).unwrap();
    cluster.randomize_views(0.5);
    assert!(!cluster.check_consensus());

    cluster.start().unwrap();
    cluster.wait_finished(Duration::from_secs(1)).await;

    assert!(cluster.check_finished());
    assert!(cluster.check_consensus());
    let snapshots = cluster.snapshots();
    assert!(snapshots.iter().all(|s| !s.exited));
    assert!(snapshots.iter().all(|s| s.view.len() <= 10));
}

#[tokio::test(start_paused = true)]
async fn test_exit_stops_running_nodes() {
    let config = cluster_config();
    let cluster = LocalCluster::new(4, &config);
    cluster.setup(&config.protocol).unwrap();
    cluster.start().unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    cluster.exit_all();
    cluster.wait_finished(Duration::from_millis(100)).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    for snapshot in cluster.snapshots() {
        assert!(snapshot.exited);
        assert!(snapshot.finished);
        assert!(snapshot.round > 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_outsider_cannot_inject_messages() {
    let config = cluster_config();
    let cluster = LocalCluster::new(3, &config);
    cluster.setup(&config.protocol).unwrap();

    let outsider = KeyPair::generate();
    let msg = Message::new(MessageKind::GossipMessage, 0, outsider.identity("mem://outsider"))
        .with_view(vec![outsider.node_id().as_u64()])
        .signed(&outsider);

    for node in cluster.nodes() {
        let result = node.send_in_msg(msg.clone());
        assert!(matches!(result, Err(RvrError::NotInView(id)) if id == outsider.node_id()));
        assert_eq!(node.retrieve_state().counters.msg_received, 0);
    }
}
