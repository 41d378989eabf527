//! Smoke test of the async node shell over the in-memory transport.
//!
//! Three real nodes run their event loops while handles drive a
//! payment from alice through bob to carol, with bob hosting the
//! meeting point. This exercises the layer the sync harness skips:
//! command round trips, the receipt rendezvous, snapshot persistence
//! after every batch and transport-level conversations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use hopnet_channel::ChannelState;
use hopnet_core::{
    ChannelKind, EndpointId, LinkId, MeetingPointId, NetAddress, NodeConfig, PayFinalState,
};
use hopnet_node::{ChainInterface, DummyChain, Node, NodeHandle, NodeStore, PayRole};
use hopnet_transport::MemoryHub;

/// Honor RUST_LOG when the shell misbehaves; quiet otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("hopnet-shell-{name}-{}", rand::random::<u64>()))
}

fn link_id(name: &str) -> LinkId {
    LinkId::new(name).expect("valid link name")
}

fn link_ep(name: &str) -> EndpointId {
    EndpointId::Link(link_id(name))
}

fn spawn_node(
    hub: &MemoryHub,
    name: &str,
    cfg: NodeConfig,
    dir: &Path,
) -> (NodeHandle, JoinHandle<anyhow::Result<()>>) {
    let transport = hub.attach(NetAddress::new(name));
    let store = NodeStore::open(dir).expect("node store should open");
    let chain: Arc<dyn ChainInterface> = Arc::new(DummyChain::new());
    let node = Node::new(name, cfg, store, transport, chain).expect("node should open");
    let handle = node.handle();
    (handle, tokio::spawn(node.run()))
}

/// The deposit handshake crosses the wire; wait for this side's
/// channel to come up.
async fn wait_ready(handle: &NodeHandle, link: &str) {
    for _ in 0..200 {
        let summary = handle.summary().await.expect("summary should answer");
        let ready = summary.links.iter().any(|l| {
            l.link.as_str() == link
                && l.channels.first().is_some_and(|c| c.state == ChannelState::Ready)
        });
        if ready {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("channel on {link} never became ready");
}

#[tokio::test]
async fn test_payment_over_running_nodes() {
    init_tracing();
    let hub = MemoryHub::new();
    let dirs = [temp_dir("alice"), temp_dir("bob"), temp_dir("carol")];

    let mp = MeetingPointId::new("mp_bob").expect("valid meeting point name");
    let mut carol_cfg = NodeConfig::named("carol");
    carol_cfg.external_meeting_points = vec![mp.clone()];

    let (alice, alice_task) = spawn_node(&hub, "alice", NodeConfig::named("alice"), &dirs[0]);
    let (bob, bob_task) = spawn_node(&hub, "bob", NodeConfig::named("bob"), &dirs[1]);
    let (carol, carol_task) = spawn_node(&hub, "carol", carol_cfg, &dirs[2]);

    // ===== wire the links and fund the forward channels =====
    hub.wire(NetAddress::new("alice"), link_ep("to_bob"), NetAddress::new("bob"), link_ep("to_alice"));
    hub.wire(NetAddress::new("bob"), link_ep("to_carol"), NetAddress::new("carol"), link_ep("to_bob"));

    alice.make_link(link_id("to_bob"), link_id("to_alice")).await.expect("make_link");
    bob.make_link(link_id("to_alice"), link_id("to_bob")).await.expect("make_link");
    bob.make_link(link_id("to_carol"), link_id("to_bob")).await.expect("make_link");
    carol.make_link(link_id("to_bob"), link_id("to_carol")).await.expect("make_link");
    bob.make_meeting_point(mp).await.expect("make_meeting_point");

    alice.deposit(link_id("to_bob"), ChannelKind::Plain, 500).await.expect("deposit");
    bob.deposit(link_id("to_carol"), ChannelKind::Plain, 500).await.expect("deposit");
    wait_ready(&alice, "to_bob").await;
    wait_ready(&bob, "to_carol").await;

    // ===== request, pay, confirm =====
    let url = carol.request(75, "smoke signal").await.expect("request should produce a url");
    let (amount, receipt) = alice.pay(&url, None).await.expect("pay should surface the receipt");
    assert_eq!(amount, 75);
    assert_eq!(receipt, "smoke signal");

    let state = alice.confirm(true).await.expect("confirm should finish the payment");
    assert_eq!(state, PayFinalState::Committed);

    // A summary round trip fences each node's current batch, so the
    // balances and pay logs below are fully written.
    assert_eq!(alice.summary().await.expect("summary").balance, 425);
    assert_eq!(bob.summary().await.expect("summary").balance, 500);
    let carol_summary = carol.summary().await.expect("summary");
    assert_eq!(carol_summary.balance, 75);
    assert!(carol_summary.payees.is_empty(), "payee entity should be swept");

    // ===== outcomes survive on disk =====
    let paid = NodeStore::open(&dirs[0])
        .expect("reopen store")
        .pay_log()
        .read_all()
        .expect("read pay log");
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].role, PayRole::Payer);
    assert_eq!(paid[0].state, PayFinalState::Committed);
    assert_eq!(paid[0].amount, 75);

    let earned = NodeStore::open(&dirs[2])
        .expect("reopen store")
        .pay_log()
        .read_all()
        .expect("read pay log");
    assert_eq!(earned.len(), 1);
    assert_eq!(earned[0].role, PayRole::Payee);
    assert_eq!(earned[0].state, PayFinalState::Committed);

    // ===== orderly shutdown =====
    alice.stop().await.expect("stop");
    bob.stop().await.expect("stop");
    carol.stop().await.expect("stop");
    alice_task.await.expect("join").expect("clean exit");
    bob_task.await.expect("join").expect("clean exit");
    carol_task.await.expect("join").expect("clean exit");

    for dir in &dirs {
        std::fs::remove_dir_all(dir).ok();
    }
}
