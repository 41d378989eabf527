//! End-to-end payment over a chain of eight nodes.
//!
//! n0 pays n7 across seven plain channels. The meeting point lives on
//! n4, so the payer's half of the route and the payee's half are built
//! from opposite ends and joined in the middle. Covers the full life
//! of a payment: request, receipt, confirmation, route building,
//! locking, commit and settlement, plus the snapshot and replay edges
//! around it.

use hopnet_channel::ChannelState;
use hopnet_core::{
    ApiRequest, EndpointId, NodeEvent, Packet, PayFinalState, PayeeState, PayerState, ReturnValue,
    SettleCommit, Token,
};
use hopnet_node::PayRole;

use hopnet_integration_tests::{assert_hop_mirrors, chain_network, link_id, Network, DEPOSIT};

/// Commit token of the single payee registered on `node`.
fn token_of(net: &Network, node: usize) -> Token {
    let payee = net.nodes[node].payees.values().next().expect("payee should be registered");
    payee.token.clone()
}

#[test]
fn test_chain_setup_funds_forward_channels() {
    let net = chain_network(8);

    assert_eq!(net.balances(), [1000, 1000, 1000, 1000, 1000, 1000, 1000, 0]);
    for i in 0..7 {
        let out = net.link(i, &format!("to_n{}", i + 1)).channels();
        let inc = net.link(i + 1, &format!("to_n{i}")).channels();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].engine().state(), ChannelState::Ready);
        assert_eq!(inc[0].engine().state(), ChannelState::Ready);
        assert_eq!(out[0].engine().amount_local(), DEPOSIT);
        assert_eq!(inc[0].engine().amount_remote(), DEPOSIT);
    }
    net.assert_drained();
}

#[test]
fn test_payment_across_chain() {
    let mut net = chain_network(8);

    // ===== request and pay =====
    let url = net.request_url(7, 123, "one espresso");
    assert!(url.contains("n7"), "payment url should name the payee node: {url}");

    let ret = net.api(0, ApiRequest::Pay { url, link: None });
    assert!(matches!(ret, Some(ReturnValue::Ack)));
    assert_eq!(
        net.events[0],
        vec![NodeEvent::ReceiptReceived { amount: 123, receipt: "one espresso".into() }]
    );

    // Both entities wait for the caller's verdict; nothing is reserved
    // in the fabric yet.
    let payer = net.nodes[0].payer.as_ref().expect("payer entity should exist");
    assert_eq!(payer.state, PayerState::HasReceipt);
    let payee = net.nodes[7].payees.values().next().expect("payee should be registered");
    assert_eq!(payee.state, PayeeState::SentReceipt);
    assert!(net.nodes.iter().all(|n| n.in_flight_empty()));
    let token = token_of(&net, 7);

    // ===== confirm: route building, lock and settle run through =====
    net.api(0, ApiRequest::ConfirmPayment { agreement: true });

    assert_eq!(net.balances(), [877, 1000, 1000, 1000, 1000, 1000, 1000, 123]);
    assert_hop_mirrors(&net, 8);
    assert_eq!(
        net.events[0].last(),
        Some(&NodeEvent::PaymentFinished { state: PayFinalState::Committed })
    );

    let paid = &net.completed[0][0];
    assert_eq!(paid.role, PayRole::Payer);
    assert_eq!(paid.state, PayFinalState::Committed);
    assert_eq!(paid.amount, 123);
    assert!(paid.transaction.is_some());
    let earned = &net.completed[7][0];
    assert_eq!(earned.role, PayRole::Payee);
    assert_eq!(earned.state, PayFinalState::Committed);

    // ===== a replayed settle is recognised and changes nothing =====
    net.inject(
        3,
        EndpointId::Link(link_id("to_n2")),
        Packet::SettleCommit(SettleCommit { token, payer_side: true }),
    );
    assert_eq!(net.balances(), [877, 1000, 1000, 1000, 1000, 1000, 1000, 123]);

    // ===== leftover route deadlines fire as no-ops =====
    net.advance(61_000);
    net.assert_drained();
}

#[test]
fn test_snapshot_mid_flight_resumes() {
    let mut net = chain_network(8);
    let url = net.request_url(7, 250, "window seat");
    net.api(0, ApiRequest::Pay { url, link: None });

    // Both ends sit waiting on the caller; run each through a snapshot
    // round trip as a restart would, then let the payment finish.
    for node in [0, 7] {
        let snapshot = serde_json::to_string(&net.nodes[node]).expect("state should serialize");
        net.nodes[node] = serde_json::from_str(&snapshot).expect("state should deserialize");
    }

    net.api(0, ApiRequest::ConfirmPayment { agreement: true });

    assert_eq!(net.balances(), [750, 1000, 1000, 1000, 1000, 1000, 1000, 250]);
    net.advance(61_000);
    net.assert_drained();
}

#[test]
fn test_refused_payment_cancels_cleanly() {
    let mut net = chain_network(8);
    let url = net.request_url(7, 999, "sight unseen");
    net.api(0, ApiRequest::Pay { url, link: None });

    net.api(0, ApiRequest::ConfirmPayment { agreement: false });

    assert_eq!(net.balances(), [1000, 1000, 1000, 1000, 1000, 1000, 1000, 0]);
    assert_eq!(
        net.events[0].last(),
        Some(&NodeEvent::PaymentFinished { state: PayFinalState::Cancelled })
    );
    assert_eq!(net.completed[0][0].state, PayFinalState::Cancelled);
    assert_eq!(net.completed[7][0].state, PayFinalState::Cancelled);
    net.assert_drained();
}
