//! Recovery when a lock is lost in flight.
//!
//! Same eight-node chain as the happy path, but a drop rule swallows
//! one lock packet. The commit deadline then fires on whichever nodes
//! got their hop locked, each rolls its own hop back and pushes a
//! rollback downstream, and the payer gives the payment up. The chain
//! must end exactly where it started: no shifted balances, no stuck
//! reservations, no orphaned meeting point legs.

use hopnet_core::{ApiRequest, NodeEvent, PayFinalState};
use hopnet_node::PayRole;

use hopnet_integration_tests::{assert_hop_mirrors, chain_network, DropRule, Network};

/// Runs a payment up to the caller's confirmation with `rule` armed,
/// so the lock cascade stalls mid-chain.
fn run_interrupted_payment(rule: DropRule) -> Network {
    let mut net = chain_network(8);
    let url = net.request_url(7, 123, "left at the gate");
    net.api(0, ApiRequest::Pay { url, link: None });
    net.drop_rules.push(rule);
    net.api(0, ApiRequest::ConfirmPayment { agreement: true });
    net
}

/// Lets the commit grace pass, then checks the chain unwound fully.
fn assert_recovered(mut net: Network) {
    net.advance(6_000);

    assert_eq!(net.balances(), [1000, 1000, 1000, 1000, 1000, 1000, 1000, 0]);
    assert_hop_mirrors(&net, 8);
    assert!(net.nodes.iter().all(|n| n.in_flight_empty()));
    assert_eq!(
        net.events[0].last(),
        Some(&NodeEvent::PaymentFinished { state: PayFinalState::Cancelled })
    );
    assert_eq!(net.completed[0][0].role, PayRole::Payer);
    assert_eq!(net.completed[0][0].state, PayFinalState::Cancelled);
    assert_eq!(net.completed[7][0].role, PayRole::Payee);
    assert_eq!(net.completed[7][0].state, PayFinalState::Cancelled);

    net.advance(60_000);
    net.assert_drained();
}

#[test]
fn test_lock_lost_before_payee_rolls_back_whole_chain() {
    // Every relay locked its hop; only the payee never saw the lock.
    let net = run_interrupted_payment(DropRule::InboundLock { node: 7 });

    assert!(!net.nodes[0].in_flight_empty(), "payer hop should be locked");
    assert!(!net.nodes[7].in_flight_empty(), "payee hop should still be reserved");
    assert_eq!(net.events[0].len(), 1, "payment should not have finished yet");

    assert_recovered(net);
}

#[test]
fn test_lock_lost_at_first_hop_rolls_back_reservations() {
    // Only the payer's own hop got locked; the rest of the chain holds
    // bare reservations, and the rollback must release those too.
    let net = run_interrupted_payment(DropRule::OutboundLock { node: 0 });

    assert!(!net.nodes[0].in_flight_empty(), "payer hop should be locked");
    assert!(!net.nodes[3].in_flight_empty(), "mid-chain hop should still be reserved");

    assert_recovered(net);
}

#[test]
fn test_network_usable_after_failed_payment() {
    let mut net = run_interrupted_payment(DropRule::InboundLock { node: 7 });
    net.advance(6_000);
    net.drop_rules.clear();

    // A fresh payment over the same links must go through untouched by
    // the wreck before it.
    let url = net.request_url(7, 200, "second try");
    net.api(0, ApiRequest::Pay { url, link: None });
    net.api(0, ApiRequest::ConfirmPayment { agreement: true });

    assert_eq!(net.balances(), [800, 1000, 1000, 1000, 1000, 1000, 1000, 200]);
    assert_eq!(
        net.events[0].last(),
        Some(&NodeEvent::PaymentFinished { state: PayFinalState::Committed })
    );

    net.advance(61_000);
    net.assert_drained();
}
