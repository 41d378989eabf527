//! Runs one message and everything it causes locally as a single unit
//! of work.
//!
//! `Effect::Process` feeds follow-up messages back into the same
//! batch; schedule and filter effects act on the timeout queue right
//! away. Everything else crosses the node boundary and is collected
//! into a [`BatchOutcome`] for the shell to perform after the batch
//! committed. A failing batch leaves the state exactly as it was.

use std::collections::VecDeque;

use hopnet_core::{
    ChainCommand, Effect, EndpointId, Message, NetAddress, NodeConfig, NodeEvent, Packet,
    ReturnValue,
};
use tracing::debug;

use crate::error::Result;
use crate::paylog::CompletedPayment;
use crate::state::NodeState;

/// A conversation the shell should dial out.
#[derive(Clone, Debug)]
pub struct ConnOpen {
    pub local: EndpointId,
    pub remote: EndpointId,
    pub address: NetAddress,
    pub hello: Packet,
}

/// The outward half of a batch. The local half has already been
/// applied to the state when this is handed to the shell.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub return_value: Option<ReturnValue>,
    pub events: Vec<NodeEvent>,
    pub sends: Vec<(EndpointId, Packet)>,
    pub opens: Vec<ConnOpen>,
    /// Conversations of payments that finished in this batch.
    pub releases: Vec<EndpointId>,
    pub chain: Vec<ChainCommand>,
    /// Pay log entries for payments that finished in this batch.
    pub completed: Vec<CompletedPayment>,
}

/// Applies `msg` and chases its local consequences to a fixpoint.
/// On an error the state is rolled back to the pre-batch snapshot, so
/// a misbehaving peer cannot leave the state half-updated.
pub fn run_batch(
    state: &mut NodeState,
    msg: Message,
    now_ms: u64,
    cfg: &NodeConfig,
) -> Result<BatchOutcome> {
    let snapshot = state.clone();
    match run_to_fixpoint(state, msg, now_ms, cfg) {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            *state = snapshot;
            Err(e)
        }
    }
}

fn run_to_fixpoint(
    state: &mut NodeState,
    msg: Message,
    now_ms: u64,
    cfg: &NodeConfig,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    let mut queue = VecDeque::new();
    queue.push_back(msg);
    let mut steps = 0usize;
    while let Some(msg) = queue.pop_front() {
        steps += 1;
        for effect in state.handle(msg, now_ms, cfg)? {
            match effect {
                Effect::Process(next) => queue.push_back(next),
                Effect::Schedule(entry) => state.insert_timeout(entry),
                Effect::Filter(filter) => state.apply_filter(&filter),
                Effect::Send { to, packet } => outcome.sends.push((to, packet)),
                Effect::Open { local, remote, address, hello } => {
                    outcome.opens.push(ConnOpen { local, remote, address, hello })
                }
                Effect::Chain(cmd) => outcome.chain.push(cmd),
                Effect::Return(value) => outcome.return_value = Some(value),
                Effect::Notify(event) => outcome.events.push(event),
            }
        }
    }
    debug!(node = %state.name, steps, sends = outcome.sends.len(), "batch done");

    // Terminal payment entities leave the state here; their
    // conversations close and their outcome goes to the pay log.
    let (payer, payees) = state.sweep_finished();
    if let Some(p) = payer {
        outcome.releases.push(EndpointId::Payer);
        outcome.completed.push(CompletedPayment::from_payer(&p, now_ms));
    }
    for p in payees {
        outcome.releases.push(EndpointId::Payee(p.id.clone()));
        outcome.completed.push(CompletedPayment::from_payee(&p, now_ms));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use hopnet_core::{
        ApiRequest, ChannelConvMsg, ChannelKind, LinkId, Lock, MakeRoute, MeetingPointId,
        PayFinalState, TimeoutEvent, Token,
    };
    use hopnet_routing::Link;

    fn cfg() -> NodeConfig {
        NodeConfig::default()
    }

    fn link_id(name: &str) -> LinkId {
        LinkId::new(name).unwrap()
    }

    fn funded_link(name: &str, local: u64, remote: u64) -> Link {
        let mut link = Link::new(link_id(name), link_id("peer"));
        if local > 0 {
            link.deposit_local(ChannelKind::Plain, local);
            link.on_channel_msg(0, &ChannelConvMsg::DepositAck).unwrap();
        } else {
            link.on_peer_deposit(0, ChannelKind::Plain).unwrap();
            link.on_channel_msg(0, &ChannelConvMsg::DepositAmount { amount: remote })
                .unwrap();
        }
        link
    }

    fn make_route(seed: u8, payer_side: bool, amount: u64) -> MakeRoute {
        MakeRoute {
            transaction: Token::from_bytes([seed; 32]).transaction_id(),
            payer_side,
            amount,
            start_ms: 0,
            end_ms: 60_000,
            meeting_point: MeetingPointId::new("mp_far").unwrap(),
            channel_index: None,
        }
    }

    #[test]
    fn test_api_batch_returns_value_and_schedules() {
        let mut state = NodeState::new("alpha");
        state
            .meeting_points
            .insert(MeetingPointId::new("mp").unwrap(), hopnet_routing::MeetingPoint::new(MeetingPointId::new("mp").unwrap()));
        let outcome = run_batch(
            &mut state,
            Message::Api(ApiRequest::Request { amount: 10, receipt: "r".into() }),
            0,
            &cfg(),
        )
        .unwrap();
        assert!(matches!(outcome.return_value, Some(ReturnValue::Url(_))));
        // The payee timeout landed in the queue instead of the outcome.
        assert_eq!(state.timeouts.len(), 1);
        assert!(outcome.sends.is_empty());
    }

    #[test]
    fn test_commit_timeout_batch_runs_to_fixpoint() {
        let mut state = NodeState::new("relay");
        state.links.insert(link_id("out"), funded_link("out", 1000, 0));
        let m = make_route(1, true, 100);
        let link = state.links.get_mut(&link_id("out")).unwrap();
        link.make_route_outgoing(&m).unwrap().unwrap();
        let lock = Lock { transaction: m.transaction, payer_side: true, amount: 100 };
        link.lock_outgoing(&lock, 0, &cfg()).unwrap();

        // The deadline batch includes the follow-up route-failed
        // message; with no other holders it just converges.
        let outcome = run_batch(
            &mut state,
            Message::Timeout(TimeoutEvent::LinkCommit {
                link: link_id("out"),
                transaction: m.transaction,
                payer_side: true,
            }),
            6_000,
            &cfg(),
        )
        .unwrap();
        assert_eq!(outcome.sends.len(), 1);
        assert!(matches!(outcome.sends[0].1, Packet::SettleRollback(_)));
        assert_eq!(state.balance(), 1000);
        assert!(state.in_flight_empty());
    }

    #[test]
    fn test_failed_batch_rolls_the_state_back() {
        let mut state = NodeState::new("relay");
        state.links.insert(link_id("in"), funded_link("in", 0, 1000));
        let mut m = make_route(2, true, 100);
        m.channel_index = Some(0);
        state
            .links
            .get_mut(&link_id("in"))
            .unwrap()
            .make_route_incoming(&m)
            .unwrap();

        // The lock lands on the arrival link, but there is no next
        // holder to pass it to; the whole batch must unwind, leaving
        // the hop reserved rather than locked.
        let err = run_batch(
            &mut state,
            Message::Inbound {
                from: EndpointId::Link(link_id("in")),
                packet: Packet::Lock(Lock { transaction: m.transaction, payer_side: true, amount: 100 }),
            },
            0,
            &cfg(),
        )
        .unwrap_err();
        assert!(matches!(err, NodeError::NoRouteHolder { .. }));
        let engine = state.links[&link_id("in")].channels()[0].engine();
        assert_eq!(engine.in_reserved().len(), 1);
        assert!(engine.in_locked().is_empty());
    }

    #[test]
    fn test_finished_payment_is_swept_into_outcome() {
        let mut state = NodeState::new("alpha");
        let url = format!("hopnet://beta/{}", hopnet_core::PayeeId::generate());
        run_batch(&mut state, Message::Api(ApiRequest::Pay { url, link: None }), 0, &cfg()).unwrap();

        let outcome = run_batch(&mut state, Message::ConnClosed(EndpointId::Payer), 10, &cfg()).unwrap();
        assert!(state.payer.is_none());
        assert_eq!(outcome.releases, vec![EndpointId::Payer]);
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].state, PayFinalState::Cancelled);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, NodeEvent::PaymentFinished { state: PayFinalState::Cancelled })));
    }
}
