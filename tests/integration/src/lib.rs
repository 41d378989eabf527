//! Shared harness for whole-network payment tests.
//!
//! Runs several node state machines against a virtual clock and an
//! in-process wire. Packets are delivered in send order, one batch at
//! a time, so multi-hop payments unfold deterministically and a test
//! can drop a chosen packet to force the recovery paths.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use hopnet_core::{
    Amount, ApiRequest, ChannelKind, EndpointId, LinkId, Message, MeetingPointId, NodeConfig,
    NodeEvent, Packet, ReturnValue,
};
use hopnet_node::{run_batch, CompletedPayment, NodeState};
use hopnet_routing::Link;

/// Channel size every forward link is funded with.
pub const DEPOSIT: Amount = 1_000;

/// A packet-loss rule, checked for every lock crossing the wire.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DropRule {
    /// Swallow every lock about to be delivered to this node.
    InboundLock { node: usize },
    /// Swallow every lock this node puts on the wire.
    OutboundLock { node: usize },
}

/// One thing travelling towards a node, in wire order. Conversation
/// closes queue behind the packets sent before them, like a real
/// transport would deliver them.
#[derive(Clone, Debug)]
enum Delivery {
    Packet { endpoint: EndpointId, packet: Packet },
    Closed { endpoint: EndpointId },
}

pub struct Network {
    pub nodes: Vec<NodeState>,
    cfgs: Vec<NodeConfig>,
    pub now_ms: u64,
    /// Conversation wiring, one end to the other.
    conns: BTreeMap<(usize, EndpointId), (usize, EndpointId)>,
    inbox: VecDeque<(usize, Delivery)>,
    pub drop_rules: Vec<DropRule>,
    /// Events each node raised, in order.
    pub events: Vec<Vec<NodeEvent>>,
    /// Pay log records each node produced.
    pub completed: Vec<Vec<CompletedPayment>>,
}

impl Network {
    pub fn new(cfgs: Vec<NodeConfig>) -> Self {
        let nodes: Vec<NodeState> = cfgs.iter().map(|c| NodeState::new(c.name.as_str())).collect();
        let count = nodes.len();
        Network {
            nodes,
            cfgs,
            now_ms: 1_000,
            conns: BTreeMap::new(),
            inbox: VecDeque::new(),
            drop_rules: Vec::new(),
            events: (0..count).map(|_| Vec::new()).collect(),
            completed: (0..count).map(|_| Vec::new()).collect(),
        }
    }

    /// Wires the link conversation between two nodes. Each side names
    /// the link as its own endpoint.
    pub fn wire_link(&mut self, a: usize, a_link: &str, b: usize, b_link: &str) {
        let a_end = EndpointId::Link(link_id(a_link));
        let b_end = EndpointId::Link(link_id(b_link));
        self.conns.insert((a, a_end.clone()), (b, b_end.clone()));
        self.conns.insert((b, b_end), (a, a_end));
    }

    /// Hands an API request to one node and delivers everything it
    /// causes. Returns the request's reply value.
    pub fn api(&mut self, node: usize, req: ApiRequest) -> Option<ReturnValue> {
        let ret = self.dispatch(node, Message::Api(req));
        self.pump();
        ret
    }

    /// Creates a payment request and returns its payment URL.
    pub fn request_url(&mut self, node: usize, amount: Amount, receipt: &str) -> String {
        match self.api(node, ApiRequest::Request { amount, receipt: receipt.to_owned() }) {
            Some(ReturnValue::Url(url)) => url,
            other => panic!("payment request returned {other:?}"),
        }
    }

    /// Delivers one packet out of thin air, as a lost or replayed
    /// packet would arrive, and everything it causes.
    pub fn inject(&mut self, node: usize, endpoint: EndpointId, packet: Packet) {
        self.inbox.push_back((node, Delivery::Packet { endpoint, packet }));
        self.pump();
    }

    /// Moves the clock forward, firing every deadline on the way and
    /// delivering whatever the fired deadlines cause.
    pub fn advance(&mut self, ms: u64) {
        let target = self.now_ms + ms;
        loop {
            let next = self.nodes.iter().filter_map(|n| n.next_deadline()).min();
            let Some(at) = next.filter(|at| *at <= target) else { break };
            self.now_ms = self.now_ms.max(at);
            for node in 0..self.nodes.len() {
                for event in self.nodes[node].due_timeouts(self.now_ms) {
                    self.dispatch(node, Message::Timeout(event));
                }
            }
            self.pump();
        }
        self.now_ms = target;
    }

    /// Delivers queued traffic until the network goes quiet.
    pub fn pump(&mut self) {
        while let Some((node, delivery)) = self.inbox.pop_front() {
            match delivery {
                Delivery::Packet { endpoint, packet } => {
                    if self.dropped_inbound(node, &packet) {
                        debug!(node, "dropping lock at delivery");
                        continue;
                    }
                    self.dispatch(node, Message::Inbound { from: endpoint, packet });
                }
                Delivery::Closed { endpoint } => {
                    self.dispatch(node, Message::ConnClosed(endpoint));
                }
            }
        }
    }

    fn dispatch(&mut self, node: usize, msg: Message) -> Option<ReturnValue> {
        match run_batch(&mut self.nodes[node], msg, self.now_ms, &self.cfgs[node]) {
            Ok(outcome) => {
                let ret = outcome.return_value.clone();
                self.events[node].extend(outcome.events);
                self.completed[node].extend(outcome.completed);
                assert!(outcome.chain.is_empty(), "plain channels never talk to the chain");
                for (to, packet) in outcome.sends {
                    if self.dropped_outbound(node, &packet) {
                        debug!(node, "dropping lock at send");
                        continue;
                    }
                    match self.conns.get(&(node, to.clone())) {
                        Some(&(dest, ref dest_end)) => {
                            let endpoint = dest_end.clone();
                            self.inbox.push_back((dest, Delivery::Packet { endpoint, packet }));
                        }
                        // The conversation is gone; the shell would see
                        // the send fail and report the loss.
                        None => {
                            self.dispatch(node, Message::ConnClosed(to));
                        }
                    }
                }
                for open in outcome.opens {
                    match self.index_of(open.address.as_str()) {
                        Some(dest) => {
                            self.conns
                                .insert((node, open.local.clone()), (dest, open.remote.clone()));
                            self.conns.insert((dest, open.remote.clone()), (node, open.local));
                            self.inbox.push_back((
                                dest,
                                Delivery::Packet { endpoint: open.remote, packet: open.hello },
                            ));
                        }
                        None => {
                            self.dispatch(node, Message::ConnClosed(open.local));
                        }
                    }
                }
                for endpoint in outcome.releases {
                    if let Some((peer, peer_end)) = self.conns.remove(&(node, endpoint)) {
                        self.conns.remove(&(peer, peer_end.clone()));
                        self.inbox.push_back((peer, Delivery::Closed { endpoint: peer_end }));
                    }
                }
                ret
            }
            Err(e) => panic!("{} rejected a message: {e}", self.nodes[node].name),
        }
    }

    fn dropped_inbound(&self, node: usize, packet: &Packet) -> bool {
        matches!(packet, Packet::Lock(_))
            && self.drop_rules.contains(&DropRule::InboundLock { node })
    }

    fn dropped_outbound(&self, node: usize, packet: &Packet) -> bool {
        matches!(packet, Packet::Lock(_))
            && self.drop_rules.contains(&DropRule::OutboundLock { node })
    }

    fn index_of(&self, address: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == address)
    }

    // ---- inspection ----

    pub fn link(&self, node: usize, name: &str) -> &Link {
        self.nodes[node]
            .links
            .get(&link_id(name))
            .unwrap_or_else(|| panic!("{} has no link {name}", self.nodes[node].name))
    }

    /// Spendable balance per node.
    pub fn balances(&self) -> Vec<Amount> {
        self.nodes.iter().map(|n| n.balance()).collect()
    }

    /// Panics unless every trace of in-flight payments is gone:
    /// reservations, locks, searches, meeting point legs, payment
    /// entities and pending deadlines.
    pub fn assert_drained(&self) {
        for node in &self.nodes {
            assert!(node.in_flight_empty(), "{}: routes still in flight", node.name);
            assert!(node.searches.is_empty(), "{}: open route searches", node.name);
            assert!(node.payer.is_none(), "{}: payer not swept", node.name);
            assert!(node.payees.is_empty(), "{}: payees not swept", node.name);
            for mp in node.meeting_points.values() {
                assert_eq!(mp.pending_count(), 0, "{}: pending meeting point legs", node.name);
            }
            assert!(node.timeouts.is_empty(), "{}: deadlines still pending", node.name);
        }
    }
}

pub fn link_id(name: &str) -> LinkId {
    LinkId::new(name).expect("valid link name")
}

pub fn mp_id(name: &str) -> MeetingPointId {
    MeetingPointId::new(name).expect("valid meeting point name")
}

/// Both ends of every hop must mirror each other's ledger once the
/// network is quiet.
pub fn assert_hop_mirrors(net: &Network, len: usize) {
    for i in 0..len - 1 {
        let out = net.link(i, &format!("to_n{}", i + 1)).channels()[0].engine();
        let inc = net.link(i + 1, &format!("to_n{i}")).channels()[0].engine();
        assert_eq!(out.amount_local(), inc.amount_remote(), "hop {i} ledgers disagree");
        assert_eq!(out.amount_remote(), inc.amount_local(), "hop {i} ledgers disagree");
    }
}

/// A chain of `len` nodes `n0..n{len-1}`, linked neighbour to
/// neighbour, each forward channel funded with [`DEPOSIT`]. The middle
/// node hosts the meeting point `mp{len/2}`; the last node offers it
/// in its receipts.
pub fn chain_network(len: usize) -> Network {
    assert!(len >= 2);
    let host = len / 2;
    let mp = format!("mp{host}");

    let mut cfgs: Vec<NodeConfig> = (0..len).map(|i| NodeConfig::named(format!("n{i}"))).collect();
    if host != len - 1 {
        cfgs[len - 1].external_meeting_points = vec![mp_id(&mp)];
    }

    let mut net = Network::new(cfgs);
    for i in 0..len - 1 {
        let fwd = format!("to_n{}", i + 1);
        let back = format!("to_n{i}");
        net.wire_link(i, &fwd, i + 1, &back);
        net.api(i, ApiRequest::MakeLink { local: link_id(&fwd), remote: link_id(&back) });
        net.api(i + 1, ApiRequest::MakeLink { local: link_id(&back), remote: link_id(&fwd) });
        net.api(
            i,
            ApiRequest::Deposit { link: link_id(&fwd), kind: ChannelKind::Plain, amount: DEPOSIT },
        );
    }
    net.api(host, ApiRequest::MakeMeetingPoint { name: mp_id(&mp) });
    net
}
