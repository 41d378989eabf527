//! Messages a node processes, one at a time, as units of work.

use serde::{Deserialize, Serialize};

use crate::chain::ChainReturn;
use crate::packet::{ChannelKind, Packet};
use crate::timeout::TimeoutEvent;
use crate::types::{Amount, EndpointId, LinkId, MeetingPointId, RouteId};

/// Which local entity emitted a relay packet.
///
/// Relay packets travel entity to entity inside a node before they
/// leave it; the origin is excluded when the next holder of the route
/// is resolved, so a packet never bounces back to its producer.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum RelayOrigin {
    Payer,
    Payee(crate::types::PayeeId),
    MeetingPoint(MeetingPointId),
    Link(LinkId),
}

/// A request from the local API surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiRequest {
    /// Create a payee and return its payment URL.
    Request { amount: Amount, receipt: String },
    /// Start an outgoing payment towards a payment URL. `link`
    /// restricts routing to one link when given.
    Pay { url: String, link: Option<LinkId> },
    /// Resolve the receipt rendezvous: true commits, false refuses.
    ConfirmPayment { agreement: bool },
    /// Create a link under a local name, naming the peer's side.
    MakeLink { local: LinkId, remote: LinkId },
    /// Advertise a meeting point hosted on this node.
    MakeMeetingPoint { name: MeetingPointId },
    /// Deposit a new channel on a link.
    Deposit { link: LinkId, kind: ChannelKind, amount: Amount },
    /// Withdraw an empty channel.
    Withdraw { link: LinkId, channel_index: usize },
    /// Close a channel through its settlement backing.
    CloseChannel { link: LinkId, channel_index: usize },
}

/// One unit of work for the node state.
///
/// Only one message is processed at a time; everything it causes runs
/// to fixpoint inside the same unit, which either fully applies or
/// fully rolls back.
#[derive(Clone, Debug)]
pub enum Message {
    Api(ApiRequest),
    /// A packet delivered by the transport.
    Inbound { from: EndpointId, packet: Packet },
    /// A relay packet originated by a local entity, still to be routed
    /// to the next holder of its route.
    Relay { origin: RelayOrigin, packet: Packet },
    Timeout(TimeoutEvent),
    ChainReturn(ChainReturn),
    /// A reservation expired locally; local holders of the route are
    /// told to give up on it. Never sent on the wire.
    RouteFailed { route: RouteId },
    /// The transport lost the conversation with this endpoint.
    ConnClosed(EndpointId),
}

impl Message {
    /// Short name for log lines.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::Api(_) => "api",
            Message::Inbound { .. } => "inbound",
            Message::Relay { .. } => "relay",
            Message::Timeout(_) => "timeout",
            Message::ChainReturn(_) => "chain_return",
            Message::RouteFailed { .. } => "route_failed",
            Message::ConnClosed(_) => "conn_closed",
        }
    }
}
