//! Node error surface.
//!
//! Any of these aborts the unit of work that raised it; the dispatcher
//! restores the pre-batch snapshot, so a failed unit leaves no trace.

use thiserror::Error;

use hopnet_core::{CoreError, EndpointId, LinkId, MeetingPointId, PayeeId, RouteId};
use hopnet_routing::RoutingError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("unknown link {0}")]
    UnknownLink(LinkId),

    #[error("link {0} already exists")]
    LinkExists(LinkId),

    #[error("meeting point {0} already exists")]
    MeetingPointExists(MeetingPointId),

    #[error("unknown payee {0}")]
    UnknownPayee(PayeeId),

    #[error("a payment is already in progress")]
    PayerBusy,

    #[error("no payment in progress")]
    NoPayer,

    #[error("no meeting point to offer; host one or configure external ones")]
    NoMeetingPoints,

    #[error("nothing on this node can handle {what} from {from}")]
    UnknownDestination { from: EndpointId, what: &'static str },

    #[error("no holder found for route {route} carried by {what}")]
    NoRouteHolder { route: RouteId, what: &'static str },

    #[error("unexpected {what} in state {state}")]
    UnexpectedMessage { what: String, state: String },
}

impl NodeError {
    pub(crate) fn unexpected(what: impl Into<String>, state: impl std::fmt::Display) -> Self {
        NodeError::UnexpectedMessage { what: what.into(), state: state.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
