//! Routing error surface.

use thiserror::Error;

use hopnet_channel::ChannelError;
use hopnet_core::{LinkId, MeetingPointId, RouteId};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// No channel on the link holds the named route.
    #[error("link {link} holds no channel for route {route}")]
    RouteNotHeld { link: LinkId, route: RouteId },

    /// A packet named a channel index the link does not have.
    #[error("channel index {index} out of range on link {link}")]
    BadChannelIndex { link: LinkId, index: usize },

    /// An extended route arrived without naming a channel.
    #[error("route extension on link {link} carries no channel index")]
    MissingChannelIndex { link: LinkId },

    /// A meeting point received a second leg for a side it already has.
    #[error("meeting point {meeting_point} already has a {side} leg for this transaction")]
    DuplicateLeg { meeting_point: MeetingPointId, side: &'static str },
}

pub type Result<T> = std::result::Result<T, RoutingError>;
