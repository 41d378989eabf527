//! Channel error surface.
//!
//! The set is closed on purpose: callers decide recovery by matching
//! on it, and only [`ChannelError::InsufficientFunds`] is recoverable.
//! Everything else aborts the unit of work that caused it.

use thiserror::Error;

use hopnet_core::{Amount, RouteId};

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel cannot cover the requested amount. The only
    /// recoverable variant: a route search moves on to the next
    /// candidate when it sees this.
    #[error("insufficient funds: need {needed}, available {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    /// The named route is not in the table the operation expected.
    #[error("route {0} not found")]
    RouteNotFound(RouteId),

    /// The route is already present in one of the tables.
    #[error("route {0} already exists")]
    RouteAlreadyExists(RouteId),

    /// The operation is invalid in the channel's current state.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl ChannelError {
    /// Whether a caller may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::InsufficientFunds { .. })
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
