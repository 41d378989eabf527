//! Effects produced by handlers instead of performed by them.
//!
//! Handlers stay pure state transitions: everything that touches the
//! outside world (sending, scheduling, chain access, events) is
//! returned as data and carried out by the dispatcher only after the
//! whole unit of work has succeeded.

use serde::{Deserialize, Serialize};

use crate::chain::ChainCommand;
use crate::event::NodeEvent;
use crate::message::Message;
use crate::packet::Packet;
use crate::timeout::{TimeoutEntry, TimeoutFilter};
use crate::types::{EndpointId, NetAddress};

/// Value handed back to the API caller that triggered the unit of work.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ReturnValue {
    Ack,
    Url(String),
}

/// One effect of a unit of work.
#[derive(Clone, Debug)]
pub enum Effect {
    /// Feed another message into the same unit of work.
    Process(Message),
    /// Send a packet on an established conversation.
    Send { to: EndpointId, packet: Packet },
    /// Open a new conversation to `address` and send `hello` on it.
    Open {
        local: EndpointId,
        remote: EndpointId,
        address: NetAddress,
        hello: Packet,
    },
    /// Add an entry to the timeout queue.
    Schedule(TimeoutEntry),
    /// Remove matching entries from the timeout queue.
    Filter(TimeoutFilter),
    /// Hand a command to the settlement chain backend.
    Chain(ChainCommand),
    /// Reply to the API caller.
    Return(ReturnValue),
    /// Raise an event towards local observers.
    Notify(NodeEvent),
}
