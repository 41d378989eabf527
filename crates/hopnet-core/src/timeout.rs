//! Scheduled timeouts and the filters that retire them.
//!
//! Timeout entries are plain data so the pending queue survives a
//! state snapshot. An entry is never cancelled in place; either a
//! filter removes it or it fires and the handler decides it is stale.

use serde::{Deserialize, Serialize};

use crate::types::{LinkId, PayeeId, PayerState, PayeeState, RouteId, TransactionId};

/// A timeout that has come due, dispatched like any other message.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeoutEvent {
    /// Armed by the payer entity; carries the state it was armed in so
    /// a fire after a transition is recognised as stale.
    Payer { armed_in: PayerState },
    /// Armed by a payee entity, same staleness rule.
    Payee { payee: PayeeId, armed_in: PayeeState },
    /// Armed when a link locks an outgoing route; fires if no settle
    /// arrived within the commit grace period.
    LinkCommit {
        link: LinkId,
        transaction: TransactionId,
        payer_side: bool,
    },
    /// Armed when a link reserves a route; fires at the end of the
    /// reservation's validity window.
    RouteExpiry { link: LinkId, route: RouteId },
}

/// One pending entry in a node's timeout queue.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TimeoutEntry {
    pub fire_at_ms: u64,
    pub event: TimeoutEvent,
}

impl TimeoutEntry {
    pub fn new(fire_at_ms: u64, event: TimeoutEvent) -> Self {
        TimeoutEntry { fire_at_ms, event }
    }
}

/// Predicate removing pending timeout entries.
///
/// Emitted as an effect by handlers; the dispatcher applies it to the
/// queue within the same unit of work.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeoutFilter {
    /// Drops every payer entry. There is at most one payer, so no
    /// narrower match is needed.
    PayerAll,
    /// Drops every entry of one payee.
    Payee { payee: PayeeId },
    /// Drops the commit deadline of one locked route on one link,
    /// matched by transaction identifier and side.
    Commit {
        link: LinkId,
        transaction: TransactionId,
        payer_side: bool,
    },
}

impl TimeoutFilter {
    /// Whether `event` is removed by this filter.
    pub fn matches(&self, event: &TimeoutEvent) -> bool {
        match (self, event) {
            (TimeoutFilter::PayerAll, TimeoutEvent::Payer { .. }) => true,
            (TimeoutFilter::Payee { payee }, TimeoutEvent::Payee { payee: armed, .. }) => {
                payee == armed
            }
            (
                TimeoutFilter::Commit { link, transaction, payer_side },
                TimeoutEvent::LinkCommit {
                    link: armed_link,
                    transaction: armed_tx,
                    payer_side: armed_side,
                },
            ) => link == armed_link && transaction == armed_tx && payer_side == armed_side,
            _ => false,
        }
    }
}
