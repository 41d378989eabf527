//! Meeting points: where the two half-routes of a payment meet.
//!
//! The payer cannot see the payee's side of the network, so both ends
//! grow a half-route towards a meeting point both can name. The
//! meeting point pairs the two legs by transaction identifier and from
//! then on bridges commit-phase traffic from one side onto the other.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hopnet_core::{
    Amount, Effect, HaveNoRoute, HaveRoute, Lock, MakeRoute, Message, MeetingPointId, Packet,
    RelayOrigin, RequestCommit, RouteId, SettleCommit, SettleRollback, TransactionId,
};

use crate::error::{Result, RoutingError};

/// One half-route that reached this meeting point.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
struct Leg {
    amount: Amount,
    start_ms: u64,
    end_ms: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PendingMatch {
    payer: Option<Leg>,
    payee: Option<Leg>,
}

/// A meeting point hosted on this node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeetingPoint {
    pub id: MeetingPointId,
    pending: BTreeMap<TransactionId, PendingMatch>,
}

impl MeetingPoint {
    pub fn new(id: MeetingPointId) -> Self {
        MeetingPoint { id, pending: BTreeMap::new() }
    }

    /// Whether this meeting point still tracks the transaction.
    pub fn holds(&self, transaction: &TransactionId) -> bool {
        self.pending.contains_key(transaction)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Accepts one leg of a route. When both legs are in, either
    /// confirms the route to both sides with the intersected validity
    /// window, or reports no route when the legs cannot agree.
    pub fn on_make_route(&mut self, m: &MakeRoute) -> Result<Vec<Effect>> {
        let entry = self.pending.entry(m.transaction).or_default();
        let leg = Leg { amount: m.amount, start_ms: m.start_ms, end_ms: m.end_ms };
        let slot = if m.payer_side { &mut entry.payer } else { &mut entry.payee };
        if slot.is_some() {
            return Err(RoutingError::DuplicateLeg {
                meeting_point: self.id.clone(),
                side: if m.payer_side { "payer" } else { "payee" },
            });
        }
        *slot = Some(leg);
        debug!(meeting_point = %self.id, transaction = %m.transaction, side = m.payer_side, "leg arrived");

        let (payer, payee) = match (entry.payer, entry.payee) {
            (Some(p), Some(q)) => (p, q),
            _ => return Ok(Vec::new()),
        };

        if payer.amount != payee.amount {
            warn!(
                meeting_point = %self.id,
                transaction = %m.transaction,
                payer_amount = payer.amount,
                payee_amount = payee.amount,
                "legs disagree on amount, refusing match"
            );
            self.pending.remove(&m.transaction);
            return Ok(self.no_route_both_ways(m.transaction));
        }

        let start_ms = payer.start_ms.max(payee.start_ms);
        let end_ms = payer.end_ms.min(payee.end_ms);
        if start_ms >= end_ms {
            info!(
                meeting_point = %self.id,
                transaction = %m.transaction,
                "validity windows do not overlap, refusing match"
            );
            self.pending.remove(&m.transaction);
            return Ok(self.no_route_both_ways(m.transaction));
        }

        info!(
            meeting_point = %self.id,
            transaction = %m.transaction,
            amount = payer.amount,
            "matched payer and payee legs"
        );
        Ok(vec![
            self.relay(Packet::HaveRoute(HaveRoute {
                transaction: m.transaction,
                payer_side: true,
                start_ms,
                end_ms,
            })),
            self.relay(Packet::HaveRoute(HaveRoute {
                transaction: m.transaction,
                payer_side: false,
                start_ms,
                end_ms,
            })),
        ])
    }

    /// Bridges a commit-phase packet onto the other half-route.
    /// Returns `None` for transactions this meeting point no longer
    /// tracks.
    pub fn bridge(&mut self, packet: &Packet) -> Option<Vec<Effect>> {
        let (transaction, flipped) = match packet {
            Packet::Lock(l) => (
                l.transaction,
                Packet::Lock(Lock {
                    transaction: l.transaction,
                    payer_side: !l.payer_side,
                    amount: l.amount,
                }),
            ),
            Packet::RequestCommit(r) => (
                r.token.transaction_id(),
                Packet::RequestCommit(RequestCommit { token: r.token, payer_side: !r.payer_side }),
            ),
            Packet::SettleCommit(s) => (
                s.token.transaction_id(),
                Packet::SettleCommit(SettleCommit { token: s.token, payer_side: !s.payer_side }),
            ),
            Packet::SettleRollback(s) => (
                s.transaction,
                Packet::SettleRollback(SettleRollback {
                    transaction: s.transaction,
                    payer_side: !s.payer_side,
                }),
            ),
            _ => return None,
        };
        if !self.pending.contains_key(&transaction) {
            return None;
        }
        // Settlement ends the transaction's life at the meeting point.
        if matches!(packet, Packet::SettleCommit(_) | Packet::SettleRollback(_)) {
            self.pending.remove(&transaction);
        }
        debug!(meeting_point = %self.id, %transaction, kind = packet.kind_name(), "bridging to other side");
        Some(vec![self.relay(flipped)])
    }

    /// Drops one side's leg after a cancel or a local route failure.
    pub fn drop_leg(&mut self, route: &RouteId) {
        if let Some(entry) = self.pending.get_mut(&route.transaction) {
            if route.payer_side {
                entry.payer = None;
            } else {
                entry.payee = None;
            }
            if entry.payer.is_none() && entry.payee.is_none() {
                self.pending.remove(&route.transaction);
            }
            debug!(meeting_point = %self.id, route = %route, "dropped leg");
        }
    }

    fn no_route_both_ways(&self, transaction: TransactionId) -> Vec<Effect> {
        vec![
            self.relay(Packet::HaveNoRoute(HaveNoRoute { transaction, payer_side: true })),
            self.relay(Packet::HaveNoRoute(HaveNoRoute { transaction, payer_side: false })),
        ]
    }

    fn relay(&self, packet: Packet) -> Effect {
        Effect::Process(Message::Relay {
            origin: RelayOrigin::MeetingPoint(self.id.clone()),
            packet,
        })
    }
}
