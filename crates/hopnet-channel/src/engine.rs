//! The channel ledger engine shared by every channel type.
//!
//! A channel splits its funds into a local and a remote balance plus
//! four route tables: outgoing/incoming crossed with reserved/locked.
//! The sum of both balances never changes while the channel is open;
//! a settle moves value between them, nothing else does.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use hopnet_core::{Amount, RouteId, Token};

use crate::error::{ChannelError, Result};
use crate::reservation::Reservation;

/// Lifecycle of a channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Created on the accepting side, deposit not announced yet.
    Initial,
    /// Deposit under way; not usable for routing yet.
    Depositing,
    /// Open for reservations.
    Ready,
    /// Withdraw handshake in progress.
    Withdrawing,
    /// Closing settlement is being broadcast on chain.
    SendingClose,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Initial => "initial",
            ChannelState::Depositing => "depositing",
            ChannelState::Ready => "ready",
            ChannelState::Withdrawing => "withdrawing",
            ChannelState::SendingClose => "sending_close",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Ledger state of one channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelEngine {
    state: ChannelState,
    amount_local: Amount,
    amount_remote: Amount,
    out_reserved: BTreeMap<RouteId, Reservation>,
    in_reserved: BTreeMap<RouteId, Reservation>,
    out_locked: BTreeMap<RouteId, Reservation>,
    in_locked: BTreeMap<RouteId, Reservation>,
}

impl ChannelEngine {
    /// Engine for a channel we are depositing into.
    pub fn new_depositing(amount: Amount) -> Self {
        ChannelEngine {
            state: ChannelState::Depositing,
            amount_local: amount,
            amount_remote: 0,
            out_reserved: BTreeMap::new(),
            in_reserved: BTreeMap::new(),
            out_locked: BTreeMap::new(),
            in_locked: BTreeMap::new(),
        }
    }

    /// Engine for a channel the peer announced; waits for the deposit
    /// amount.
    pub fn new_accepting() -> Self {
        ChannelEngine {
            state: ChannelState::Initial,
            amount_local: 0,
            amount_remote: 0,
            out_reserved: BTreeMap::new(),
            in_reserved: BTreeMap::new(),
            out_locked: BTreeMap::new(),
            in_locked: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ChannelState) {
        debug!(from = %self.state, to = %state, "channel state change");
        self.state = state;
    }

    /// Records the peer's deposit on the accepting side.
    pub(crate) fn accept_deposit(&mut self, amount: Amount, next: ChannelState) -> Result<()> {
        if self.state != ChannelState::Initial {
            return Err(ChannelError::InvalidStateTransition(format!(
                "deposit announced on a {} channel",
                self.state
            )));
        }
        self.amount_remote = amount;
        self.set_state(next);
        Ok(())
    }

    pub fn amount_local(&self) -> Amount {
        self.amount_local
    }

    pub fn amount_remote(&self) -> Amount {
        self.amount_remote
    }

    /// Total value in the channel. Constant while the channel is open.
    pub fn total(&self) -> Amount {
        self.amount_local + self.amount_remote
    }

    pub fn out_reserved(&self) -> &BTreeMap<RouteId, Reservation> {
        &self.out_reserved
    }

    pub fn in_reserved(&self) -> &BTreeMap<RouteId, Reservation> {
        &self.in_reserved
    }

    pub fn out_locked(&self) -> &BTreeMap<RouteId, Reservation> {
        &self.out_locked
    }

    pub fn in_locked(&self) -> &BTreeMap<RouteId, Reservation> {
        &self.in_locked
    }

    /// Whether any table holds this route.
    pub fn holds(&self, route: &RouteId) -> bool {
        self.out_reserved.contains_key(route)
            || self.in_reserved.contains_key(route)
            || self.out_locked.contains_key(route)
            || self.in_locked.contains_key(route)
    }

    /// Whether no route is reserved or locked in either direction.
    pub fn in_flight_empty(&self) -> bool {
        self.out_reserved.is_empty()
            && self.in_reserved.is_empty()
            && self.out_locked.is_empty()
            && self.in_locked.is_empty()
    }

    fn committed(table: &BTreeMap<RouteId, Reservation>) -> Amount {
        table.values().map(|r| r.amount).sum()
    }

    /// Funds still available for new reservations in one direction.
    pub fn available(&self, outgoing: bool) -> Amount {
        let (balance, reserved, locked) = if outgoing {
            (self.amount_local, &self.out_reserved, &self.out_locked)
        } else {
            (self.amount_remote, &self.in_reserved, &self.in_locked)
        };
        balance
            .saturating_sub(Self::committed(reserved))
            .saturating_sub(Self::committed(locked))
    }

    fn reserved_table(&mut self, outgoing: bool) -> &mut BTreeMap<RouteId, Reservation> {
        if outgoing {
            &mut self.out_reserved
        } else {
            &mut self.in_reserved
        }
    }

    fn locked_table(&mut self, outgoing: bool) -> &mut BTreeMap<RouteId, Reservation> {
        if outgoing {
            &mut self.out_locked
        } else {
            &mut self.in_locked
        }
    }

    /// Sets funds aside for a route.
    ///
    /// Fails with [`ChannelError::InsufficientFunds`] when the channel
    /// is not ready or cannot cover the amount; a route search treats
    /// that as "try the next candidate".
    pub fn reserve(
        &mut self,
        outgoing: bool,
        route: RouteId,
        start_ms: u64,
        end_ms: u64,
        amount: Amount,
    ) -> Result<()> {
        if self.state != ChannelState::Ready {
            return Err(ChannelError::InsufficientFunds { needed: amount, available: 0 });
        }
        if self.holds(&route) {
            return Err(ChannelError::RouteAlreadyExists(route));
        }
        let available = self.available(outgoing);
        if amount > available {
            return Err(ChannelError::InsufficientFunds { needed: amount, available });
        }
        self.reserved_table(outgoing)
            .insert(route, Reservation::new(start_ms, end_ms, amount));
        debug!(%route, outgoing, amount, "reserved route");
        Ok(())
    }

    /// Drops a reservation if it is still present. Locked routes are
    /// never touched; settling them is the only way out.
    pub fn unreserve(&mut self, outgoing: bool, route: &RouteId) -> bool {
        let removed = self.reserved_table(outgoing).remove(route).is_some();
        if removed {
            debug!(%route, outgoing, "unreserved route");
        }
        removed
    }

    /// Narrows the validity window of a reservation.
    pub fn update_reservation(
        &mut self,
        outgoing: bool,
        route: &RouteId,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<()> {
        let reservation = self
            .reserved_table(outgoing)
            .get_mut(route)
            .ok_or(ChannelError::RouteNotFound(*route))?;
        reservation.update_window(start_ms, end_ms);
        Ok(())
    }

    /// Moves an outgoing reservation into the locked table.
    pub fn lock_outgoing(&mut self, route: &RouteId) -> Result<Amount> {
        let reservation = self
            .out_reserved
            .remove(route)
            .ok_or(ChannelError::RouteNotFound(*route))?;
        let amount = reservation.amount;
        self.out_locked.insert(*route, reservation);
        debug!(%route, amount, "locked outgoing route");
        Ok(amount)
    }

    /// Moves an incoming reservation into the locked table.
    pub fn lock_incoming(&mut self, route: &RouteId) -> Result<Amount> {
        let reservation = self
            .in_reserved
            .remove(route)
            .ok_or(ChannelError::RouteNotFound(*route))?;
        let amount = reservation.amount;
        self.in_locked.insert(*route, reservation);
        debug!(%route, amount, "locked incoming route");
        Ok(amount)
    }

    /// Rolls back an outgoing lock whose settle never arrived.
    /// Returns false when the route is already gone.
    pub fn rollback_timed_out(&mut self, route: &RouteId) -> bool {
        self.out_locked.remove(route).is_some()
    }

    /// Pays a locked outgoing route: local funds move to the peer.
    /// The token must hash to the route's transaction identifier.
    pub fn settle_commit_outgoing(&mut self, route: &RouteId, token: &Token) -> Result<Amount> {
        if token.transaction_id() != route.transaction {
            return Err(ChannelError::InvalidStateTransition(format!(
                "commit token does not match transaction of {route}"
            )));
        }
        let reservation = self
            .out_locked
            .remove(route)
            .ok_or(ChannelError::RouteNotFound(*route))?;
        let amount = reservation.amount;
        self.amount_local = self.amount_local.checked_sub(amount).ok_or_else(|| {
            ChannelError::InvalidStateTransition(format!(
                "locked amount {amount} exceeds local balance on {route}"
            ))
        })?;
        self.amount_remote += amount;
        debug!(%route, amount, local = self.amount_local, "settled outgoing route");
        Ok(amount)
    }

    /// Collects a locked incoming route: peer funds move to us.
    pub fn settle_commit_incoming(&mut self, route: &RouteId) -> Result<Amount> {
        let reservation = self
            .in_locked
            .remove(route)
            .ok_or(ChannelError::RouteNotFound(*route))?;
        let amount = reservation.amount;
        self.amount_remote = self.amount_remote.checked_sub(amount).ok_or_else(|| {
            ChannelError::InvalidStateTransition(format!(
                "locked amount {amount} exceeds remote balance on {route}"
            ))
        })?;
        self.amount_local += amount;
        debug!(%route, amount, local = self.amount_local, "collected incoming route");
        Ok(amount)
    }

    /// Releases an outgoing route without moving funds. Accepts both
    /// locked and still-reserved routes; a rollback can overtake the
    /// lock on a slow path.
    pub fn settle_rollback_outgoing(&mut self, route: &RouteId) -> Result<Amount> {
        if let Some(r) = self.out_locked.remove(route) {
            return Ok(r.amount);
        }
        self.out_reserved
            .remove(route)
            .map(|r| r.amount)
            .ok_or(ChannelError::RouteNotFound(*route))
    }

    /// Releases an incoming route without moving funds.
    pub fn settle_rollback_incoming(&mut self, route: &RouteId) -> Result<Amount> {
        if let Some(r) = self.in_locked.remove(route) {
            return Ok(r.amount);
        }
        self.in_reserved
            .remove(route)
            .map(|r| r.amount)
            .ok_or(ChannelError::RouteNotFound(*route))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_route(seed: u8, payer_side: bool) -> (RouteId, Token) {
        let token = Token::from_bytes([seed; 32]);
        (RouteId::new(token.transaction_id(), payer_side), token)
    }

    fn ready_engine(local: Amount, remote: Amount) -> ChannelEngine {
        let mut engine = ChannelEngine::new_depositing(local);
        engine.set_state(ChannelState::Ready);
        engine.amount_remote = remote;
        engine
    }

    #[test]
    fn test_reserve_respects_available_funds() {
        let mut engine = ready_engine(1000, 0);
        let (a, _) = make_route(1, true);
        let (b, _) = make_route(2, true);
        engine.reserve(true, a, 0, 100, 600).unwrap();
        assert_eq!(engine.available(true), 400);

        let err = engine.reserve(true, b, 0, 100, 500).unwrap_err();
        match err {
            ChannelError::InsufficientFunds { needed, available } => {
                assert_eq!(needed, 500);
                assert_eq!(available, 400);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
        // The failed reserve must leave nothing behind.
        assert_eq!(engine.out_reserved().len(), 1);
    }

    #[test]
    fn test_reserve_rejects_duplicate_route() {
        let mut engine = ready_engine(1000, 0);
        let (route, _) = make_route(1, true);
        engine.reserve(true, route, 0, 100, 10).unwrap();
        assert!(matches!(
            engine.reserve(true, route, 0, 100, 10),
            Err(ChannelError::RouteAlreadyExists(_))
        ));
    }

    #[test]
    fn test_reserve_requires_ready_state() {
        let mut engine = ChannelEngine::new_depositing(1000);
        let (route, _) = make_route(1, true);
        // A channel that is still depositing reports no funds rather
        // than a protocol violation, so a search can walk past it.
        assert!(matches!(
            engine.reserve(true, route, 0, 100, 10),
            Err(ChannelError::InsufficientFunds { available: 0, .. })
        ));
    }

    #[test]
    fn test_full_commit_moves_funds_once() {
        let mut engine = ready_engine(1000, 0);
        let (route, token) = make_route(3, true);
        engine.reserve(true, route, 0, 100, 123).unwrap();
        engine.lock_outgoing(&route).unwrap();
        assert_eq!(engine.total(), 1000);

        let paid = engine.settle_commit_outgoing(&route, &token).unwrap();
        assert_eq!(paid, 123);
        assert_eq!(engine.amount_local(), 877);
        assert_eq!(engine.amount_remote(), 123);
        assert_eq!(engine.total(), 1000);
        assert!(engine.in_flight_empty());

        // A second settle of the same route has nothing to act on.
        assert!(matches!(
            engine.settle_commit_outgoing(&route, &token),
            Err(ChannelError::RouteNotFound(_))
        ));
    }

    #[test]
    fn test_settle_rejects_wrong_token() {
        let mut engine = ready_engine(1000, 0);
        let (route, _) = make_route(4, true);
        let wrong = Token::from_bytes([5u8; 32]);
        engine.reserve(true, route, 0, 100, 50).unwrap();
        engine.lock_outgoing(&route).unwrap();
        assert!(matches!(
            engine.settle_commit_outgoing(&route, &wrong),
            Err(ChannelError::InvalidStateTransition(_))
        ));
        // The lock stays in place for the real token.
        assert_eq!(engine.out_locked().len(), 1);
    }

    #[test]
    fn test_incoming_collect_mirrors_outgoing_pay() {
        let mut engine = ready_engine(0, 1000);
        let (route, _) = make_route(6, false);
        engine.reserve(false, route, 0, 100, 123).unwrap();
        engine.lock_incoming(&route).unwrap();
        let collected = engine.settle_commit_incoming(&route).unwrap();
        assert_eq!(collected, 123);
        assert_eq!(engine.amount_local(), 123);
        assert_eq!(engine.amount_remote(), 877);
        assert_eq!(engine.total(), 1000);
    }

    #[test]
    fn test_rollback_releases_without_moving_funds() {
        let mut engine = ready_engine(1000, 0);
        let (route, _) = make_route(7, true);
        engine.reserve(true, route, 0, 100, 200).unwrap();
        engine.lock_outgoing(&route).unwrap();
        assert_eq!(engine.available(true), 800);

        engine.settle_rollback_outgoing(&route).unwrap();
        assert_eq!(engine.amount_local(), 1000);
        assert_eq!(engine.amount_remote(), 0);
        assert_eq!(engine.available(true), 1000);
    }

    #[test]
    fn test_rollback_accepts_reserved_route() {
        let mut engine = ready_engine(1000, 0);
        let (route, _) = make_route(8, true);
        engine.reserve(true, route, 0, 100, 200).unwrap();
        // No lock; the rollback overtook it.
        engine.settle_rollback_outgoing(&route).unwrap();
        assert!(engine.in_flight_empty());
    }

    #[test]
    fn test_unreserve_is_idempotent_and_spares_locks() {
        let mut engine = ready_engine(1000, 0);
        let (route, _) = make_route(9, true);
        engine.reserve(true, route, 0, 100, 10).unwrap();
        assert!(engine.unreserve(true, &route));
        assert!(!engine.unreserve(true, &route));

        engine.reserve(true, route, 0, 100, 10).unwrap();
        engine.lock_outgoing(&route).unwrap();
        // A stray expiry after the lock must not release locked funds.
        assert!(!engine.unreserve(true, &route));
        assert_eq!(engine.out_locked().len(), 1);
    }

    #[test]
    fn test_update_reservation_narrows_window() {
        let mut engine = ready_engine(1000, 0);
        let (route, _) = make_route(10, true);
        engine.reserve(true, route, 0, 1000, 10).unwrap();
        engine.update_reservation(true, &route, 100, 500).unwrap();
        let r = engine.out_reserved()[&route];
        assert_eq!((r.start_ms, r.end_ms), (100, 500));

        let (absent, _) = make_route(11, true);
        assert!(matches!(
            engine.update_reservation(true, &absent, 0, 1),
            Err(ChannelError::RouteNotFound(_))
        ));
    }

    #[test]
    fn test_commit_timeout_rollback_reports_presence() {
        let mut engine = ready_engine(1000, 0);
        let (route, _) = make_route(12, true);
        engine.reserve(true, route, 0, 100, 10).unwrap();
        engine.lock_outgoing(&route).unwrap();
        assert!(engine.rollback_timed_out(&route));
        // Second fire finds nothing; the settle already won or the
        // first fire cleaned up.
        assert!(!engine.rollback_timed_out(&route));
    }

    #[test]
    fn test_serde_round_trip_preserves_tables() {
        let mut engine = ready_engine(1000, 500);
        let (a, _) = make_route(13, true);
        let (b, _) = make_route(14, false);
        engine.reserve(true, a, 0, 100, 10).unwrap();
        engine.reserve(false, b, 0, 100, 20).unwrap();
        engine.lock_incoming(&b).unwrap();

        let json = serde_json::to_string(&engine).unwrap();
        let back: ChannelEngine = serde_json::from_str(&json).unwrap();
        assert_eq!(back.amount_local(), 1000);
        assert_eq!(back.amount_remote(), 500);
        assert!(back.out_reserved().contains_key(&a));
        assert!(back.in_locked().contains_key(&b));
        assert_eq!(back.state(), ChannelState::Ready);
    }
}
