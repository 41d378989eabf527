//! A link to one peer and the relay verbs that run over it.
//!
//! Every relay verb comes in two flavours. The `_outgoing` flavour
//! produces a packet for this link's peer; the `_incoming` flavour
//! consumes a packet that arrived from the peer and touches only local
//! tables. Which channel table each verb works on follows from the
//! side flag: a payer-side route crosses a link in the direction the
//! money moves, a payee-side route in the opposite direction.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hopnet_channel::{Channel, ChannelOutput};
use hopnet_core::{
    Amount, CancelRoute, ChainCommand, ChainValue, ChannelConvMsg, ChannelKind, Effect, EndpointId,
    HaveNoRoute, HaveRoute, LinkId, Lock, MakeRoute, Message, NodeConfig, Packet, RequestCommit,
    RouteId, SettleCommit, SettleRollback, TimeoutEntry, TimeoutEvent, TimeoutFilter, Token,
    TransactionId,
};

use crate::completed::{CompletedRoutes, RouteDisposition};
use crate::error::{Result, RoutingError};

/// One peer relationship: its channels and completed-route records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Link {
    /// Our name for this link; also its conversation endpoint.
    pub local_id: LinkId,
    /// The peer's name for its side, used in log lines.
    pub remote_id: LinkId,
    channels: Vec<Channel>,
    completed: CompletedRoutes,
}

impl Link {
    pub fn new(local_id: LinkId, remote_id: LinkId) -> Self {
        Link { local_id, remote_id, channels: Vec::new(), completed: CompletedRoutes::new() }
    }

    fn endpoint(&self) -> EndpointId {
        EndpointId::Link(self.local_id.clone())
    }

    fn send(&self, packet: Packet) -> Effect {
        Effect::Send { to: self.endpoint(), packet }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn completed(&self) -> &CompletedRoutes {
        &self.completed
    }

    /// Index of the channel holding this route in any table.
    pub fn find_route(&self, route: &RouteId) -> Option<usize> {
        self.channels.iter().position(|c| c.engine().holds(route))
    }

    pub fn holds_route(&self, route: &RouteId) -> bool {
        self.find_route(route).is_some()
    }

    pub fn in_flight_empty(&self) -> bool {
        self.channels.iter().all(|c| c.engine().in_flight_empty())
    }

    fn channel_mut(&mut self, index: usize) -> Result<&mut Channel> {
        let link = self.local_id.clone();
        self.channels
            .get_mut(index)
            .ok_or(RoutingError::BadChannelIndex { link, index })
    }

    /// Turns channel output into addressed effects: conversation
    /// payloads go to this link's peer, chain commands get this link
    /// and channel as their return address.
    fn stamp(&self, index: usize, out: ChannelOutput) -> Vec<Effect> {
        let mut effects = Vec::new();
        for msg in out.conversation {
            effects.push(self.send(Packet::ChannelMsg { channel_index: index, msg }));
        }
        for kind in out.chain {
            effects.push(Effect::Chain(ChainCommand {
                return_link: self.local_id.clone(),
                return_channel: index,
                kind,
            }));
        }
        effects
    }

    // ---- channel lifecycle ----

    /// Deposits a new channel on this link and announces it.
    pub fn deposit_local(&mut self, kind: ChannelKind, amount: Amount) -> Vec<Effect> {
        let index = self.channels.len();
        let channel = Channel::make_for_deposit(kind, amount);
        let announcement = channel.deposit_announcement();
        self.channels.push(channel);
        info!(link = %self.local_id, index, ?kind, amount, "depositing new channel");
        vec![
            self.send(Packet::Deposit { channel_index: index, kind }),
            self.send(Packet::ChannelMsg { channel_index: index, msg: announcement }),
        ]
    }

    /// Accepts the peer's announcement of a fresh channel. Channels
    /// are append-only, so the announced index must be the next one.
    pub fn on_peer_deposit(&mut self, index: usize, kind: ChannelKind) -> Result<()> {
        if index != self.channels.len() {
            return Err(RoutingError::BadChannelIndex { link: self.local_id.clone(), index });
        }
        info!(link = %self.local_id, index, ?kind, "peer deposited new channel");
        self.channels.push(Channel::make_accepting(kind));
        Ok(())
    }

    pub fn on_channel_msg(&mut self, index: usize, msg: &ChannelConvMsg) -> Result<Vec<Effect>> {
        let out = self.channel_mut(index)?.on_conversation(msg)?;
        Ok(self.stamp(index, out))
    }

    pub fn on_chain_return(&mut self, index: usize, value: &ChainValue) -> Result<Vec<Effect>> {
        let out = self.channel_mut(index)?.on_chain_return(value)?;
        Ok(self.stamp(index, out))
    }

    pub fn begin_withdraw(&mut self, index: usize) -> Result<Vec<Effect>> {
        let out = self.channel_mut(index)?.begin_withdraw()?;
        let mut effects = vec![self.send(Packet::Withdraw { channel_index: index })];
        effects.extend(self.stamp(index, out));
        Ok(effects)
    }

    pub fn on_peer_withdraw(&mut self, index: usize) -> Result<Vec<Effect>> {
        let out = self.channel_mut(index)?.on_peer_withdraw()?;
        Ok(self.stamp(index, out))
    }

    pub fn begin_close(&mut self, index: usize) -> Result<Vec<Effect>> {
        match self.channel_mut(index)?.kind() {
            // A plain channel closes through the withdraw handshake.
            ChannelKind::Plain => self.begin_withdraw(index),
            ChannelKind::Iou => {
                let out = self.channel_mut(index)?.begin_close()?;
                Ok(self.stamp(index, out))
            }
        }
    }

    // ---- route establishment ----

    /// Tries to extend a half-route over this link. Walks the channels
    /// in order and reserves on the first one that can cover the
    /// amount; returns `None` when none can, so the search moves on to
    /// the next link.
    pub fn make_route_outgoing(&mut self, m: &MakeRoute) -> Result<Option<Vec<Effect>>> {
        let route = m.route_id();
        let outgoing = m.payer_side;
        for (index, channel) in self.channels.iter_mut().enumerate() {
            match channel
                .engine_mut()
                .reserve(outgoing, route, m.start_ms, m.end_ms, m.amount)
            {
                Ok(()) => {
                    debug!(link = %self.local_id, index, %route, "extending route");
                    let mut forward = m.clone();
                    forward.channel_index = Some(index);
                    return Ok(Some(vec![
                        self.send(Packet::MakeRoute(forward)),
                        Effect::Schedule(TimeoutEntry::new(
                            m.end_ms,
                            TimeoutEvent::RouteExpiry { link: self.local_id.clone(), route },
                        )),
                    ]));
                }
                Err(e) if e.is_recoverable() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Reserves the mirror side of a route the peer extended to us,
    /// on the channel the peer picked.
    pub fn make_route_incoming(&mut self, m: &MakeRoute) -> Result<Vec<Effect>> {
        let index = m.channel_index.ok_or(RoutingError::MissingChannelIndex {
            link: self.local_id.clone(),
        })?;
        let route = m.route_id();
        let outgoing = !m.payer_side;
        self.channel_mut(index)?
            .engine_mut()
            .reserve(outgoing, route, m.start_ms, m.end_ms, m.amount)?;
        Ok(vec![Effect::Schedule(TimeoutEntry::new(
            m.end_ms,
            TimeoutEvent::RouteExpiry { link: self.local_id.clone(), route },
        ))])
    }

    /// Passes a route confirmation on towards the route's origin,
    /// narrowing our reservation to the agreed window.
    pub fn have_route_outgoing(&mut self, h: &HaveRoute) -> Result<Vec<Effect>> {
        let route = h.route_id();
        let index = self.require_route(&route)?;
        self.channels[index]
            .engine_mut()
            .update_reservation(!h.payer_side, &route, h.start_ms, h.end_ms)?;
        Ok(vec![self.send(Packet::HaveRoute(h.clone()))])
    }

    /// Records a route confirmation arriving from the peer.
    pub fn have_route_incoming(&mut self, h: &HaveRoute) -> Result<Vec<Effect>> {
        let route = h.route_id();
        let index = self.require_route(&route)?;
        self.channels[index]
            .engine_mut()
            .update_reservation(h.payer_side, &route, h.start_ms, h.end_ms)?;
        Ok(Vec::new())
    }

    /// Reports a failed search back towards the route's origin,
    /// releasing whatever we had reserved for it.
    pub fn have_no_route_outgoing(&mut self, n: &HaveNoRoute) -> Result<Vec<Effect>> {
        let route = n.route_id();
        if let Some(index) = self.find_route(&route) {
            self.channels[index].engine_mut().unreserve(!n.payer_side, &route);
        }
        Ok(vec![self.send(Packet::HaveNoRoute(n.clone()))])
    }

    /// Releases our reservation after the peer reported no route.
    pub fn have_no_route_incoming(&mut self, n: &HaveNoRoute) -> Result<Vec<Effect>> {
        let route = n.route_id();
        if let Some(index) = self.find_route(&route) {
            self.channels[index].engine_mut().unreserve(n.payer_side, &route);
        }
        Ok(Vec::new())
    }

    /// Tears down a reservation in the direction the route was built.
    pub fn cancel_route_outgoing(&mut self, route: &RouteId) -> Result<Vec<Effect>> {
        if let Some(index) = self.find_route(route) {
            self.channels[index].engine_mut().unreserve(route.payer_side, route);
        }
        Ok(vec![self.send(Packet::CancelRoute(CancelRoute {
            transaction: route.transaction,
            payer_side: route.payer_side,
        }))])
    }

    pub fn cancel_route_incoming(&mut self, route: &RouteId) -> Result<Vec<Effect>> {
        if let Some(index) = self.find_route(route) {
            self.channels[index].engine_mut().unreserve(!route.payer_side, route);
        }
        Ok(Vec::new())
    }

    // ---- commit phase ----

    /// Locks our outgoing hop and passes the lock on. Arms the commit
    /// deadline: if no settle arrives in time, this hop rolls back on
    /// its own.
    pub fn lock_outgoing(&mut self, l: &Lock, now_ms: u64, cfg: &NodeConfig) -> Result<Vec<Effect>> {
        let route = l.route_id();
        let index = self.require_route(&route)?;
        let amount = self.channels[index].engine_mut().lock_outgoing(&route)?;
        debug!(link = %self.local_id, %route, amount, "locked outgoing hop");
        Ok(vec![
            self.send(Packet::Lock(l.clone())),
            Effect::Schedule(TimeoutEntry::new(
                now_ms + cfg.commit_grace_ms,
                TimeoutEvent::LinkCommit {
                    link: self.local_id.clone(),
                    transaction: l.transaction,
                    payer_side: l.payer_side,
                },
            )),
        ])
    }

    /// Locks our incoming hop after the peer locked theirs.
    pub fn lock_incoming(&mut self, l: &Lock) -> Result<Vec<Effect>> {
        let route = l.route_id();
        let index = self.require_route(&route)?;
        self.channels[index].engine_mut().lock_incoming(&route)?;
        Ok(Vec::new())
    }

    /// Relays a commit request towards the payer. Pure forward; the
    /// token only acts on settle.
    pub fn request_commit_outgoing(&self, token: Token, payer_side: bool) -> Vec<Effect> {
        vec![self.send(Packet::RequestCommit(RequestCommit { token, payer_side }))]
    }

    /// Pays our outgoing hop and passes the settle on.
    pub fn settle_commit_outgoing(
        &mut self,
        s: &SettleCommit,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        let route = s.route_id();
        match self.find_route(&route) {
            Some(index) => {
                let (amount, out) = self.channels[index].settle_commit_outgoing(&route, &s.token)?;
                self.record_completed(route, RouteDisposition::Committed, now_ms, cfg);
                info!(link = %self.local_id, %route, amount, "paid outgoing hop");
                let mut effects = vec![
                    self.send(Packet::SettleCommit(s.clone())),
                    self.commit_filter(route.transaction, route.payer_side),
                ];
                effects.extend(self.stamp(index, out));
                Ok(effects)
            }
            None => self.absent_settle(&route, "settle commit"),
        }
    }

    /// Collects our incoming hop.
    pub fn settle_commit_incoming(
        &mut self,
        s: &SettleCommit,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        let route = s.route_id();
        match self.find_route(&route) {
            Some(index) => {
                // The incoming table is keyed by the hash of the token,
                // so presence already proves the token.
                let (amount, out) = self.channels[index].settle_commit_incoming(&route)?;
                self.record_completed(route, RouteDisposition::Committed, now_ms, cfg);
                info!(link = %self.local_id, %route, amount, "collected incoming hop");
                Ok(self.stamp(index, out))
            }
            None => self.absent_settle(&route, "settle commit"),
        }
    }

    /// Rolls back our outgoing hop and passes the rollback on.
    pub fn settle_rollback_outgoing(
        &mut self,
        s: &SettleRollback,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        let route = s.route_id();
        match self.find_route(&route) {
            Some(index) => {
                let amount = self.channels[index].engine_mut().settle_rollback_outgoing(&route)?;
                self.record_completed(route, RouteDisposition::RolledBack, now_ms, cfg);
                info!(link = %self.local_id, %route, amount, "rolled back outgoing hop");
                Ok(vec![
                    self.send(Packet::SettleRollback(s.clone())),
                    self.commit_filter(route.transaction, route.payer_side),
                ])
            }
            None => Ok(self.absent_rollback(&route)),
        }
    }

    pub fn settle_rollback_incoming(
        &mut self,
        s: &SettleRollback,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        let route = s.route_id();
        match self.find_route(&route) {
            Some(index) => {
                let amount = self.channels[index].engine_mut().settle_rollback_incoming(&route)?;
                self.record_completed(route, RouteDisposition::RolledBack, now_ms, cfg);
                info!(link = %self.local_id, %route, amount, "rolled back incoming hop");
                Ok(Vec::new())
            }
            None => Ok(self.absent_rollback(&route)),
        }
    }

    /// The commit deadline of a locked outgoing hop fired. If the hop
    /// is still locked, roll it back and start a rollback cascade
    /// downstream; local holders are told the route failed.
    pub fn do_commit_timeout(
        &mut self,
        transaction: TransactionId,
        payer_side: bool,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Vec<Effect> {
        let route = RouteId::new(transaction, payer_side);
        let rolled = self
            .find_route(&route)
            .map(|i| self.channels[i].engine_mut().rollback_timed_out(&route))
            .unwrap_or(false);
        if !rolled {
            debug!(link = %self.local_id, %route, "commit deadline fired after settle, ignoring");
            return Vec::new();
        }
        warn!(link = %self.local_id, %route, "commit deadline expired, rolling back hop");
        self.record_completed(route, RouteDisposition::RolledBack, now_ms, cfg);
        vec![
            self.send(Packet::SettleRollback(SettleRollback { transaction, payer_side })),
            Effect::Process(Message::RouteFailed { route }),
        ]
    }

    /// A reservation hit the end of its validity window. Locked routes
    /// are left alone; the commit deadline owns those.
    pub fn on_route_expiry(&mut self, route: &RouteId) -> Vec<Effect> {
        for channel in &mut self.channels {
            let engine = channel.engine_mut();
            if engine.unreserve(true, route) || engine.unreserve(false, route) {
                info!(link = %self.local_id, %route, "reservation expired");
                return vec![Effect::Process(Message::RouteFailed { route: *route })];
            }
        }
        Vec::new()
    }

    fn commit_filter(&self, transaction: TransactionId, payer_side: bool) -> Effect {
        Effect::Filter(TimeoutFilter::Commit {
            link: self.local_id.clone(),
            transaction,
            payer_side,
        })
    }

    fn record_completed(&mut self, route: RouteId, disposition: RouteDisposition, now_ms: u64, cfg: &NodeConfig) {
        self.completed
            .record(route, disposition, now_ms, cfg.completed_route_capacity);
        self.completed.prune(now_ms, cfg.completed_route_retention_ms);
    }

    /// Settle arrived for a route no channel holds: a replay of a
    /// completed route is ignored, anything else is a violation.
    fn absent_settle(&self, route: &RouteId, what: &str) -> Result<Vec<Effect>> {
        match self.completed.get(route) {
            Some(record) => {
                warn!(
                    link = %self.local_id,
                    %route,
                    disposition = ?record.disposition,
                    "{what} replay for completed route, ignoring"
                );
                Ok(Vec::new())
            }
            None => Err(RoutingError::RouteNotHeld {
                link: self.local_id.clone(),
                route: *route,
            }),
        }
    }

    /// Rollback for a route no channel holds. A cancel or an earlier
    /// rollback can beat the cascade here; the route already released
    /// is the outcome the rollback was after.
    fn absent_rollback(&self, route: &RouteId) -> Vec<Effect> {
        match self.completed.get(route) {
            Some(record) => debug!(
                link = %self.local_id,
                %route,
                disposition = ?record.disposition,
                "rollback replay for completed route, ignoring"
            ),
            None => warn!(link = %self.local_id, %route, "rollback for unknown route, ignoring"),
        }
        Vec::new()
    }

    fn require_route(&self, route: &RouteId) -> Result<usize> {
        self.find_route(route).ok_or(RoutingError::RouteNotHeld {
            link: self.local_id.clone(),
            route: *route,
        })
    }
}
