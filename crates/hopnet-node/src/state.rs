//! The node's whole state and the router that advances it.
//!
//! Every trigger becomes a [`Message`]; `handle` applies one message
//! and returns the effects it caused. Relay packets never carry an
//! explicit destination: the router resolves the next holder of the
//! packet's route, excluding whoever the packet came from, and runs
//! that holder's half of the relay verb. A packet arriving over a link
//! first runs its incoming half on that link, then continues like any
//! relay.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hopnet_core::{
    format_pay_url, ApiRequest, CancelRoute, ChainReturn, Effect, EndpointId, HaveNoRoute,
    HaveRoute, LinkId, MeetingPointId, Message, NetAddress, NodeConfig, Packet, PayeeId,
    RelayOrigin, ReturnValue, RouteId, TimeoutEntry, TimeoutEvent, TimeoutFilter,
};
use hopnet_routing::{Link, MeetingPoint, RouteSearch, SearchOrigin};

use crate::error::{NodeError, Result};
use crate::payee::PayeeLink;
use crate::payer::PayerLink;

/// The next entity a relay packet lands on.
#[derive(Clone, PartialEq, Eq, Debug)]
enum Holder {
    Link(LinkId),
    MeetingPoint(MeetingPointId),
    Payer,
    Payee(PayeeId),
}

/// Everything a node knows, as one serializable value. Cloning it
/// gives the dispatcher its pre-batch snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeState {
    /// Node name; doubles as the transport address in payment URLs.
    pub name: String,
    pub links: BTreeMap<LinkId, Link>,
    /// At most one outgoing payment at a time.
    pub payer: Option<PayerLink>,
    pub payees: BTreeMap<PayeeId, PayeeLink>,
    pub meeting_points: BTreeMap<MeetingPointId, MeetingPoint>,
    /// Route searches waiting for an answer from their current
    /// candidate link.
    pub searches: BTreeMap<RouteId, RouteSearch>,
    /// Pending timeouts, sorted by deadline.
    pub timeouts: Vec<TimeoutEntry>,
}

impl NodeState {
    pub fn new(name: impl Into<String>) -> Self {
        NodeState {
            name: name.into(),
            links: BTreeMap::new(),
            payer: None,
            payees: BTreeMap::new(),
            meeting_points: BTreeMap::new(),
            searches: BTreeMap::new(),
            timeouts: Vec::new(),
        }
    }

    // ---- timeout queue ----

    pub fn insert_timeout(&mut self, entry: TimeoutEntry) {
        let at = self
            .timeouts
            .partition_point(|e| e.fire_at_ms <= entry.fire_at_ms);
        self.timeouts.insert(at, entry);
    }

    pub fn apply_filter(&mut self, filter: &TimeoutFilter) {
        self.timeouts.retain(|e| !filter.matches(&e.event));
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timeouts.first().map(|e| e.fire_at_ms)
    }

    /// Drains every entry due at `now_ms`, in deadline order.
    pub fn due_timeouts(&mut self, now_ms: u64) -> Vec<TimeoutEvent> {
        let due = self.timeouts.partition_point(|e| e.fire_at_ms <= now_ms);
        self.timeouts.drain(..due).map(|e| e.event).collect()
    }

    // ---- inspection ----

    /// Sum of spendable balances over all channels.
    pub fn balance(&self) -> u64 {
        self.links
            .values()
            .flat_map(|l| l.channels())
            .map(|c| c.engine().amount_local())
            .sum()
    }

    /// Whether no channel holds reservations or locks.
    pub fn in_flight_empty(&self) -> bool {
        self.links.values().all(|l| l.in_flight_empty())
    }

    /// Removes finished payment entities; the caller releases their
    /// conversations and writes the pay log.
    pub fn sweep_finished(&mut self) -> (Option<PayerLink>, Vec<PayeeLink>) {
        let payer = match &self.payer {
            Some(p) if p.state.is_terminal() => self.payer.take(),
            _ => None,
        };
        let finished: Vec<PayeeId> = self
            .payees
            .iter()
            .filter(|(_, p)| p.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        let payees = finished
            .iter()
            .filter_map(|id| self.payees.remove(id))
            .collect();
        (payer, payees)
    }

    // ---- message router ----

    pub fn handle(&mut self, msg: Message, now_ms: u64, cfg: &NodeConfig) -> Result<Vec<Effect>> {
        debug!(node = %self.name, kind = msg.kind_name(), "handling message");
        match msg {
            Message::Api(req) => self.handle_api(req, now_ms, cfg),
            Message::Inbound { from, packet } => self.handle_inbound(from, packet, now_ms, cfg),
            Message::Relay { origin, packet } => self.handle_relay(&origin, &packet, now_ms, cfg),
            Message::Timeout(event) => self.handle_timeout(event, now_ms, cfg),
            Message::ChainReturn(ret) => self.handle_chain_return(&ret),
            Message::RouteFailed { route } => self.handle_route_failed(route),
            Message::ConnClosed(endpoint) => self.handle_conn_closed(&endpoint),
        }
    }

    fn handle_api(&mut self, req: ApiRequest, now_ms: u64, cfg: &NodeConfig) -> Result<Vec<Effect>> {
        match req {
            ApiRequest::Request { amount, receipt } => {
                let mut offered: Vec<MeetingPointId> = self.meeting_points.keys().cloned().collect();
                for mp in &cfg.external_meeting_points {
                    if !offered.contains(mp) {
                        offered.push(mp.clone());
                    }
                }
                if offered.is_empty() {
                    return Err(NodeError::NoMeetingPoints);
                }
                let payee = PayeeLink::new(amount, receipt, offered);
                let url = format_pay_url(&NetAddress::new(&self.name), &payee.id);
                info!(payee = %payee.id, amount, "created payment request");
                let arm = payee.arm_timeout(now_ms, cfg);
                self.payees.insert(payee.id.clone(), payee);
                Ok(vec![arm, Effect::Return(ReturnValue::Url(url))])
            }
            ApiRequest::Pay { url, link } => {
                if self.payer.is_some() {
                    return Err(NodeError::PayerBusy);
                }
                if let Some(l) = &link {
                    if !self.links.contains_key(l) {
                        return Err(NodeError::UnknownLink(l.clone()));
                    }
                }
                let (address, payee) = hopnet_core::parse_pay_url(&url)?;
                info!(%address, %payee, "starting payment");
                let payer = PayerLink::new(payee.clone(), address.clone(), link);
                let arm = payer.arm_timeout(now_ms, cfg);
                self.payer = Some(payer);
                Ok(vec![
                    Effect::Open {
                        local: EndpointId::Payer,
                        remote: EndpointId::Payee(payee.clone()),
                        address,
                        hello: Packet::Pay { payee },
                    },
                    arm,
                    Effect::Return(ReturnValue::Ack),
                ])
            }
            ApiRequest::ConfirmPayment { agreement } => {
                let mut effects = self.payer_mut()?.on_confirm_api(agreement, now_ms, cfg)?;
                effects.push(Effect::Return(ReturnValue::Ack));
                Ok(effects)
            }
            ApiRequest::MakeLink { local, remote } => {
                if self.links.contains_key(&local) {
                    return Err(NodeError::LinkExists(local));
                }
                info!(link = %local, peer = %remote, "created link");
                self.links.insert(local.clone(), Link::new(local, remote));
                Ok(vec![Effect::Return(ReturnValue::Ack)])
            }
            ApiRequest::MakeMeetingPoint { name } => {
                if self.meeting_points.contains_key(&name) {
                    return Err(NodeError::MeetingPointExists(name));
                }
                info!(meeting_point = %name, "hosting meeting point");
                self.meeting_points.insert(name.clone(), MeetingPoint::new(name));
                Ok(vec![Effect::Return(ReturnValue::Ack)])
            }
            ApiRequest::Deposit { link, kind, amount } => {
                let mut effects = self.link_mut(&link)?.deposit_local(kind, amount);
                effects.push(Effect::Return(ReturnValue::Ack));
                Ok(effects)
            }
            ApiRequest::Withdraw { link, channel_index } => {
                let mut effects = self.link_mut(&link)?.begin_withdraw(channel_index)?;
                effects.push(Effect::Return(ReturnValue::Ack));
                Ok(effects)
            }
            ApiRequest::CloseChannel { link, channel_index } => {
                let mut effects = self.link_mut(&link)?.begin_close(channel_index)?;
                effects.push(Effect::Return(ReturnValue::Ack));
                Ok(effects)
            }
        }
    }

    fn handle_inbound(
        &mut self,
        from: EndpointId,
        packet: Packet,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        match from {
            EndpointId::Payer => self.payer_conversation(packet),
            EndpointId::Payee(id) => self.payee_conversation(&id, packet, now_ms, cfg),
            EndpointId::Link(l) => self.link_inbound(&l, packet, now_ms, cfg),
        }
    }

    /// Conversation traffic from the payee node for our payer.
    fn payer_conversation(&mut self, packet: Packet) -> Result<Vec<Effect>> {
        let Some(payer) = self.payer.as_mut() else {
            warn!(kind = packet.kind_name(), "conversation packet without payment in progress");
            return Ok(Vec::new());
        };
        match packet {
            Packet::Receipt(r) => payer.on_receipt(&r),
            Packet::Cancel { transaction } => {
                if payer.transaction.is_some_and(|t| t != transaction) {
                    warn!(%transaction, "cancel for a different transaction, ignoring");
                    return Ok(Vec::new());
                }
                payer.on_cancel()
            }
            Packet::HaveRoute(h) => {
                if h.payer_side || payer.transaction != Some(h.transaction) {
                    warn!(transaction = %h.transaction, "stray route confirmation, ignoring");
                    return Ok(Vec::new());
                }
                payer.on_have_route(false)
            }
            Packet::SettleCommit(s) => {
                if payer.transaction != Some(s.token.transaction_id()) {
                    warn!("stray settle confirmation, ignoring");
                    return Ok(Vec::new());
                }
                payer.on_settle_commit(&s.token)
            }
            other => Err(NodeError::UnknownDestination {
                from: EndpointId::Payer,
                what: other.kind_name(),
            }),
        }
    }

    /// Conversation traffic from the paying node for one of our payees.
    fn payee_conversation(
        &mut self,
        id: &PayeeId,
        packet: Packet,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        match packet {
            Packet::Pay { .. } => self.payee_mut(id)?.on_pay(now_ms, cfg),
            Packet::Confirm { transaction, meeting_point } => match self.payees.get_mut(id) {
                Some(p) => p.on_confirm(transaction, meeting_point, now_ms, cfg),
                None => {
                    warn!(payee = %id, "confirm for unknown payee, ignoring");
                    Ok(Vec::new())
                }
            },
            Packet::Cancel { transaction } => match self.payees.get_mut(id) {
                Some(p) if p.transaction == transaction => p.on_cancel(),
                Some(_) => {
                    warn!(payee = %id, "cancel for a different transaction, ignoring");
                    Ok(Vec::new())
                }
                None => {
                    debug!(payee = %id, "cancel for unknown payee, ignoring");
                    Ok(Vec::new())
                }
            },
            other => Err(NodeError::UnknownDestination {
                from: EndpointId::Payee(id.clone()),
                what: other.kind_name(),
            }),
        }
    }

    /// Fabric traffic over a link: incoming half on the arrival link,
    /// then continue to the next holder.
    fn link_inbound(
        &mut self,
        l: &LinkId,
        packet: Packet,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        let origin = RelayOrigin::Link(l.clone());
        match packet {
            Packet::Deposit { channel_index, kind } => {
                self.link_mut(l)?.on_peer_deposit(channel_index, kind)?;
                Ok(Vec::new())
            }
            Packet::Withdraw { channel_index } => {
                Ok(self.link_mut(l)?.on_peer_withdraw(channel_index)?)
            }
            Packet::ChannelMsg { channel_index, msg } => {
                Ok(self.link_mut(l)?.on_channel_msg(channel_index, &msg)?)
            }
            Packet::MakeRoute(m) => {
                let mut effects = self.link_mut(l)?.make_route_incoming(&m)?;
                effects.extend(self.deliver_make_route(&origin, &m)?);
                Ok(effects)
            }
            Packet::HaveRoute(h) => {
                let mut effects = self.link_mut(l)?.have_route_incoming(&h)?;
                effects.extend(self.on_have_route_fabric(&origin, &h, now_ms, cfg)?);
                Ok(effects)
            }
            Packet::HaveNoRoute(n) => {
                let mut effects = self.link_mut(l)?.have_no_route_incoming(&n)?;
                effects.extend(self.on_no_route(&origin, &n)?);
                Ok(effects)
            }
            Packet::CancelRoute(c) => {
                let route = c.route_id();
                let mut effects = self.link_mut(l)?.cancel_route_incoming(&route)?;
                effects.extend(self.on_cancel_route(&origin, &c)?);
                Ok(effects)
            }
            Packet::Lock(lk) => {
                let mut effects = self.link_mut(l)?.lock_incoming(&lk)?;
                effects.extend(self.continue_commit(&origin, &Packet::Lock(lk), now_ms, cfg)?);
                Ok(effects)
            }
            Packet::RequestCommit(r) => {
                self.continue_commit(&origin, &Packet::RequestCommit(r), now_ms, cfg)
            }
            Packet::SettleCommit(s) => {
                let route = s.route_id();
                let held;
                let mut effects;
                {
                    let link = self.link_mut(l)?;
                    held = link.holds_route(&route);
                    effects = link.settle_commit_incoming(&s, now_ms, cfg)?;
                }
                // A replay resolved nothing locally and is not passed on.
                if held {
                    effects.extend(self.continue_commit(
                        &origin,
                        &Packet::SettleCommit(s),
                        now_ms,
                        cfg,
                    )?);
                }
                Ok(effects)
            }
            Packet::SettleRollback(s) => {
                let route = s.route_id();
                let held;
                let mut effects;
                {
                    let link = self.link_mut(l)?;
                    held = link.holds_route(&route);
                    effects = link.settle_rollback_incoming(&s, now_ms, cfg)?;
                }
                if held {
                    effects.extend(self.continue_commit(
                        &origin,
                        &Packet::SettleRollback(s),
                        now_ms,
                        cfg,
                    )?);
                }
                Ok(effects)
            }
            other => Err(NodeError::UnknownDestination {
                from: EndpointId::Link(l.clone()),
                what: other.kind_name(),
            }),
        }
    }

    /// A relay packet from a local entity: only the outgoing half runs.
    fn handle_relay(
        &mut self,
        origin: &RelayOrigin,
        packet: &Packet,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        match packet {
            Packet::MakeRoute(m) => self.deliver_make_route(origin, m),
            Packet::HaveRoute(h) => self.on_have_route_fabric(origin, h, now_ms, cfg),
            Packet::HaveNoRoute(n) => self.on_no_route(origin, n),
            Packet::CancelRoute(c) => self.on_cancel_route(origin, c),
            Packet::Lock(_)
            | Packet::RequestCommit(_)
            | Packet::SettleCommit(_)
            | Packet::SettleRollback(_) => self.continue_commit(origin, packet, now_ms, cfg),
            other => Err(NodeError::unexpected(
                format!("relay of {}", other.kind_name()),
                "router",
            )),
        }
    }

    /// Delivers a route extension: to the meeting point when it lives
    /// here, otherwise into a search over our links.
    fn deliver_make_route(
        &mut self,
        origin: &RelayOrigin,
        m: &hopnet_core::MakeRoute,
    ) -> Result<Vec<Effect>> {
        if let Some(mp) = self.meeting_points.get_mut(&m.meeting_point) {
            return Ok(mp.on_make_route(m)?);
        }
        let search_origin = match origin {
            RelayOrigin::Payer => SearchOrigin::Payer,
            RelayOrigin::Payee(id) => SearchOrigin::Payee(id.clone()),
            RelayOrigin::Link(l) => SearchOrigin::Link(l.clone()),
            RelayOrigin::MeetingPoint(_) => {
                return Err(NodeError::unexpected("make_route from meeting point", "router"))
            }
        };
        let candidates = self.route_candidates(&search_origin);
        let search = RouteSearch::new(search_origin, m.clone(), candidates);
        self.advance_search(m.route_id(), search)
    }

    /// Candidate links for a search, in link name order. The payer may
    /// pin routing to one link; a link origin never routes back on
    /// itself.
    fn route_candidates(&self, origin: &SearchOrigin) -> Vec<LinkId> {
        if let SearchOrigin::Payer = origin {
            if let Some(ctx) = self.payer.as_ref().and_then(|p| p.routing_context.clone()) {
                return vec![ctx];
            }
        }
        let arrival = match origin {
            SearchOrigin::Link(l) => Some(l),
            _ => None,
        };
        self.links
            .keys()
            .filter(|k| arrival != Some(k))
            .cloned()
            .collect()
    }

    /// Tries the search's remaining candidates until one reserves; an
    /// exhausted search reports no route to whoever started it.
    fn advance_search(&mut self, route: RouteId, mut search: RouteSearch) -> Result<Vec<Effect>> {
        loop {
            let Some(candidate) = search.next_candidate() else {
                info!(%route, "route search exhausted");
                return self.report_no_route(search.origin, route);
            };
            let Some(link) = self.links.get_mut(&candidate) else {
                warn!(link = %candidate, "search candidate disappeared, skipping");
                continue;
            };
            if let Some(effects) = link.make_route_outgoing(&search.request)? {
                self.searches.insert(route, search);
                return Ok(effects);
            }
        }
    }

    /// Tells a search's origin that no route could be found.
    fn report_no_route(&mut self, origin: SearchOrigin, route: RouteId) -> Result<Vec<Effect>> {
        match origin {
            SearchOrigin::Payer => match self.payer.as_mut() {
                Some(p) if !p.state.is_terminal() => p.on_have_no_route(),
                _ => {
                    debug!(%route, "no payer left to tell about the failed search");
                    Ok(Vec::new())
                }
            },
            SearchOrigin::Payee(id) => match self.payees.get_mut(&id) {
                Some(p) if !p.state.is_terminal() => p.on_have_no_route(),
                _ => {
                    debug!(%route, payee = %id, "no payee left to tell about the failed search");
                    Ok(Vec::new())
                }
            },
            SearchOrigin::Link(l) => Ok(self.link_mut(&l)?.have_no_route_outgoing(&HaveNoRoute {
                transaction: route.transaction,
                payer_side: route.payer_side,
            })?),
        }
    }

    /// A route confirmation moving towards the route's origin.
    fn on_have_route_fabric(
        &mut self,
        origin: &RelayOrigin,
        h: &HaveRoute,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        let route = h.route_id();
        // The search is over; later failures are route failures, not
        // search resumptions.
        self.searches.remove(&route);
        match self.next_holder(&route, origin) {
            Some(Holder::Link(l)) => Ok(self.link_mut(&l)?.have_route_outgoing(h)?),
            Some(Holder::Payer) => self.payer_mut()?.on_have_route(h.payer_side),
            Some(Holder::Payee(id)) => self.payee_mut(&id)?.on_have_route(h, now_ms, cfg),
            Some(Holder::MeetingPoint(id)) => {
                warn!(%route, meeting_point = %id, "route confirmation has nowhere to go");
                Ok(Vec::new())
            }
            None => {
                warn!(%route, "route confirmation for a vanished route, ignoring");
                Ok(Vec::new())
            }
        }
    }

    /// A negative routing outcome: resume our search if one is open,
    /// otherwise pass the bad news towards the origin.
    fn on_no_route(&mut self, origin: &RelayOrigin, n: &HaveNoRoute) -> Result<Vec<Effect>> {
        let route = n.route_id();
        if let Some(search) = self.searches.remove(&route) {
            return self.advance_search(route, search);
        }
        match self.next_holder(&route, origin) {
            Some(Holder::Link(l)) => Ok(self.link_mut(&l)?.have_no_route_outgoing(n)?),
            Some(Holder::Payer) => match self.payer.as_mut() {
                Some(p) if !p.state.is_terminal() => p.on_have_no_route(),
                _ => Ok(Vec::new()),
            },
            Some(Holder::Payee(id)) => match self.payees.get_mut(&id) {
                Some(p) if !p.state.is_terminal() => p.on_have_no_route(),
                _ => Ok(Vec::new()),
            },
            Some(Holder::MeetingPoint(_)) | None => {
                debug!(%route, "no one is waiting for this no-route report");
                Ok(Vec::new())
            }
        }
    }

    /// A route teardown moving in the direction the route was built.
    fn on_cancel_route(&mut self, origin: &RelayOrigin, c: &CancelRoute) -> Result<Vec<Effect>> {
        let route = c.route_id();
        // Any open search dies with the cancel; the reservation its
        // current candidate holds is found below and released.
        self.searches.remove(&route);
        match self.next_holder(&route, origin) {
            Some(Holder::Link(l)) => Ok(self.link_mut(&l)?.cancel_route_outgoing(&route)?),
            Some(Holder::MeetingPoint(id)) => {
                if let Some(mp) = self.meeting_points.get_mut(&id) {
                    mp.drop_leg(&route);
                }
                Ok(Vec::new())
            }
            Some(Holder::Payer) | Some(Holder::Payee(_)) => {
                debug!(%route, "cancel reached the route's own end, ignoring");
                Ok(Vec::new())
            }
            None => {
                debug!(%route, "cancel for an already-released route");
                Ok(Vec::new())
            }
        }
    }

    /// Commit-phase packets: lock, commit request, settle, rollback.
    fn continue_commit(
        &mut self,
        origin: &RelayOrigin,
        packet: &Packet,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        let route = packet
            .route_id()
            .ok_or_else(|| NodeError::unexpected(packet.kind_name(), "commit phase"))?;
        match (self.next_holder(&route, origin), packet) {
            (Some(Holder::Link(l)), Packet::Lock(lk)) => {
                Ok(self.link_mut(&l)?.lock_outgoing(lk, now_ms, cfg)?)
            }
            (Some(Holder::Link(l)), Packet::RequestCommit(r)) => {
                Ok(self.link_mut(&l)?.request_commit_outgoing(r.token, r.payer_side))
            }
            (Some(Holder::Link(l)), Packet::SettleCommit(s)) => {
                Ok(self.link_mut(&l)?.settle_commit_outgoing(s, now_ms, cfg)?)
            }
            (Some(Holder::Link(l)), Packet::SettleRollback(s)) => {
                Ok(self.link_mut(&l)?.settle_rollback_outgoing(s, now_ms, cfg)?)
            }
            (Some(Holder::MeetingPoint(id)), _) => self.bridge_at(&id, packet),
            (Some(Holder::Payee(id)), Packet::Lock(lk)) => {
                self.payee_mut(&id)?.on_lock(lk, now_ms, cfg)
            }
            (Some(Holder::Payee(id)), Packet::SettleCommit(_)) => {
                self.payee_mut(&id)?.on_settle_commit()
            }
            (Some(Holder::Payee(id)), Packet::SettleRollback(_)) => {
                self.payee_mut(&id)?.on_settle_rollback()
            }
            (Some(Holder::Payer), Packet::RequestCommit(r)) => {
                self.payer_mut()?.on_request_commit(r.token, now_ms, cfg)
            }
            (Some(Holder::Payer), Packet::SettleRollback(_)) => {
                self.payer_mut()?.on_settle_rollback()
            }
            (Some(holder), _) => Err(NodeError::unexpected(
                packet.kind_name(),
                format!("{holder:?}"),
            )),
            // A settle can lose the race against a local timeout that
            // already resolved the route; both sides end up rolled
            // back, so dropping it is convergence, not loss.
            (None, Packet::SettleCommit(_) | Packet::SettleRollback(_)) => {
                debug!(%route, kind = packet.kind_name(), "settle for already-resolved route");
                Ok(Vec::new())
            }
            (None, _) => Err(NodeError::NoRouteHolder { route, what: packet.kind_name() }),
        }
    }

    fn bridge_at(&mut self, id: &MeetingPointId, packet: &Packet) -> Result<Vec<Effect>> {
        let Some(mp) = self.meeting_points.get_mut(id) else {
            warn!(meeting_point = %id, "bridge target disappeared");
            return Ok(Vec::new());
        };
        match mp.bridge(packet) {
            Some(effects) => Ok(effects),
            None => {
                debug!(meeting_point = %id, kind = packet.kind_name(), "nothing to bridge");
                Ok(Vec::new())
            }
        }
    }

    fn handle_timeout(
        &mut self,
        event: TimeoutEvent,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        match event {
            TimeoutEvent::Payer { armed_in } => match self.payer.as_mut() {
                Some(p) => p.on_timeout(armed_in),
                None => {
                    debug!("payer timeout without payer, ignoring");
                    Ok(Vec::new())
                }
            },
            TimeoutEvent::Payee { payee, armed_in } => match self.payees.get_mut(&payee) {
                Some(p) => p.on_timeout(armed_in),
                None => {
                    debug!(%payee, "payee timeout without payee, ignoring");
                    Ok(Vec::new())
                }
            },
            TimeoutEvent::LinkCommit { link, transaction, payer_side } => {
                match self.links.get_mut(&link) {
                    Some(l) => Ok(l.do_commit_timeout(transaction, payer_side, now_ms, cfg)),
                    None => {
                        warn!(%link, "commit deadline for unknown link");
                        Ok(Vec::new())
                    }
                }
            }
            TimeoutEvent::RouteExpiry { link, route } => match self.links.get_mut(&link) {
                Some(l) => Ok(l.on_route_expiry(&route)),
                None => {
                    warn!(%link, "route expiry for unknown link");
                    Ok(Vec::new())
                }
            },
        }
    }

    fn handle_chain_return(&mut self, ret: &ChainReturn) -> Result<Vec<Effect>> {
        Ok(self
            .link_mut(&ret.link)?
            .on_chain_return(ret.channel_index, &ret.value)?)
    }

    /// A route died locally; every local holder gives up on it. Other
    /// links' hops of the same payment recover through their own
    /// deadlines.
    fn handle_route_failed(&mut self, route: RouteId) -> Result<Vec<Effect>> {
        let mut effects = Vec::new();
        if let Some(search) = self.searches.remove(&route) {
            effects.extend(self.report_no_route(search.origin, route)?);
        }
        for mp in self.meeting_points.values_mut() {
            mp.drop_leg(&route);
        }
        if route.payer_side {
            if let Some(p) = self.payer.as_mut() {
                if p.transaction == Some(route.transaction) {
                    effects.extend(p.on_route_failed()?);
                }
            }
        } else if let Some(p) = self
            .payees
            .values_mut()
            .find(|p| p.transaction == route.transaction)
        {
            effects.extend(p.on_route_failed()?);
        }
        Ok(effects)
    }

    fn handle_conn_closed(&mut self, endpoint: &EndpointId) -> Result<Vec<Effect>> {
        match endpoint {
            EndpointId::Payer => match self.payer.as_mut() {
                Some(p) => p.on_conn_closed(),
                None => Ok(Vec::new()),
            },
            EndpointId::Payee(id) => match self.payees.get_mut(id) {
                Some(p) => p.on_conn_closed(),
                None => Ok(Vec::new()),
            },
            EndpointId::Link(l) => {
                // Channels are durable; in-flight routes recover
                // through their deadlines when the peer stays gone.
                warn!(link = %l, "link conversation lost");
                Ok(Vec::new())
            }
        }
    }

    /// Resolves the next holder of a route, excluding the entity the
    /// packet came from. Links are tried in name order, then meeting
    /// points, then the payment ends.
    fn next_holder(&self, route: &RouteId, exclude: &RelayOrigin) -> Option<Holder> {
        for (id, link) in &self.links {
            if matches!(exclude, RelayOrigin::Link(l) if l == id) {
                continue;
            }
            if link.holds_route(route) {
                return Some(Holder::Link(id.clone()));
            }
        }
        for (id, mp) in &self.meeting_points {
            if matches!(exclude, RelayOrigin::MeetingPoint(m) if m == id) {
                continue;
            }
            if mp.holds(&route.transaction) {
                return Some(Holder::MeetingPoint(id.clone()));
            }
        }
        if route.payer_side && !matches!(exclude, RelayOrigin::Payer) {
            if let Some(p) = &self.payer {
                if p.transaction == Some(route.transaction) && !p.state.is_terminal() {
                    return Some(Holder::Payer);
                }
            }
        }
        if !route.payer_side {
            for (id, p) in &self.payees {
                if matches!(exclude, RelayOrigin::Payee(e) if e == id) {
                    continue;
                }
                if p.transaction == route.transaction && !p.state.is_terminal() {
                    return Some(Holder::Payee(id.clone()));
                }
            }
        }
        None
    }

    fn link_mut(&mut self, id: &LinkId) -> Result<&mut Link> {
        self.links
            .get_mut(id)
            .ok_or_else(|| NodeError::UnknownLink(id.clone()))
    }

    fn payee_mut(&mut self, id: &PayeeId) -> Result<&mut PayeeLink> {
        self.payees
            .get_mut(id)
            .ok_or_else(|| NodeError::UnknownPayee(id.clone()))
    }

    fn payer_mut(&mut self) -> Result<&mut PayerLink> {
        self.payer.as_mut().ok_or(NodeError::NoPayer)
    }
}
