//! The payer entity: one outgoing payment in progress.
//!
//! Drives the payment conversation with the payee node and its own
//! payer-side half-route. Timeouts carry the state they were armed in;
//! a fire after a transition is stale and ignored. The one deliberate
//! asymmetry lives here: once the commit token is in hand, a timeout
//! forces the payment to committed, never to cancelled, because the
//! funds may already be moving.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hopnet_core::{
    Amount, CancelRoute, Effect, EndpointId, LinkId, Lock, MakeRoute, MeetingPointId, Message,
    NetAddress, NodeConfig, NodeEvent, Packet, PayFinalState, PayeeId, PayerState, Receipt,
    RelayOrigin, SettleCommit, TimeoutEntry, TimeoutEvent, TimeoutFilter, Token, TransactionId,
};

use crate::error::{NodeError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayerLink {
    pub state: PayerState,
    /// The payee this payment targets.
    pub payee: PayeeId,
    /// Transport address of the payee's node.
    pub address: NetAddress,
    /// Restricts the route search to one link when set.
    pub routing_context: Option<LinkId>,
    pub amount: Amount,
    pub receipt: Option<String>,
    pub transaction: Option<TransactionId>,
    pub token: Option<Token>,
    pub meeting_point: Option<MeetingPointId>,
}

impl PayerLink {
    pub fn new(payee: PayeeId, address: NetAddress, routing_context: Option<LinkId>) -> Self {
        PayerLink {
            state: PayerState::Initial,
            payee,
            address,
            routing_context,
            amount: 0,
            receipt: None,
            transaction: None,
            token: None,
            meeting_point: None,
        }
    }

    /// Arms the payment timeout for the current state.
    pub fn arm_timeout(&self, now_ms: u64, cfg: &NodeConfig) -> Effect {
        Effect::Schedule(TimeoutEntry::new(
            now_ms + cfg.payer_timeout_ms,
            TimeoutEvent::Payer { armed_in: self.state },
        ))
    }

    fn transition(&mut self, to: PayerState) {
        debug!(from = %self.state, %to, "payer transition");
        self.state = to;
    }

    /// Cancels the payment. `send_cancel` tells the payee over the
    /// payment conversation; `cancel_route` tears down our half-route.
    fn cancel(&mut self, send_cancel: bool, cancel_route: bool) -> Vec<Effect> {
        self.transition(PayerState::Cancelled);
        let mut effects = vec![Effect::Filter(TimeoutFilter::PayerAll)];
        if let Some(transaction) = self.transaction {
            if send_cancel {
                effects.push(Effect::Send {
                    to: EndpointId::Payer,
                    packet: Packet::Cancel { transaction },
                });
            }
            if cancel_route {
                effects.push(Effect::Process(Message::Relay {
                    origin: RelayOrigin::Payer,
                    packet: Packet::CancelRoute(CancelRoute { transaction, payer_side: true }),
                }));
            }
        }
        effects.push(Effect::Notify(NodeEvent::PaymentFinished {
            state: PayFinalState::Cancelled,
        }));
        effects
    }

    /// Whether a half-route has been requested and not yet settled.
    fn route_requested(&self) -> bool {
        matches!(
            self.state,
            PayerState::Confirmed
                | PayerState::HasPayerRoute
                | PayerState::HasPayeeRoute
                | PayerState::Locked
        )
    }

    /// The payee's receipt arrived over the payment conversation.
    pub fn on_receipt(&mut self, r: &Receipt) -> Result<Vec<Effect>> {
        if self.state != PayerState::Initial {
            return Err(NodeError::unexpected("receipt", self.state));
        }
        let meeting_point = r
            .meeting_points
            .first()
            .cloned()
            .ok_or_else(|| NodeError::unexpected("receipt without meeting points", self.state))?;
        self.amount = r.amount;
        self.receipt = Some(r.receipt.clone());
        self.transaction = Some(r.transaction);
        self.meeting_point = Some(meeting_point);
        self.transition(PayerState::HasReceipt);
        Ok(vec![Effect::Notify(NodeEvent::ReceiptReceived {
            amount: r.amount,
            receipt: r.receipt.clone(),
        })])
    }

    /// The local caller confirmed or refused the receipt.
    pub fn on_confirm_api(&mut self, agreement: bool, now_ms: u64, cfg: &NodeConfig) -> Result<Vec<Effect>> {
        if self.state != PayerState::HasReceipt {
            return Err(NodeError::unexpected("confirm", self.state));
        }
        if !agreement {
            info!("payment refused by caller");
            return Ok(self.cancel(true, false));
        }
        let transaction = self.require_transaction()?;
        let meeting_point = self
            .meeting_point
            .clone()
            .ok_or_else(|| NodeError::unexpected("confirm without meeting point", self.state))?;
        self.transition(PayerState::Confirmed);
        Ok(vec![
            Effect::Send {
                to: EndpointId::Payer,
                packet: Packet::Confirm { transaction, meeting_point: meeting_point.clone() },
            },
            Effect::Process(Message::Relay {
                origin: RelayOrigin::Payer,
                packet: Packet::MakeRoute(MakeRoute {
                    transaction,
                    payer_side: true,
                    amount: self.amount,
                    start_ms: now_ms,
                    end_ms: now_ms + cfg.route_window_ms,
                    meeting_point,
                    channel_index: None,
                }),
            }),
        ])
    }

    /// A half-route is established: ours from the fabric
    /// (payer side), the payee's relayed over the payment conversation
    /// (payee side). When both are in, lock.
    pub fn on_have_route(&mut self, payer_side: bool) -> Result<Vec<Effect>> {
        let to = match (self.state, payer_side) {
            (PayerState::Confirmed, true) => PayerState::HasPayerRoute,
            (PayerState::Confirmed, false) => PayerState::HasPayeeRoute,
            (PayerState::HasPayeeRoute, true) | (PayerState::HasPayerRoute, false) => {
                PayerState::Locked
            }
            _ => return Err(NodeError::unexpected("have_route", self.state)),
        };
        self.transition(to);
        if to != PayerState::Locked {
            return Ok(Vec::new());
        }
        let transaction = self.require_transaction()?;
        info!(%transaction, amount = self.amount, "both routes ready, locking");
        Ok(vec![Effect::Process(Message::Relay {
            origin: RelayOrigin::Payer,
            packet: Packet::Lock(Lock { transaction, payer_side: true, amount: self.amount }),
        })])
    }

    /// Our half-route could not be found.
    pub fn on_have_no_route(&mut self) -> Result<Vec<Effect>> {
        if !self.route_requested() || self.state == PayerState::Locked {
            return Err(NodeError::unexpected("have_no_route", self.state));
        }
        info!("no payer-side route found, cancelling payment");
        Ok(self.cancel(true, false))
    }

    /// The payee abandoned the payment over the conversation. Once
    /// funds are locked only settlement decides the outcome, so a late
    /// cancel is dropped rather than honoured.
    pub fn on_cancel(&mut self) -> Result<Vec<Effect>> {
        match self.state {
            PayerState::Initial | PayerState::HasReceipt => Ok(self.cancel(false, false)),
            PayerState::Confirmed | PayerState::HasPayerRoute | PayerState::HasPayeeRoute => {
                Ok(self.cancel(false, true))
            }
            PayerState::Locked | PayerState::ReceivedRequestCommit => {
                warn!(state = %self.state, "cancel after lock ignored");
                Ok(Vec::new())
            }
            _ => {
                debug!(state = %self.state, "cancel for finished payment ignored");
                Ok(Vec::new())
            }
        }
    }

    /// The commit token arrived through the fabric. Store it, arm the
    /// forced-commit deadline and start the settle cascade on our own
    /// hop.
    pub fn on_request_commit(&mut self, token: Token, now_ms: u64, cfg: &NodeConfig) -> Result<Vec<Effect>> {
        if self.state.is_terminal() {
            debug!(state = %self.state, "commit request for finished payment ignored");
            return Ok(Vec::new());
        }
        if self.state != PayerState::Locked {
            return Err(NodeError::unexpected("request_commit", self.state));
        }
        let transaction = self.require_transaction()?;
        if token.transaction_id() != transaction {
            return Err(NodeError::unexpected("commit token for wrong transaction", self.state));
        }
        self.token = Some(token);
        self.transition(PayerState::ReceivedRequestCommit);
        info!(%transaction, "commit token received, settling");
        Ok(vec![
            self.arm_timeout(now_ms, cfg),
            Effect::Process(Message::Relay {
                origin: RelayOrigin::Payer,
                packet: Packet::SettleCommit(SettleCommit { token, payer_side: true }),
            }),
        ])
    }

    /// The payee confirmed settlement over the payment conversation.
    pub fn on_settle_commit(&mut self, token: &Token) -> Result<Vec<Effect>> {
        if self.state != PayerState::ReceivedRequestCommit {
            return Err(NodeError::unexpected("settle_commit", self.state));
        }
        if Some(token.transaction_id()) != self.transaction {
            return Err(NodeError::unexpected("settle for wrong transaction", self.state));
        }
        self.transition(PayerState::Committed);
        info!("payment committed");
        Ok(vec![
            Effect::Filter(TimeoutFilter::PayerAll),
            Effect::Notify(NodeEvent::PaymentFinished { state: PayFinalState::Committed }),
        ])
    }

    /// Our own hop was rolled back before the token arrived. With the
    /// token already in hand the commit wins; the losing hops converge
    /// through their replay records.
    pub fn on_settle_rollback(&mut self) -> Result<Vec<Effect>> {
        match self.state {
            PayerState::Locked => {
                warn!("payment rolled back before commit");
                Ok(self.cancel(true, false))
            }
            PayerState::ReceivedRequestCommit => {
                warn!("rollback crossed the commit token, ignoring");
                Ok(Vec::new())
            }
            PayerState::Committed | PayerState::Cancelled => {
                debug!(state = %self.state, "rollback for finished payment ignored");
                Ok(Vec::new())
            }
            _ => Err(NodeError::unexpected("settle_rollback", self.state)),
        }
    }

    /// The route this payment depends on failed locally.
    pub fn on_route_failed(&mut self) -> Result<Vec<Effect>> {
        if !self.route_requested() {
            return Ok(Vec::new());
        }
        warn!("payer route failed, cancelling payment");
        Ok(self.cancel(true, false))
    }

    /// A payer timeout fired. Only the state it was armed in counts.
    pub fn on_timeout(&mut self, armed_in: PayerState) -> Result<Vec<Effect>> {
        if armed_in != self.state {
            debug!(%armed_in, current = %self.state, "stale payer timeout ignored");
            return Ok(Vec::new());
        }
        match self.state {
            PayerState::Initial => {
                info!("payment timed out waiting for receipt");
                Ok(self.cancel(false, false))
            }
            // The token is out: assume the cascade ran and our
            // confirmation got lost. Funds-wise this is the safe side.
            PayerState::ReceivedRequestCommit => {
                warn!("settle confirmation missing, forcing commit");
                self.transition(PayerState::Committed);
                Ok(vec![
                    Effect::Filter(TimeoutFilter::PayerAll),
                    Effect::Notify(NodeEvent::PaymentFinished { state: PayFinalState::Committed }),
                ])
            }
            state => {
                debug!(%state, "payer timeout in unarmed state ignored");
                Ok(Vec::new())
            }
        }
    }

    /// The payment conversation dropped.
    pub fn on_conn_closed(&mut self) -> Result<Vec<Effect>> {
        match self.state {
            PayerState::Initial | PayerState::HasReceipt => Ok(self.cancel(false, false)),
            PayerState::Confirmed | PayerState::HasPayerRoute | PayerState::HasPayeeRoute => {
                warn!("payment conversation lost before lock, cancelling");
                Ok(self.cancel(false, true))
            }
            // Once locked, settlement runs through the fabric; losing
            // the conversation does not decide the outcome.
            _ => {
                debug!(state = %self.state, "payment conversation lost, awaiting settlement");
                Ok(Vec::new())
            }
        }
    }

    fn require_transaction(&self) -> Result<TransactionId> {
        self.transaction
            .ok_or_else(|| NodeError::unexpected("operation before receipt", self.state))
    }
}
