//! The payee entity: one incoming payment request.
//!
//! Created by the local request API before any peer shows up; the
//! paying node connects later with the payee id from the payment URL.
//! The payee owns the commit token, so its transaction id is fixed at
//! creation. Unlike the payer, every transition re-arms the payment
//! timeout: an abandoned payee must always age out of the node.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hopnet_core::{
    Amount, CancelRoute, Effect, EndpointId, HaveRoute, Lock, MakeRoute, MeetingPointId, Message,
    NodeConfig, Packet, PayeeId, PayeeState, Receipt, RelayOrigin, RequestCommit, SettleCommit,
    TimeoutEntry, TimeoutEvent, TimeoutFilter, Token, TransactionId,
};

use crate::error::{NodeError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayeeLink {
    pub id: PayeeId,
    pub state: PayeeState,
    pub amount: Amount,
    pub receipt: String,
    /// Commit token, generated here and revealed through the fabric.
    pub token: Token,
    pub transaction: TransactionId,
    /// Meeting points offered in the receipt.
    pub meeting_points: Vec<MeetingPointId>,
    /// The one the payer picked.
    pub meeting_point: Option<MeetingPointId>,
    /// Whether the payment conversation is currently up.
    pub connected: bool,
}

impl PayeeLink {
    pub fn new(amount: Amount, receipt: String, meeting_points: Vec<MeetingPointId>) -> Self {
        let token = Token::generate();
        let transaction = token.transaction_id();
        PayeeLink {
            id: PayeeId::generate(),
            state: PayeeState::Initial,
            amount,
            receipt,
            token,
            transaction,
            meeting_points,
            meeting_point: None,
            connected: false,
        }
    }

    fn endpoint(&self) -> EndpointId {
        EndpointId::Payee(self.id.clone())
    }

    /// Arms the payment timeout for the current state.
    pub fn arm_timeout(&self, now_ms: u64, cfg: &NodeConfig) -> Effect {
        Effect::Schedule(TimeoutEntry::new(
            now_ms + cfg.payee_timeout_ms,
            TimeoutEvent::Payee { payee: self.id.clone(), armed_in: self.state },
        ))
    }

    fn transition(&mut self, to: PayeeState) {
        debug!(payee = %self.id, from = %self.state, %to, "payee transition");
        self.state = to;
    }

    fn cancel(&mut self, send_cancel: bool, cancel_route: bool) -> Vec<Effect> {
        self.transition(PayeeState::Cancelled);
        let mut effects = vec![Effect::Filter(TimeoutFilter::Payee { payee: self.id.clone() })];
        if send_cancel && self.connected {
            effects.push(Effect::Send {
                to: self.endpoint(),
                packet: Packet::Cancel { transaction: self.transaction },
            });
        }
        if cancel_route {
            effects.push(Effect::Process(Message::Relay {
                origin: RelayOrigin::Payee(self.id.clone()),
                packet: Packet::CancelRoute(CancelRoute {
                    transaction: self.transaction,
                    payer_side: false,
                }),
            }));
        }
        effects
    }

    /// The paying node opened the conversation.
    pub fn on_pay(&mut self, now_ms: u64, cfg: &NodeConfig) -> Result<Vec<Effect>> {
        if self.state != PayeeState::Initial {
            return Err(NodeError::unexpected("pay", self.state));
        }
        self.connected = true;
        self.transition(PayeeState::SentReceipt);
        Ok(vec![
            Effect::Send {
                to: self.endpoint(),
                packet: Packet::Receipt(Receipt {
                    amount: self.amount,
                    receipt: self.receipt.clone(),
                    transaction: self.transaction,
                    meeting_points: self.meeting_points.clone(),
                }),
            },
            self.arm_timeout(now_ms, cfg),
        ])
    }

    /// The payer agreed to the receipt and picked a meeting point.
    pub fn on_confirm(
        &mut self,
        transaction: TransactionId,
        meeting_point: MeetingPointId,
        now_ms: u64,
        cfg: &NodeConfig,
    ) -> Result<Vec<Effect>> {
        if self.state != PayeeState::SentReceipt {
            return Err(NodeError::unexpected("confirm", self.state));
        }
        if transaction != self.transaction {
            return Err(NodeError::unexpected("confirm for wrong transaction", self.state));
        }
        if !self.meeting_points.contains(&meeting_point) {
            return Err(NodeError::unexpected("confirm with unoffered meeting point", self.state));
        }
        self.meeting_point = Some(meeting_point.clone());
        self.transition(PayeeState::Confirmed);
        info!(payee = %self.id, %meeting_point, "payment confirmed, requesting route");
        Ok(vec![
            Effect::Process(Message::Relay {
                origin: RelayOrigin::Payee(self.id.clone()),
                packet: Packet::MakeRoute(MakeRoute {
                    transaction: self.transaction,
                    payer_side: false,
                    amount: self.amount,
                    start_ms: now_ms,
                    end_ms: now_ms + cfg.route_window_ms,
                    meeting_point,
                    channel_index: None,
                }),
            }),
            self.arm_timeout(now_ms, cfg),
        ])
    }

    /// Our half-route reached the meeting point. Pass the agreed
    /// window on to the payer over the conversation.
    pub fn on_have_route(&mut self, h: &HaveRoute, now_ms: u64, cfg: &NodeConfig) -> Result<Vec<Effect>> {
        if self.state != PayeeState::Confirmed {
            return Err(NodeError::unexpected("have_route", self.state));
        }
        self.transition(PayeeState::HasRoute);
        Ok(vec![
            Effect::Send {
                to: self.endpoint(),
                packet: Packet::HaveRoute(HaveRoute {
                    transaction: self.transaction,
                    payer_side: false,
                    start_ms: h.start_ms,
                    end_ms: h.end_ms,
                }),
            },
            self.arm_timeout(now_ms, cfg),
        ])
    }

    /// Our half-route could not be found.
    pub fn on_have_no_route(&mut self) -> Result<Vec<Effect>> {
        if self.state != PayeeState::Confirmed {
            return Err(NodeError::unexpected("have_no_route", self.state));
        }
        info!(payee = %self.id, "no payee-side route found, cancelling");
        Ok(self.cancel(true, false))
    }

    /// The lock reached us through the fabric: the whole route holds
    /// funds. Reveal the token to start the commit.
    pub fn on_lock(&mut self, _l: &Lock, now_ms: u64, cfg: &NodeConfig) -> Result<Vec<Effect>> {
        if self.state != PayeeState::HasRoute {
            return Err(NodeError::unexpected("lock", self.state));
        }
        self.transition(PayeeState::SentRequestCommit);
        info!(payee = %self.id, "route locked, revealing commit token");
        Ok(vec![
            Effect::Process(Message::Relay {
                origin: RelayOrigin::Payee(self.id.clone()),
                packet: Packet::RequestCommit(RequestCommit {
                    token: self.token,
                    payer_side: false,
                }),
            }),
            self.arm_timeout(now_ms, cfg),
        ])
    }

    /// The settle cascade reached our hop: we were paid. Confirm to
    /// the payer over the conversation.
    pub fn on_settle_commit(&mut self) -> Result<Vec<Effect>> {
        if self.state != PayeeState::SentRequestCommit {
            return Err(NodeError::unexpected("settle_commit", self.state));
        }
        self.transition(PayeeState::Committed);
        info!(payee = %self.id, amount = self.amount, "payment received");
        let mut effects = vec![Effect::Filter(TimeoutFilter::Payee { payee: self.id.clone() })];
        if self.connected {
            effects.push(Effect::Send {
                to: self.endpoint(),
                packet: Packet::SettleCommit(SettleCommit { token: self.token, payer_side: false }),
            });
        }
        Ok(effects)
    }

    /// The fabric rolled our hop back. Before the lock this happens
    /// when an upstream hop hit its commit deadline while our side was
    /// still only reserved.
    pub fn on_settle_rollback(&mut self) -> Result<Vec<Effect>> {
        match self.state {
            PayeeState::Confirmed | PayeeState::HasRoute | PayeeState::SentRequestCommit => {
                warn!(payee = %self.id, state = %self.state, "payment rolled back");
                Ok(self.cancel(true, false))
            }
            PayeeState::Committed | PayeeState::Cancelled => {
                debug!(payee = %self.id, "rollback for finished payment ignored");
                Ok(Vec::new())
            }
            _ => Err(NodeError::unexpected("settle_rollback", self.state)),
        }
    }

    /// The payer abandoned the payment over the conversation.
    pub fn on_cancel(&mut self) -> Result<Vec<Effect>> {
        match self.state {
            PayeeState::Initial | PayeeState::SentReceipt => Ok(self.cancel(false, false)),
            PayeeState::Confirmed | PayeeState::HasRoute => Ok(self.cancel(false, true)),
            PayeeState::SentRequestCommit => {
                warn!(payee = %self.id, "cancel after lock ignored");
                Ok(Vec::new())
            }
            _ => {
                debug!(payee = %self.id, "cancel for finished payment ignored");
                Ok(Vec::new())
            }
        }
    }

    /// The route this payment depends on failed locally.
    pub fn on_route_failed(&mut self) -> Result<Vec<Effect>> {
        match self.state {
            PayeeState::Confirmed | PayeeState::HasRoute | PayeeState::SentRequestCommit => {
                warn!(payee = %self.id, "payee route failed, cancelling");
                Ok(self.cancel(true, false))
            }
            _ => Ok(Vec::new()),
        }
    }

    /// A payee timeout fired. Only the state it was armed in counts.
    pub fn on_timeout(&mut self, armed_in: PayeeState) -> Result<Vec<Effect>> {
        if armed_in != self.state {
            debug!(payee = %self.id, %armed_in, current = %self.state, "stale payee timeout ignored");
            return Ok(Vec::new());
        }
        match self.state {
            PayeeState::Initial | PayeeState::SentReceipt => {
                info!(payee = %self.id, "payment request timed out");
                Ok(self.cancel(true, false))
            }
            PayeeState::Confirmed | PayeeState::HasRoute => {
                info!(payee = %self.id, "payment timed out before lock");
                Ok(self.cancel(true, true))
            }
            // The token is out: assume the cascade ran and our settle
            // got lost. Mirrors the payer's forced commit.
            PayeeState::SentRequestCommit => {
                warn!(payee = %self.id, "settle missing after commit request, forcing commit");
                self.transition(PayeeState::Committed);
                let mut effects =
                    vec![Effect::Filter(TimeoutFilter::Payee { payee: self.id.clone() })];
                if self.connected {
                    effects.push(Effect::Send {
                        to: self.endpoint(),
                        packet: Packet::SettleCommit(SettleCommit {
                            token: self.token,
                            payer_side: false,
                        }),
                    });
                }
                Ok(effects)
            }
            state => {
                debug!(payee = %self.id, %state, "payee timeout in terminal state ignored");
                Ok(Vec::new())
            }
        }
    }

    /// The payment conversation dropped.
    pub fn on_conn_closed(&mut self) -> Result<Vec<Effect>> {
        self.connected = false;
        match self.state {
            PayeeState::Initial | PayeeState::SentReceipt => Ok(self.cancel(false, false)),
            PayeeState::Confirmed | PayeeState::HasRoute => {
                warn!(payee = %self.id, "payment conversation lost before lock, cancelling");
                Ok(self.cancel(false, true))
            }
            _ => {
                debug!(payee = %self.id, state = %self.state, "payment conversation lost");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> NodeConfig {
        NodeConfig::default()
    }

    fn mp() -> MeetingPointId {
        MeetingPointId::new("mp4").unwrap()
    }

    fn make_payee() -> PayeeLink {
        PayeeLink::new(123, "invoice-1".to_owned(), vec![mp()])
    }

    /// Payee walked to the point where the token went out.
    fn committed_request() -> PayeeLink {
        let mut payee = make_payee();
        payee.on_pay(0, &cfg()).unwrap();
        payee.on_confirm(payee.transaction, mp(), 0, &cfg()).unwrap();
        let window = HaveRoute { transaction: payee.transaction, payer_side: false, start_ms: 0, end_ms: 60_000 };
        payee.on_have_route(&window, 0, &cfg()).unwrap();
        let lock = Lock { transaction: payee.transaction, payer_side: false, amount: 123 };
        payee.on_lock(&lock, 0, &cfg()).unwrap();
        assert_eq!(payee.state, PayeeState::SentRequestCommit);
        payee
    }

    #[test]
    fn test_pay_sends_receipt_and_rearms() {
        let mut payee = make_payee();
        let effects = payee.on_pay(100, &cfg()).unwrap();
        assert_eq!(payee.state, PayeeState::SentReceipt);
        assert!(payee.connected);
        match &effects[0] {
            Effect::Send { packet: Packet::Receipt(r), .. } => {
                assert_eq!(r.amount, 123);
                assert_eq!(r.transaction, payee.transaction);
                assert_eq!(r.meeting_points, vec![mp()]);
            }
            other => panic!("expected receipt, got {other:?}"),
        }
        assert!(matches!(&effects[1], Effect::Schedule(_)));
    }

    #[test]
    fn test_confirm_requests_payee_side_route() {
        let mut payee = make_payee();
        payee.on_pay(0, &cfg()).unwrap();
        let effects = payee.on_confirm(payee.transaction, mp(), 500, &cfg()).unwrap();
        assert_eq!(payee.state, PayeeState::Confirmed);
        match &effects[0] {
            Effect::Process(Message::Relay { origin: RelayOrigin::Payee(_), packet: Packet::MakeRoute(m) }) => {
                assert!(!m.payer_side);
                assert_eq!(m.amount, 123);
                assert_eq!(m.start_ms, 500);
            }
            other => panic!("expected MakeRoute relay, got {other:?}"),
        }
    }

    #[test]
    fn test_confirm_with_unoffered_meeting_point_is_rejected() {
        let mut payee = make_payee();
        payee.on_pay(0, &cfg()).unwrap();
        let other = MeetingPointId::new("elsewhere").unwrap();
        assert!(payee.on_confirm(payee.transaction, other, 0, &cfg()).is_err());
        assert_eq!(payee.state, PayeeState::SentReceipt);
    }

    #[test]
    fn test_have_route_forwards_window_to_payer() {
        let mut payee = make_payee();
        payee.on_pay(0, &cfg()).unwrap();
        payee.on_confirm(payee.transaction, mp(), 0, &cfg()).unwrap();
        let window = HaveRoute { transaction: payee.transaction, payer_side: false, start_ms: 10, end_ms: 900 };
        let effects = payee.on_have_route(&window, 0, &cfg()).unwrap();
        assert_eq!(payee.state, PayeeState::HasRoute);
        match &effects[0] {
            Effect::Send { packet: Packet::HaveRoute(h), .. } => {
                assert!(!h.payer_side);
                assert_eq!((h.start_ms, h.end_ms), (10, 900));
            }
            other => panic!("expected HaveRoute send, got {other:?}"),
        }
    }

    #[test]
    fn test_lock_reveals_token() {
        let payee = committed_request();
        assert_eq!(payee.state, PayeeState::SentRequestCommit);
    }

    #[test]
    fn test_settle_commit_confirms_over_conversation() {
        let mut payee = committed_request();
        let effects = payee.on_settle_commit().unwrap();
        assert_eq!(payee.state, PayeeState::Committed);
        assert_eq!(effects.len(), 2);
        assert!(matches!(&effects[0], Effect::Filter(TimeoutFilter::Payee { .. })));
        match &effects[1] {
            Effect::Send { packet: Packet::SettleCommit(s), .. } => {
                assert_eq!(s.token, payee.token);
            }
            other => panic!("expected SettleCommit send, got {other:?}"),
        }
    }

    #[test]
    fn test_rollback_after_token_cancels() {
        let mut payee = committed_request();
        let effects = payee.on_settle_rollback().unwrap();
        assert_eq!(payee.state, PayeeState::Cancelled);
        assert!(matches!(&effects[1], Effect::Send { packet: Packet::Cancel { .. }, .. }));
    }

    #[test]
    fn test_timeout_before_lock_cancels_with_route_teardown() {
        let mut payee = make_payee();
        payee.on_pay(0, &cfg()).unwrap();
        payee.on_confirm(payee.transaction, mp(), 0, &cfg()).unwrap();
        let effects = payee.on_timeout(PayeeState::Confirmed).unwrap();
        assert_eq!(payee.state, PayeeState::Cancelled);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Process(Message::Relay { packet: Packet::CancelRoute(_), .. })
        )));
    }

    #[test]
    fn test_timeout_after_token_forces_commit() {
        let mut payee = committed_request();
        let effects = payee.on_timeout(PayeeState::SentRequestCommit).unwrap();
        assert_eq!(payee.state, PayeeState::Committed);
        assert!(effects.iter().any(|e| matches!(e, Effect::Send { packet: Packet::SettleCommit(_), .. })));
    }

    #[test]
    fn test_stale_timeout_is_ignored() {
        let mut payee = make_payee();
        payee.on_pay(0, &cfg()).unwrap();
        let effects = payee.on_timeout(PayeeState::Initial).unwrap();
        assert!(effects.is_empty());
        assert_eq!(payee.state, PayeeState::SentReceipt);
    }

    #[test]
    fn test_conn_loss_after_token_is_tolerated() {
        let mut payee = committed_request();
        assert!(payee.on_conn_closed().unwrap().is_empty());
        assert_eq!(payee.state, PayeeState::SentRequestCommit);
        assert!(!payee.connected);
        // The forced commit then goes nowhere over the conversation.
        let effects = payee.on_timeout(PayeeState::SentRequestCommit).unwrap();
        assert!(!effects.iter().any(|e| matches!(e, Effect::Send { .. })));
    }

    #[test]
    fn test_cancel_before_confirm_is_quiet() {
        let mut payee = make_payee();
        payee.on_pay(0, &cfg()).unwrap();
        let effects = payee.on_cancel().unwrap();
        assert_eq!(payee.state, PayeeState::Cancelled);
        // No Cancel back over the conversation the payer just used.
        assert!(!effects.iter().any(|e| matches!(e, Effect::Send { .. })));
    }
}
