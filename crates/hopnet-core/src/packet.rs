//! The wire catalogue: every packet a hopnet node sends or accepts.
//!
//! The catalogue is closed. Anything outside it is a protocol
//! violation and aborts the unit of work that tried to process it.

use serde::{Deserialize, Serialize};

use crate::types::{Amount, MeetingPointId, PayeeId, RouteId, Token, TransactionId};

/// Receipt sent by the payee over the payment conversation.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Receipt {
    pub amount: Amount,
    pub receipt: String,
    pub transaction: TransactionId,
    /// Meeting points at which the payee can rendezvous, in order of
    /// preference.
    pub meeting_points: Vec<MeetingPointId>,
}

/// Requests a half-route reservation towards a meeting point.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct MakeRoute {
    pub transaction: TransactionId,
    pub payer_side: bool,
    pub amount: Amount,
    pub start_ms: u64,
    pub end_ms: u64,
    pub meeting_point: MeetingPointId,
    /// Filled in by the sending link so the receiver reserves on the
    /// same channel. Absent until a link has picked a channel.
    pub channel_index: Option<usize>,
}

impl MakeRoute {
    pub fn route_id(&self) -> RouteId {
        RouteId::new(self.transaction, self.payer_side)
    }
}

/// Reports back from the meeting point that a half-route is complete,
/// carrying the validity window agreed by both legs.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct HaveRoute {
    pub transaction: TransactionId,
    pub payer_side: bool,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl HaveRoute {
    pub fn route_id(&self) -> RouteId {
        RouteId::new(self.transaction, self.payer_side)
    }
}

/// Negative routing outcome: the sender could not extend this
/// half-route any further.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct HaveNoRoute {
    pub transaction: TransactionId,
    pub payer_side: bool,
}

impl HaveNoRoute {
    pub fn route_id(&self) -> RouteId {
        RouteId::new(self.transaction, self.payer_side)
    }
}

/// Tears down a reserved half-route, travelling in the same direction
/// the route was built.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CancelRoute {
    pub transaction: TransactionId,
    pub payer_side: bool,
}

impl CancelRoute {
    pub fn route_id(&self) -> RouteId {
        RouteId::new(self.transaction, self.payer_side)
    }
}

/// Converts a reservation into a lock, hop by hop in the direction the
/// money moves.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Lock {
    pub transaction: TransactionId,
    pub payer_side: bool,
    pub amount: Amount,
}

impl Lock {
    pub fn route_id(&self) -> RouteId {
        RouteId::new(self.transaction, self.payer_side)
    }
}

/// Carries the commit token from the payee back towards the payer.
/// Pure relay: no channel state changes along the way.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RequestCommit {
    pub token: Token,
    pub payer_side: bool,
}

impl RequestCommit {
    pub fn route_id(&self) -> RouteId {
        RouteId::new(self.token.transaction_id(), self.payer_side)
    }
}

/// Settles a locked route positively. Each hop verifies the token
/// hashes to the transaction identifier before moving funds.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SettleCommit {
    pub token: Token,
    pub payer_side: bool,
}

impl SettleCommit {
    pub fn route_id(&self) -> RouteId {
        RouteId::new(self.token.transaction_id(), self.payer_side)
    }
}

/// Settles a locked route negatively, releasing the funds back.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SettleRollback {
    pub transaction: TransactionId,
    pub payer_side: bool,
}

impl SettleRollback {
    pub fn route_id(&self) -> RouteId {
        RouteId::new(self.transaction, self.payer_side)
    }
}

/// Which settlement backing a channel uses.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Symmetric deposit-backed channel.
    Plain,
    /// Debt channel; the depositing side issues the IOU.
    Iou,
}

/// Channel-type-specific conversation payloads, exchanged between the
/// two ends of one channel.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConvMsg {
    /// Depositor announces the deposited amount.
    DepositAmount { amount: Amount },
    /// Acceptor acknowledges the deposit; the channel is ready.
    DepositAck,
    /// Non-issuer supplies the payout address for an IOU channel.
    IouAddress { address: String },
    /// Issuer acknowledges an updated debt total after a settle.
    IouNote { amount: Amount, total_owed: Amount },
    /// Non-issuer asks the issuer to close the IOU channel on chain.
    IouCloseRequest,
    /// Issuer reports the broadcast settlement transaction.
    IouClosed { tx_id: String },
    /// Peer acknowledges a withdraw; the channel is closed.
    WithdrawAck,
}

/// One packet on the wire.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    /// Payment conversation hello: the payer names the payee it wants.
    Pay { payee: PayeeId },
    Receipt(Receipt),
    /// Payer confirms the receipt and names the chosen meeting point.
    Confirm { transaction: TransactionId, meeting_point: MeetingPointId },
    /// Either end abandons the payment conversation.
    Cancel { transaction: TransactionId },

    MakeRoute(MakeRoute),
    HaveRoute(HaveRoute),
    HaveNoRoute(HaveNoRoute),
    CancelRoute(CancelRoute),
    Lock(Lock),
    RequestCommit(RequestCommit),
    SettleCommit(SettleCommit),
    SettleRollback(SettleRollback),

    /// Announces a freshly deposited channel to the link peer.
    Deposit { channel_index: usize, kind: ChannelKind },
    /// Asks the peer to release an empty channel.
    Withdraw { channel_index: usize },
    /// Wraps a channel conversation payload.
    ChannelMsg { channel_index: usize, msg: ChannelConvMsg },
}

impl Packet {
    /// Short name for log lines.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Packet::Pay { .. } => "pay",
            Packet::Receipt(_) => "receipt",
            Packet::Confirm { .. } => "confirm",
            Packet::Cancel { .. } => "cancel",
            Packet::MakeRoute(_) => "make_route",
            Packet::HaveRoute(_) => "have_route",
            Packet::HaveNoRoute(_) => "have_no_route",
            Packet::CancelRoute(_) => "cancel_route",
            Packet::Lock(_) => "lock",
            Packet::RequestCommit(_) => "request_commit",
            Packet::SettleCommit(_) => "settle_commit",
            Packet::SettleRollback(_) => "settle_rollback",
            Packet::Deposit { .. } => "deposit",
            Packet::Withdraw { .. } => "withdraw",
            Packet::ChannelMsg { .. } => "channel_msg",
        }
    }

    /// The half-route this packet travels on, if it is a relay packet.
    ///
    /// Token-carrying packets derive it by hashing the token, so a
    /// forged token can never address an existing route.
    pub fn route_id(&self) -> Option<RouteId> {
        match self {
            Packet::MakeRoute(m) => Some(m.route_id()),
            Packet::HaveRoute(h) => Some(h.route_id()),
            Packet::HaveNoRoute(n) => Some(n.route_id()),
            Packet::CancelRoute(c) => Some(c.route_id()),
            Packet::Lock(l) => Some(l.route_id()),
            Packet::RequestCommit(r) => Some(r.route_id()),
            Packet::SettleCommit(s) => Some(s.route_id()),
            Packet::SettleRollback(s) => Some(s.route_id()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_json_is_tagged() {
        let packet = Packet::Withdraw { channel_index: 2 };
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["type"], "withdraw");
        assert_eq!(json["channel_index"], 2);
    }

    #[test]
    fn test_relay_packet_round_trip() {
        let token = Token::from_bytes([9u8; 32]);
        let packet = Packet::SettleCommit(SettleCommit { token, payer_side: true });
        let json = serde_json::to_string(&packet).unwrap();
        let back: Packet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, packet);
    }

    #[test]
    fn test_token_packets_derive_route_from_hash() {
        let token = Token::from_bytes([4u8; 32]);
        let packet = Packet::RequestCommit(RequestCommit { token, payer_side: false });
        assert_eq!(
            packet.route_id(),
            Some(RouteId::new(token.transaction_id(), false))
        );
    }

    #[test]
    fn test_conversation_packets_have_no_route() {
        assert_eq!(Packet::Pay { payee: PayeeId::generate() }.route_id(), None);
        assert_eq!(Packet::Withdraw { channel_index: 0 }.route_id(), None);
    }

    #[test]
    fn test_channel_msg_nested_tag() {
        let packet = Packet::ChannelMsg {
            channel_index: 0,
            msg: ChannelConvMsg::DepositAmount { amount: 500 },
        };
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["type"], "channel_msg");
        assert_eq!(json["msg"]["type"], "deposit_amount");
        assert_eq!(json["msg"]["amount"], 500);
    }
}
