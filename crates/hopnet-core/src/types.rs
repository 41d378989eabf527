//! Identifier and amount vocabulary shared by every hopnet crate.
//!
//! All amounts are unsigned integers in the smallest currency unit.
//! Transaction identifiers are derived from commit tokens by hashing,
//! so any party holding the token can prove it belongs to a route.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Amount in the smallest currency unit.
pub type Amount = u64;

/// Milliseconds since the Unix epoch, from the wall clock.
///
/// Handlers never read the clock themselves; the current time is taken
/// once per unit of work and passed down explicitly.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn decode_digest(input: &str) -> Result<[u8; 32], CoreError> {
    let bytes = hex::decode(input).map_err(|e| CoreError::InvalidDigest {
        input: input.to_owned(),
        reason: e.to_string(),
    })?;
    bytes.try_into().map_err(|_| CoreError::InvalidDigest {
        input: input.to_owned(),
        reason: "expected 32 bytes".to_owned(),
    })
}

/// Secret commit token, generated by the payee and revealed to commit
/// a payment.
///
/// Knowledge of the token is what turns a locked route into money: the
/// settle-commit exchange carries it, and every hop checks it hashes to
/// the transaction identifier before moving funds.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token([u8; 32]);

impl Token {
    /// Draws a fresh 32-byte token from the thread RNG.
    pub fn generate() -> Self {
        Token(rand::random())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Token(bytes)
    }

    /// The transaction identifier this token commits to.
    pub fn transaction_id(&self) -> TransactionId {
        TransactionId(*blake3::hash(&self.0).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The token is a spendable secret; never print it in full.
        write!(f, "Token({}..)", &self.to_hex()[..8])
    }
}

impl TryFrom<String> for Token {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode_digest(&value).map(Token)
    }
}

impl From<Token> for String {
    fn from(value: Token) -> Self {
        value.to_hex()
    }
}

/// Identifier of one payment: the blake3 hash of its commit token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId([u8; 32]);

impl TransactionId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        TransactionId(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.to_hex())
    }
}

impl FromStr for TransactionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_digest(s).map(TransactionId)
    }
}

impl TryFrom<String> for TransactionId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransactionId> for String {
    fn from(value: TransactionId) -> Self {
        value.to_hex()
    }
}

/// Identifies one half-route of a transaction.
///
/// A payment has a payer-side route (payer towards meeting point) and a
/// payee-side route (payee towards meeting point); both share the
/// transaction identifier and differ only in the side flag.
///
/// Serialized as `payer:<hex>` / `payee:<hex>` so it can key maps in
/// persisted state.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouteId {
    pub transaction: TransactionId,
    pub payer_side: bool,
}

impl RouteId {
    pub fn new(transaction: TransactionId, payer_side: bool) -> Self {
        RouteId { transaction, payer_side }
    }

    /// The same transaction seen from the other side. Used by meeting
    /// points to bridge a message from one half-route onto the other.
    pub fn flipped(&self) -> Self {
        RouteId { transaction: self.transaction, payer_side: !self.payer_side }
    }

    pub fn side_name(&self) -> &'static str {
        if self.payer_side {
            "payer"
        } else {
            "payee"
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.side_name(), self.transaction)
    }
}

impl FromStr for RouteId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CoreError::InvalidIdentifier {
            input: s.to_owned(),
            reason: "expected payer:<hex> or payee:<hex>".to_owned(),
        };
        let (side, digest) = s.split_once(':').ok_or_else(bad)?;
        let payer_side = match side {
            "payer" => true,
            "payee" => false,
            _ => return Err(bad()),
        };
        Ok(RouteId { transaction: digest.parse()?, payer_side })
    }
}

impl TryFrom<String> for RouteId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RouteId> for String {
    fn from(value: RouteId) -> Self {
        value.to_string()
    }
}

fn validate_name(input: &str, what: &str) -> Result<(), CoreError> {
    if input.is_empty() {
        return Err(CoreError::InvalidIdentifier {
            input: input.to_owned(),
            reason: format!("{what} must not be empty"),
        });
    }
    if input.contains('/') || input.chars().any(|c| c.is_whitespace()) {
        return Err(CoreError::InvalidIdentifier {
            input: input.to_owned(),
            reason: format!("{what} must not contain '/' or whitespace"),
        });
    }
    Ok(())
}

macro_rules! name_id {
    ($(#[$doc:meta])* $name:ident, $what:expr) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
                let name = name.into();
                validate_name(&name, $what)?;
                Ok(Self(name))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

name_id!(
    /// Local name of a link to one peer.
    LinkId,
    "link name"
);

name_id!(
    /// Identifier of a pending payee, unique per node.
    PayeeId,
    "payee id"
);

name_id!(
    /// Name under which a meeting point is advertised.
    MeetingPointId,
    "meeting point name"
);

impl PayeeId {
    /// Fresh payee identifier, time-ordered so pay logs sort naturally.
    pub fn generate() -> Self {
        PayeeId(uuid::Uuid::now_v7().simple().to_string())
    }
}

/// Transport address of a node, opaque to the core.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetAddress(String);

impl NetAddress {
    pub fn new(address: impl Into<String>) -> Self {
        NetAddress(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a conversation terminates on this node.
///
/// The transport delivers every inbound packet tagged with the endpoint
/// it arrived on; the core never sees socket details.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum EndpointId {
    /// A long-lived link to a channel peer.
    Link(LinkId),
    /// The single outgoing payment conversation.
    Payer,
    /// An expected incoming payment conversation.
    Payee(PayeeId),
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointId::Link(id) => write!(f, "link:{id}"),
            EndpointId::Payer => f.write_str("payer"),
            EndpointId::Payee(id) => write!(f, "payee:{id}"),
        }
    }
}

/// Lifecycle of the payer entity.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayerState {
    /// Connected, waiting for the payee's receipt.
    Initial,
    /// Receipt received, waiting for local confirmation.
    HasReceipt,
    /// Confirmed; route request sent on both legs.
    Confirmed,
    /// Our own half-route is established.
    HasPayerRoute,
    /// The payee's half-route is established.
    HasPayeeRoute,
    /// Both half-routes established and funds locked.
    Locked,
    /// Commit token received; settlement under way.
    ReceivedRequestCommit,
    Committed,
    Cancelled,
}

impl PayerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayerState::Committed | PayerState::Cancelled)
    }
}

impl fmt::Display for PayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayerState::Initial => "initial",
            PayerState::HasReceipt => "has_receipt",
            PayerState::Confirmed => "confirmed",
            PayerState::HasPayerRoute => "has_payer_route",
            PayerState::HasPayeeRoute => "has_payee_route",
            PayerState::Locked => "locked",
            PayerState::ReceivedRequestCommit => "received_request_commit",
            PayerState::Committed => "committed",
            PayerState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a payee entity.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayeeState {
    /// Waiting for the payer to connect.
    Initial,
    /// Receipt sent, waiting for the payer's confirmation.
    SentReceipt,
    /// Confirmed; our half-route request sent.
    Confirmed,
    /// Our half-route is established, waiting for the lock.
    HasRoute,
    /// Incoming funds locked; commit token released.
    SentRequestCommit,
    Committed,
    Cancelled,
}

impl PayeeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayeeState::Committed | PayeeState::Cancelled)
    }
}

impl fmt::Display for PayeeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayeeState::Initial => "initial",
            PayeeState::SentReceipt => "sent_receipt",
            PayeeState::Confirmed => "confirmed",
            PayeeState::HasRoute => "has_route",
            PayeeState::SentRequestCommit => "sent_request_commit",
            PayeeState::Committed => "committed",
            PayeeState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
