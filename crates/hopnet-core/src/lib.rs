//! Core vocabulary of the hopnet payment-channel network.
//!
//! Everything the other crates exchange lives here: identifiers, the
//! wire packet catalogue, messages and effects, timeouts, chain
//! commands, events and node configuration. This crate holds no
//! behaviour beyond construction and validation.

pub mod chain;
pub mod config;
pub mod effect;
pub mod error;
pub mod event;
pub mod message;
pub mod packet;
pub mod timeout;
pub mod types;
pub mod url;

pub use chain::{ChainCommand, ChainCommandKind, ChainReturn, ChainValue};
pub use config::NodeConfig;
pub use effect::{Effect, ReturnValue};
pub use error::CoreError;
pub use event::{NodeEvent, PayFinalState};
pub use message::{ApiRequest, Message, RelayOrigin};
pub use packet::{
    CancelRoute, ChannelConvMsg, ChannelKind, HaveNoRoute, HaveRoute, Lock, MakeRoute, Packet,
    Receipt, RequestCommit, SettleCommit, SettleRollback,
};
pub use timeout::{TimeoutEntry, TimeoutEvent, TimeoutFilter};
pub use types::{
    now_ms, Amount, EndpointId, LinkId, MeetingPointId, NetAddress, PayeeId, PayeeState,
    PayerState, RouteId, Token, TransactionId,
};
pub use url::{format_pay_url, parse_pay_url};
